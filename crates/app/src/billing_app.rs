use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tally_clients::{
    ArchiveClient, Client, ClientCommand, ClientId, ContactInfo, RegisterClient, UpdateClient,
};
use tally_core::{Aggregate, AggregateId, AccountId};
use tally_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use tally_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use tally_infra::event_store::{EventStore, InMemoryEventStore};
use tally_infra::projections::{
    ActivityEntry, ActivityLogProjection, ClientDirectoryProjection, ClientRecord,
    InvoiceListProjection, InvoiceSummary,
};
use tally_infra::read_model::InMemoryAccountStore;
use tally_invoicing::{
    CancelInvoice, CreateInvoice, DeleteInvoice, EditInvoice, Invoice, InvoiceCommand, InvoiceId,
    LineItem, MarkViewed, PaymentMethod, RecordPayment, SendInvoice,
};
use tally_projects::{
    AddTask, ArchiveProject, CompleteProject, CompleteTask, CreateProject, Project, ProjectCommand,
    ProjectId,
};
use tally_settings::{
    AccountSettings, AccountSettingsCommand, AccountSettingsEvent, AccountSettingsId,
    AllocateInvoiceNumber, InitializeSettings, UpdateSettings,
};

const INVOICE_AGGREGATE: &str = "invoicing.invoice";
const CLIENT_AGGREGATE: &str = "clients.client";
const PROJECT_AGGREGATE: &str = "projects.project";
const SETTINGS_AGGREGATE: &str = "settings.account";

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

/// Parameters for creating a draft invoice.
///
/// `tax_rate_bps` and `due_date` fall back to the account's settings when
/// omitted.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub client_id: ClientId,
    pub project_id: Option<ProjectId>,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: Option<u32>,
    pub discount: u64,
    pub due_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// The billing service: every operation runs through the command dispatcher
/// and lands in the read models via the in-process event bus.
///
/// Consumed directly via method calls; serving it over a network is a hosting
/// concern layered on top.
pub struct BillingApp {
    store: Store,
    dispatcher: CommandDispatcher<Store, Bus>,
    subscription: Subscription<EventEnvelope<JsonValue>>,
    invoices: InvoiceListProjection<InMemoryAccountStore<InvoiceId, InvoiceSummary>>,
    clients: ClientDirectoryProjection<InMemoryAccountStore<ClientId, ClientRecord>>,
    activity: ActivityLogProjection,
}

impl Default for BillingApp {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingApp {
    pub fn new() -> Self {
        tally_observability::init();

        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();

        Self {
            store: store.clone(),
            dispatcher: CommandDispatcher::new(store, bus),
            subscription,
            invoices: InvoiceListProjection::new(InMemoryAccountStore::new()),
            clients: ClientDirectoryProjection::new(InMemoryAccountStore::new()),
            activity: ActivityLogProjection::new(),
        }
    }

    /// Apply everything published since the last call to the read models.
    ///
    /// Called internally after each command; public so a caller who consumes
    /// the store out-of-band can catch the projections up too.
    pub fn drain_events(&self) {
        while let Ok(envelope) = self.subscription.try_recv() {
            // Projections are idempotent; a projection error here means a
            // corrupted stream, which reads should not hide.
            if let Err(e) = self.invoices.apply_envelope(&envelope) {
                tracing::error!(error = %e, "invoice projection rejected envelope");
            }
            if let Err(e) = self.clients.apply_envelope(&envelope) {
                tracing::error!(error = %e, "client projection rejected envelope");
            }
            self.activity.apply_envelope(&envelope);
        }
    }

    // One settings stream per account, addressed deterministically so no
    // account -> aggregate registry is needed.
    fn settings_id(account_id: AccountId) -> AccountSettingsId {
        AccountSettingsId::new(AggregateId::from_uuid(*account_id.as_uuid()))
    }

    fn dispatch<A>(
        &self,
        account_id: AccountId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AccountId, AggregateId) -> A,
    ) -> Result<(), DispatchError>
    where
        A: Aggregate<Error = tally_core::DomainError>,
        A::Event: tally_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher.dispatch::<A>(
            account_id,
            aggregate_id,
            aggregate_type,
            command,
            make_aggregate,
        )?;
        self.drain_events();
        Ok(())
    }

    // ---- clients ----

    pub fn register_client(
        &self,
        account_id: AccountId,
        name: impl Into<String>,
        contact: Option<ContactInfo>,
    ) -> Result<ClientId, DispatchError> {
        let client_id = ClientId::new(AggregateId::new());
        self.dispatch(
            account_id,
            client_id.0,
            CLIENT_AGGREGATE,
            ClientCommand::RegisterClient(RegisterClient {
                account_id,
                client_id,
                name: name.into(),
                contact,
                occurred_at: Utc::now(),
            }),
            |_, id| Client::empty(ClientId::new(id)),
        )?;
        tracing::info!(%client_id, "client registered");
        Ok(client_id)
    }

    pub fn update_client(
        &self,
        account_id: AccountId,
        client_id: ClientId,
        name: Option<String>,
        contact: Option<ContactInfo>,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            client_id.0,
            CLIENT_AGGREGATE,
            ClientCommand::UpdateClient(UpdateClient {
                account_id,
                client_id,
                name,
                contact,
                occurred_at: Utc::now(),
            }),
            |_, id| Client::empty(ClientId::new(id)),
        )
    }

    pub fn archive_client(
        &self,
        account_id: AccountId,
        client_id: ClientId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            client_id.0,
            CLIENT_AGGREGATE,
            ClientCommand::ArchiveClient(ArchiveClient {
                account_id,
                client_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Client::empty(ClientId::new(id)),
        )
    }

    // ---- projects ----

    pub fn create_project(
        &self,
        account_id: AccountId,
        client_id: ClientId,
        name: impl Into<String>,
    ) -> Result<ProjectId, DispatchError> {
        let project_id = ProjectId::new(AggregateId::new());
        self.dispatch(
            account_id,
            project_id.0,
            PROJECT_AGGREGATE,
            ProjectCommand::CreateProject(CreateProject {
                account_id,
                project_id,
                client_id,
                name: name.into(),
                occurred_at: Utc::now(),
            }),
            |_, id| Project::empty(ProjectId::new(id)),
        )?;
        tracing::info!(%project_id, "project created");
        Ok(project_id)
    }

    pub fn add_task(
        &self,
        account_id: AccountId,
        project_id: ProjectId,
        description: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            project_id.0,
            PROJECT_AGGREGATE,
            ProjectCommand::AddTask(AddTask {
                account_id,
                project_id,
                description: description.into(),
                occurred_at: Utc::now(),
            }),
            |_, id| Project::empty(ProjectId::new(id)),
        )
    }

    pub fn complete_task(
        &self,
        account_id: AccountId,
        project_id: ProjectId,
        task_no: u32,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            project_id.0,
            PROJECT_AGGREGATE,
            ProjectCommand::CompleteTask(CompleteTask {
                account_id,
                project_id,
                task_no,
                occurred_at: Utc::now(),
            }),
            |_, id| Project::empty(ProjectId::new(id)),
        )
    }

    pub fn complete_project(
        &self,
        account_id: AccountId,
        project_id: ProjectId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            project_id.0,
            PROJECT_AGGREGATE,
            ProjectCommand::CompleteProject(CompleteProject {
                account_id,
                project_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Project::empty(ProjectId::new(id)),
        )
    }

    pub fn archive_project(
        &self,
        account_id: AccountId,
        project_id: ProjectId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            project_id.0,
            PROJECT_AGGREGATE,
            ProjectCommand::ArchiveProject(ArchiveProject {
                account_id,
                project_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Project::empty(ProjectId::new(id)),
        )
    }

    // ---- settings ----

    pub fn initialize_settings(
        &self,
        account_id: AccountId,
        invoice_prefix: impl Into<String>,
        default_tax_rate_bps: u32,
        default_payment_terms_days: u32,
    ) -> Result<(), DispatchError> {
        let settings_id = Self::settings_id(account_id);
        self.dispatch(
            account_id,
            settings_id.0,
            SETTINGS_AGGREGATE,
            AccountSettingsCommand::InitializeSettings(InitializeSettings {
                account_id,
                settings_id,
                invoice_prefix: invoice_prefix.into(),
                default_tax_rate_bps,
                default_payment_terms_days,
                occurred_at: Utc::now(),
            }),
            |_, id| AccountSettings::empty(AccountSettingsId::new(id)),
        )
    }

    pub fn update_settings(
        &self,
        account_id: AccountId,
        invoice_prefix: Option<String>,
        default_tax_rate_bps: Option<u32>,
        default_payment_terms_days: Option<u32>,
    ) -> Result<(), DispatchError> {
        let settings_id = Self::settings_id(account_id);
        self.dispatch(
            account_id,
            settings_id.0,
            SETTINGS_AGGREGATE,
            AccountSettingsCommand::UpdateSettings(UpdateSettings {
                account_id,
                settings_id,
                invoice_prefix,
                default_tax_rate_bps,
                default_payment_terms_days,
                occurred_at: Utc::now(),
            }),
            |_, id| AccountSettings::empty(AccountSettingsId::new(id)),
        )
    }

    fn load_settings(&self, account_id: AccountId) -> Result<AccountSettings, DispatchError> {
        let settings_id = Self::settings_id(account_id);
        let history = self.store.load_stream(account_id, settings_id.0)?;
        if history.is_empty() {
            return Err(DispatchError::NotFound);
        }

        let mut settings = AccountSettings::empty(settings_id);
        for stored in history {
            let event: AccountSettingsEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            settings.apply(&event);
        }
        Ok(settings)
    }

    fn load_client(
        &self,
        account_id: AccountId,
        client_id: ClientId,
    ) -> Result<Client, DispatchError> {
        let history = self.store.load_stream(account_id, client_id.0)?;
        if history.is_empty() {
            return Err(DispatchError::NotFound);
        }

        let mut client = Client::empty(client_id);
        for stored in history {
            let event: tally_clients::ClientEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            client.apply(&event);
        }
        Ok(client)
    }

    // ---- invoices ----

    /// Create a draft invoice, allocating the next number from the account's
    /// sequence.
    ///
    /// The allocation commits before the invoice does, so a failure in
    /// between burns the number and leaves a gap in the sequence. Gaps are
    /// fine; reuse is not. The client is checked first so a rejected invoice
    /// never consumes a number.
    pub fn create_invoice(
        &self,
        account_id: AccountId,
        params: NewInvoice,
    ) -> Result<(InvoiceId, String), DispatchError> {
        let settings = self.load_settings(account_id)?;
        let client = self.load_client(account_id, params.client_id)?;
        if !client.can_transact() {
            return Err(DispatchError::InvalidState(
                "archived clients cannot be invoiced".to_string(),
            ));
        }
        let tax_rate_bps = params
            .tax_rate_bps
            .unwrap_or_else(|| settings.default_tax_rate_bps());
        let due_date = params.due_date.unwrap_or_else(|| {
            Utc::now() + Duration::days(i64::from(settings.default_payment_terms_days()))
        });

        let settings_id = Self::settings_id(account_id);
        let committed = self.dispatcher.dispatch::<AccountSettings>(
            account_id,
            settings_id.0,
            SETTINGS_AGGREGATE,
            AccountSettingsCommand::AllocateInvoiceNumber(AllocateInvoiceNumber {
                account_id,
                settings_id,
                occurred_at: Utc::now(),
            }),
            |_, id| AccountSettings::empty(AccountSettingsId::new(id)),
        )?;

        let allocated: AccountSettingsEvent = serde_json::from_value(committed[0].payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        let number = match allocated {
            AccountSettingsEvent::InvoiceNumberAllocated(e) => e.formatted,
            other => {
                return Err(DispatchError::Deserialize(format!(
                    "unexpected settings event: {other:?}"
                )));
            }
        };

        let invoice_id = InvoiceId::new(AggregateId::new());
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::CreateInvoice(CreateInvoice {
                account_id,
                invoice_id,
                client_id: params.client_id,
                project_id: params.project_id,
                number: number.clone(),
                line_items: params.line_items,
                tax_rate_bps,
                discount: params.discount,
                due_date,
                notes: params.notes,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;

        tracing::info!(%invoice_id, %number, "invoice created");
        Ok((invoice_id, number))
    }

    pub fn update_draft_invoice(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
        line_items: Vec<LineItem>,
        tax_rate_bps: u32,
        discount: u64,
        due_date: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::EditInvoice(EditInvoice {
                account_id,
                invoice_id,
                line_items,
                tax_rate_bps,
                discount,
                due_date,
                notes,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    pub fn send_invoice(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::SendInvoice(SendInvoice {
                account_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        tracing::info!(%invoice_id, "invoice sent");
        Ok(())
    }

    pub fn mark_invoice_viewed(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::MarkViewed(MarkViewed {
                account_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_payment(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
        amount: u64,
        method: PaymentMethod,
        reference: Option<String>,
        paid_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::RecordPayment(RecordPayment {
                account_id,
                invoice_id,
                payment_id: Uuid::now_v7(),
                amount,
                method,
                reference,
                paid_at,
                notes,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        tracing::info!(%invoice_id, amount, "payment recorded");
        Ok(())
    }

    pub fn cancel_invoice(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
        reason: Option<String>,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::CancelInvoice(CancelInvoice {
                account_id,
                invoice_id,
                reason,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    pub fn delete_invoice(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            account_id,
            invoice_id.0,
            INVOICE_AGGREGATE,
            InvoiceCommand::DeleteInvoice(DeleteInvoice {
                account_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )
    }

    // ---- reads ----

    /// Invoice list with the overdue derivation applied at `now`.
    pub fn list_invoices(&self, account_id: AccountId, now: DateTime<Utc>) -> Vec<InvoiceSummary> {
        self.invoices.list(account_id, now)
    }

    pub fn invoice(&self, account_id: AccountId, invoice_id: &InvoiceId) -> Option<InvoiceSummary> {
        self.invoices.get(account_id, invoice_id)
    }

    /// Full invoice state rehydrated from the stream, including the payment
    /// ledger (the summaries only carry the running totals).
    pub fn invoice_detail(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, DispatchError> {
        let history = self.store.load_stream(account_id, invoice_id.0)?;
        if history.is_empty() {
            return Err(DispatchError::NotFound);
        }

        let mut invoice = Invoice::empty(invoice_id);
        for stored in history {
            let event: tally_invoicing::InvoiceEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            invoice.apply(&event);
        }
        if invoice.is_deleted() {
            return Err(DispatchError::NotFound);
        }
        Ok(invoice)
    }

    pub fn list_clients(&self, account_id: AccountId) -> Vec<ClientRecord> {
        self.clients.list(account_id)
    }

    pub fn client(&self, account_id: AccountId, client_id: &ClientId) -> Option<ClientRecord> {
        self.clients.get(account_id, client_id)
    }

    pub fn activity(&self, account_id: AccountId) -> Vec<ActivityEntry> {
        self.activity.list(account_id)
    }
}
