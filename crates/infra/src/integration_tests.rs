//! End-to-end tests for the command pipeline: dispatcher, store, bus, and
//! projections wired together in memory.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tally_clients::ClientId;
use tally_core::{AggregateId, AccountId};
use tally_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use tally_invoicing::{
    CancelInvoice, CreateInvoice, DeleteInvoice, Invoice, InvoiceCommand, InvoiceId, InvoiceStatus,
    LineItem, MarkViewed, PaymentMethod, RecordPayment, SendInvoice,
};
use tally_settings::{
    AccountSettings, AccountSettingsCommand, AccountSettingsEvent, AccountSettingsId,
    AllocateInvoiceNumber, InitializeSettings,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::InMemoryEventStore;
use crate::projections::{ActivityLogProjection, InvoiceListProjection};
use crate::read_model::InMemoryAccountStore;

type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

struct Harness {
    dispatcher: Dispatcher,
    subscription: Subscription<EventEnvelope<JsonValue>>,
    invoices: InvoiceListProjection<InMemoryAccountStore<InvoiceId, crate::projections::InvoiceSummary>>,
    activity: ActivityLogProjection,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            subscription,
            invoices: InvoiceListProjection::new(InMemoryAccountStore::new()),
            activity: ActivityLogProjection::new(),
        }
    }

    /// Feed everything published so far into the projections.
    fn drain(&self) {
        while let Ok(envelope) = self.subscription.try_recv() {
            self.invoices.apply_envelope(&envelope).unwrap();
            self.activity.apply_envelope(&envelope);
        }
    }

    fn dispatch_invoice(
        &self,
        account_id: AccountId,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch::<Invoice>(
            account_id,
            invoice_id.0,
            "invoicing.invoice",
            command,
            |_, id| Invoice::empty(InvoiceId::new(id)),
        )?;
        Ok(())
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn line(quantity_milli: u64, unit_price: u64) -> LineItem {
    LineItem {
        sort_order: 0,
        description: "design work".to_string(),
        quantity_milli,
        unit_price,
    }
}

fn create_cmd(account_id: AccountId, invoice_id: InvoiceId, number: &str) -> InvoiceCommand {
    InvoiceCommand::CreateInvoice(CreateInvoice {
        account_id,
        invoice_id,
        client_id: ClientId::new(AggregateId::new()),
        project_id: None,
        number: number.to_string(),
        line_items: vec![line(1_000, 100_000)],
        tax_rate_bps: 0,
        discount: 0,
        due_date: now() + Duration::days(30),
        notes: None,
        occurred_at: now(),
    })
}

#[test]
fn invoice_lifecycle_flows_through_to_the_read_models() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::SendInvoice(SendInvoice {
                account_id,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::MarkViewed(MarkViewed {
                account_id,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::RecordPayment(RecordPayment {
                account_id,
                invoice_id,
                payment_id: Uuid::now_v7(),
                amount: 40_000,
                method: PaymentMethod::BankTransfer,
                reference: Some("wire-001".to_string()),
                paid_at: None,
                notes: None,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness.drain();

    let summary = harness.invoices.get(account_id, &invoice_id).unwrap();
    assert_eq!(summary.status, InvoiceStatus::Partial);
    assert_eq!(summary.amount_paid, 40_000);
    assert_eq!(summary.balance(), 60_000);

    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::RecordPayment(RecordPayment {
                account_id,
                invoice_id,
                payment_id: Uuid::now_v7(),
                amount: 60_000,
                method: PaymentMethod::Cash,
                reference: None,
                paid_at: None,
                notes: None,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness.drain();

    let summary = harness.invoices.get(account_id, &invoice_id).unwrap();
    assert_eq!(summary.status, InvoiceStatus::Paid);
    assert_eq!(summary.balance(), 0);

    // Audit trail saw every event: create, send, view, 2 payments.
    assert_eq!(harness.activity.list(account_id).len(), 5);
}

#[test]
fn overdue_shows_up_in_the_list_without_being_stored() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::SendInvoice(SendInvoice {
                account_id,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness.drain();

    let rows = harness.invoices.list(account_id, now());
    assert_eq!(rows[0].status, InvoiceStatus::Sent);

    let rows = harness.invoices.list(account_id, now() + Duration::days(31));
    assert_eq!(rows[0].status, InvoiceStatus::Overdue);

    // The stored row still says Sent.
    let stored = harness.invoices.get(account_id, &invoice_id).unwrap();
    assert_eq!(stored.status, InvoiceStatus::Sent);
}

#[test]
fn deleting_a_cancelled_invoice_drops_it_from_the_list() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::CancelInvoice(CancelInvoice {
                account_id,
                invoice_id,
                reason: None,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::DeleteInvoice(DeleteInvoice {
                account_id,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap();
    harness.drain();

    assert!(harness.invoices.get(account_id, &invoice_id).is_none());
    assert!(harness.invoices.list(account_id, now()).is_empty());

    // Commands against the deleted invoice look absent.
    let err = harness
        .dispatch_invoice(
            account_id,
            invoice_id,
            InvoiceCommand::SendInvoice(SendInvoice {
                account_id,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound));
}

#[test]
fn another_account_cannot_touch_the_invoice() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let intruder = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();

    // The intruder's load is account-scoped, so the stream looks empty and
    // the command fails as if the invoice did not exist.
    let err = harness
        .dispatch_invoice(
            intruder,
            invoice_id,
            InvoiceCommand::SendInvoice(SendInvoice {
                account_id: intruder,
                invoice_id,
                occurred_at: now(),
            }),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound));
}

#[test]
fn duplicate_create_is_a_concurrency_conflict() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();
    let err = harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0002"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Concurrency(_)));
}

#[test]
fn number_allocation_through_the_dispatcher_is_sequential() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let settings_id = AccountSettingsId::new(AggregateId::new());

    harness
        .dispatcher
        .dispatch::<AccountSettings>(
            account_id,
            settings_id.0,
            "settings.account",
            AccountSettingsCommand::InitializeSettings(InitializeSettings {
                account_id,
                settings_id,
                invoice_prefix: "INV".to_string(),
                default_tax_rate_bps: 500,
                default_payment_terms_days: 30,
                occurred_at: now(),
            }),
            |_, id| AccountSettings::empty(AccountSettingsId::new(id)),
        )
        .unwrap();

    let mut formatted = Vec::new();
    for _ in 0..3 {
        let committed = harness
            .dispatcher
            .dispatch::<AccountSettings>(
                account_id,
                settings_id.0,
                "settings.account",
                AccountSettingsCommand::AllocateInvoiceNumber(AllocateInvoiceNumber {
                    account_id,
                    settings_id,
                    occurred_at: now(),
                }),
                |_, id| AccountSettings::empty(AccountSettingsId::new(id)),
            )
            .unwrap();

        let event: AccountSettingsEvent =
            serde_json::from_value(committed[0].payload.clone()).unwrap();
        match event {
            AccountSettingsEvent::InvoiceNumberAllocated(e) => formatted.push(e.formatted),
            other => panic!("expected allocation event, got {other:?}"),
        }
    }

    assert_eq!(formatted, vec!["INV-0001", "INV-0002", "INV-0003"]);
}

#[test]
fn dispatch_errors_render_for_logs() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();
    let err = harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0002"))
        .unwrap_err();
    assert!(err.to_string().starts_with("concurrency conflict:"));
    assert_eq!(DispatchError::NotFound.to_string(), "not found");
}

#[test]
fn redelivered_envelopes_do_not_double_apply() {
    let harness = Harness::new();
    let account_id = AccountId::new();
    let invoice_id = InvoiceId::new(AggregateId::new());

    harness
        .dispatch_invoice(account_id, invoice_id, create_cmd(account_id, invoice_id, "INV-0001"))
        .unwrap();

    let envelope = harness.subscription.try_recv().unwrap();
    harness.invoices.apply_envelope(&envelope).unwrap();
    harness.invoices.apply_envelope(&envelope).unwrap();

    assert_eq!(harness.invoices.list(account_id, now()).len(), 1);
}
