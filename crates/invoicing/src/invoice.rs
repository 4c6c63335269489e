use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_clients::ClientId;
use tally_core::{Aggregate, AggregateId, AggregateRoot, AccountId, DomainError, Entity};
use tally_events::Event;
use tally_projects::ProjectId;

use crate::totals::{compute_totals, LineItem};

/// Invoice identifier (account-scoped via `account_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status lifecycle.
///
/// `Overdue` is never stored: it is derived at read time via
/// [`Invoice::effective_status`] so list and detail views can never disagree.
/// `Refunded` is reachable only in principle (paid invoices refuse every other
/// transition); no refund command exists because refund ledger semantics are
/// not defined for this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Partial,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
}

/// Method used to settle (part of) an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    CreditCard,
    Check,
    Other,
}

/// One entry in an invoice's append-only payment ledger.
///
/// Payments are never mutated or deleted after recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    /// Amount in minor currency units; always > 0.
    pub amount: u64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Entity for Payment {
    type Id = Uuid;

    fn id(&self) -> &Self::Id {
        &self.payment_id
    }
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    account_id: Option<AccountId>,
    client_id: Option<ClientId>,
    project_id: Option<ProjectId>,
    number: String,
    status: InvoiceStatus,
    line_items: Vec<LineItem>,
    tax_rate_bps: u32,
    discount: u64,
    subtotal: u64,
    tax_amount: u64,
    total: u64,
    amount_paid: u64,
    issue_date: Option<DateTime<Utc>>,
    due_date: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    viewed_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    payments: Vec<Payment>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            account_id: None,
            client_id: None,
            project_id: None,
            number: String::new(),
            status: InvoiceStatus::Draft,
            line_items: Vec::new(),
            tax_rate_bps: 0,
            discount: 0,
            subtotal: 0,
            tax_amount: 0,
            total: 0,
            amount_paid: 0,
            issue_date: None,
            due_date: None,
            sent_at: None,
            viewed_at: None,
            paid_at: None,
            notes: None,
            payments: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Stored status; see [`Invoice::effective_status`] for the read-time view.
    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn tax_rate_bps(&self) -> u32 {
        self.tax_rate_bps
    }

    pub fn discount(&self) -> u64 {
        self.discount
    }

    pub fn subtotal(&self) -> u64 {
        self.subtotal
    }

    pub fn tax_amount(&self) -> u64 {
        self.tax_amount
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn amount_paid(&self) -> u64 {
        self.amount_paid
    }

    /// Outstanding balance; never negative.
    pub fn balance(&self) -> u64 {
        self.total.saturating_sub(self.amount_paid)
    }

    pub fn issue_date(&self) -> Option<DateTime<Utc>> {
        self.issue_date
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn viewed_at(&self) -> Option<DateTime<Utc>> {
        self.viewed_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// The append-only payment ledger, in recording order.
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Invariant helper: draft, cancelled, and refunded invoices cannot
    /// accept payments.
    pub fn can_accept_payment(&self) -> bool {
        !matches!(
            self.status,
            InvoiceStatus::Draft | InvoiceStatus::Cancelled | InvoiceStatus::Refunded
        )
    }

    /// Status as a reader should see it at `now`: an unsettled invoice past
    /// its due date reads as `Overdue`. This is the single derivation point;
    /// the stored status never becomes `Overdue`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        let unsettled = matches!(
            self.status,
            InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::Partial
        );
        match self.due_date {
            Some(due) if unsettled && due < now => InvoiceStatus::Overdue,
            _ => self.status,
        }
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub client_id: ClientId,
    pub project_id: Option<ProjectId>,
    /// Human-facing number allocated by the account's numbering sequence.
    pub number: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub discount: u64,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditInvoice (wholesale replacement; draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInvoice {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub discount: u64,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInvoice {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkViewed (recipient-view event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkViewed {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub payment_id: Uuid,
    /// Amount in minor currency units.
    pub amount: u64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// When the money changed hands; defaults to `occurred_at`.
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteInvoice (hard delete; draft/cancelled with no payments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInvoice {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    EditInvoice(EditInvoice),
    SendInvoice(SendInvoice),
    MarkViewed(MarkViewed),
    RecordPayment(RecordPayment),
    CancelInvoice(CancelInvoice),
    DeleteInvoice(DeleteInvoice),
}

/// Event: InvoiceCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub client_id: ClientId,
    pub project_id: Option<ProjectId>,
    pub number: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub discount: u64,
    pub subtotal: u64,
    pub tax_amount: u64,
    pub total: u64,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceEdited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEdited {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub line_items: Vec<LineItem>,
    pub tax_rate_bps: u32,
    pub discount: u64,
    pub subtotal: u64,
    pub tax_amount: u64,
    pub total: u64,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSent {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceViewed (first recipient view only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceViewed {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
///
/// Carries the payment row, the new cumulative paid amount, and the derived
/// status together, so applying it updates the ledger and the invoice as one
/// atomic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub new_amount_paid: u64,
    pub new_status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceDeleted (terminal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDeleted {
    pub account_id: AccountId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    InvoiceEdited(InvoiceEdited),
    InvoiceSent(InvoiceSent),
    InvoiceViewed(InvoiceViewed),
    PaymentRecorded(PaymentRecorded),
    InvoiceCancelled(InvoiceCancelled),
    InvoiceDeleted(InvoiceDeleted),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "invoicing.invoice.created",
            InvoiceEvent::InvoiceEdited(_) => "invoicing.invoice.edited",
            InvoiceEvent::InvoiceSent(_) => "invoicing.invoice.sent",
            InvoiceEvent::InvoiceViewed(_) => "invoicing.invoice.viewed",
            InvoiceEvent::PaymentRecorded(_) => "invoicing.invoice.payment_recorded",
            InvoiceEvent::InvoiceCancelled(_) => "invoicing.invoice.cancelled",
            InvoiceEvent::InvoiceDeleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::InvoiceEdited(e) => e.occurred_at,
            InvoiceEvent::InvoiceSent(e) => e.occurred_at,
            InvoiceEvent::InvoiceViewed(e) => e.occurred_at,
            InvoiceEvent::PaymentRecorded(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
            InvoiceEvent::InvoiceDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.account_id = Some(e.account_id);
                self.client_id = Some(e.client_id);
                self.project_id = e.project_id;
                self.number = e.number.clone();
                self.line_items = e.line_items.clone();
                self.tax_rate_bps = e.tax_rate_bps;
                self.discount = e.discount;
                self.subtotal = e.subtotal;
                self.tax_amount = e.tax_amount;
                self.total = e.total;
                self.amount_paid = 0;
                self.issue_date = Some(e.issue_date);
                self.due_date = Some(e.due_date);
                self.notes = e.notes.clone();
                self.status = InvoiceStatus::Draft;
                self.created = true;
            }
            InvoiceEvent::InvoiceEdited(e) => {
                self.line_items = e.line_items.clone();
                self.tax_rate_bps = e.tax_rate_bps;
                self.discount = e.discount;
                self.subtotal = e.subtotal;
                self.tax_amount = e.tax_amount;
                self.total = e.total;
                self.due_date = Some(e.due_date);
                self.notes = e.notes.clone();
            }
            InvoiceEvent::InvoiceSent(e) => {
                self.status = InvoiceStatus::Sent;
                self.sent_at = Some(e.occurred_at);
            }
            InvoiceEvent::InvoiceViewed(e) => {
                if self.viewed_at.is_none() {
                    self.viewed_at = Some(e.occurred_at);
                }
                if self.status == InvoiceStatus::Sent {
                    self.status = InvoiceStatus::Viewed;
                }
            }
            InvoiceEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.amount_paid = e.new_amount_paid;
                self.status = e.new_status;
                if e.new_status == InvoiceStatus::Paid {
                    self.paid_at = Some(e.occurred_at);
                }
            }
            InvoiceEvent::InvoiceCancelled(_) => {
                self.status = InvoiceStatus::Cancelled;
            }
            InvoiceEvent::InvoiceDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::EditInvoice(cmd) => self.handle_edit(cmd),
            InvoiceCommand::SendInvoice(cmd) => self.handle_send(cmd),
            InvoiceCommand::MarkViewed(cmd) => self.handle_mark_viewed(cmd),
            InvoiceCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
            InvoiceCommand::DeleteInvoice(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Invoice {
    fn ensure_exists(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found());
        }
        if self.account_id != Some(account_id) {
            // Other-account invoices must look absent.
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn validate_line_items(line_items: &[LineItem]) -> Result<(), DomainError> {
        if line_items.is_empty() {
            return Err(DomainError::validation(
                "invoice must have at least one line item",
            ));
        }
        for item in line_items {
            item.validate()?;
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("invoice number must not be empty"));
        }
        Self::validate_line_items(&cmd.line_items)?;
        let totals = compute_totals(&cmd.line_items, cmd.tax_rate_bps, cmd.discount)?;

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            client_id: cmd.client_id,
            project_id: cmd.project_id,
            number: cmd.number.clone(),
            line_items: cmd.line_items.clone(),
            tax_rate_bps: cmd.tax_rate_bps,
            discount: cmd.discount,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            issue_date: cmd.occurred_at,
            due_date: cmd.due_date,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit(&self, cmd: &EditInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::forbidden(
                "only draft invoices can be edited",
            ));
        }
        Self::validate_line_items(&cmd.line_items)?;
        let totals = compute_totals(&cmd.line_items, cmd.tax_rate_bps, cmd.discount)?;

        Ok(vec![InvoiceEvent::InvoiceEdited(InvoiceEdited {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            line_items: cmd.line_items.clone(),
            tax_rate_bps: cmd.tax_rate_bps,
            discount: cmd.discount,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            due_date: cmd.due_date,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::forbidden(
                "only draft invoices can be sent",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceSent(InvoiceSent {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_viewed(&self, cmd: &MarkViewed) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        match self.status {
            InvoiceStatus::Draft => {
                return Err(DomainError::forbidden(
                    "a draft invoice has not been sent and cannot be viewed",
                ));
            }
            InvoiceStatus::Cancelled | InvoiceStatus::Refunded => {
                return Err(DomainError::forbidden(
                    "cancelled and refunded invoices cannot be viewed",
                ));
            }
            _ => {}
        }

        if self.viewed_at.is_some() {
            // Only the first view is recorded.
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::InvoiceViewed(InvoiceViewed {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if !self.can_accept_payment() {
            return Err(DomainError::invalid_state(format!(
                "cannot record a payment against a {:?} invoice",
                self.status
            )));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let balance = self.balance();
        if cmd.amount > balance {
            return Err(DomainError::validation(format!(
                "payment amount {} exceeds outstanding balance {balance}",
                cmd.amount
            )));
        }

        let new_amount_paid = self
            .amount_paid
            .checked_add(cmd.amount)
            .ok_or_else(|| DomainError::validation("payment total overflow"))?;

        let new_status = if new_amount_paid >= self.total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        };

        Ok(vec![InvoiceEvent::PaymentRecorded(PaymentRecorded {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                reference: cmd.reference.clone(),
                paid_at: cmd.paid_at.unwrap_or(cmd.occurred_at),
                notes: cmd.notes.clone(),
            },
            new_amount_paid,
            new_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        match self.status {
            InvoiceStatus::Cancelled | InvoiceStatus::Refunded => {
                return Err(DomainError::forbidden("invoice is already closed"));
            }
            InvoiceStatus::Paid => {
                return Err(DomainError::forbidden(
                    "a paid invoice cannot be cancelled",
                ));
            }
            _ => {}
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if !matches!(
            self.status,
            InvoiceStatus::Draft | InvoiceStatus::Cancelled
        ) {
            return Err(DomainError::forbidden(
                "only draft or cancelled invoices can be deleted",
            ));
        }
        if !self.payments.is_empty() {
            return Err(DomainError::forbidden(
                "an invoice with recorded payments cannot be deleted",
            ));
        }

        Ok(vec![InvoiceEvent::InvoiceDeleted(InvoiceDeleted {
            account_id: cmd.account_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
