//! Invoicing: the financial state machine, payment ledger, and totals math.

pub mod invoice;
pub mod totals;

pub use invoice::{
    CancelInvoice, CreateInvoice, DeleteInvoice, EditInvoice, Invoice, InvoiceCancelled,
    InvoiceCommand, InvoiceCreated, InvoiceDeleted, InvoiceEdited, InvoiceEvent, InvoiceId,
    InvoiceSent, InvoiceStatus, InvoiceViewed, MarkViewed, Payment, PaymentMethod,
    PaymentRecorded, RecordPayment, SendInvoice,
};
pub use totals::{compute_totals, InvoiceTotals, LineItem, MAX_DESCRIPTION_LEN};
