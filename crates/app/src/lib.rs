//! Application facade: wires the dispatcher, store, bus, and projections into
//! one billing service consumed via direct method calls.

mod billing_app;

pub use billing_app::{BillingApp, NewInvoice};
