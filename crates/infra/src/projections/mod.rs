mod activity_log;
mod clients;
mod invoices;

pub use activity_log::{ActivityEntry, ActivityLogProjection};
pub use clients::{ClientDirectoryProjection, ClientRecord};
pub use invoices::{InvoiceListProjection, InvoiceSummary, ProjectionError};
