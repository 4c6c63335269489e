//! Account settings and the per-account invoice numbering sequence.

pub mod account_settings;

pub use account_settings::{
    AccountSettings, AccountSettingsCommand, AccountSettingsEvent, AccountSettingsId,
    AllocateInvoiceNumber, InitializeSettings, InvoiceNumberAllocated, SettingsInitialized,
    SettingsUpdated, UpdateSettings, MAX_PREFIX_LEN,
};
