use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Aggregate, AggregateId, AggregateRoot, AccountId, DomainError};
use tally_events::Event;

/// Maximum accepted invoice number prefix length.
pub const MAX_PREFIX_LEN: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountSettingsId(pub AggregateId);

impl AccountSettingsId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AccountSettingsId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: per-account billing settings.
///
/// Also owns the invoice numbering sequence. Allocation goes through the
/// normal command path, so two concurrent allocations race on the optimistic
/// append and the loser retries with a fresh number. Numbers are unique and
/// strictly increasing per account; a gap appears if invoice creation fails
/// after allocation, which is acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSettings {
    id: AccountSettingsId,
    account_id: Option<AccountId>,
    invoice_prefix: String,
    default_tax_rate_bps: u32,
    default_payment_terms_days: u32,
    /// Number the next allocation will hand out.
    next_invoice_number: u32,
    version: u64,
    initialized: bool,
}

impl AccountSettings {
    pub fn empty(id: AccountSettingsId) -> Self {
        Self {
            id,
            account_id: None,
            invoice_prefix: String::new(),
            default_tax_rate_bps: 0,
            default_payment_terms_days: 0,
            next_invoice_number: 1,
            version: 0,
            initialized: false,
        }
    }

    pub fn id_typed(&self) -> AccountSettingsId {
        self.id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn invoice_prefix(&self) -> &str {
        &self.invoice_prefix
    }

    pub fn default_tax_rate_bps(&self) -> u32 {
        self.default_tax_rate_bps
    }

    pub fn default_payment_terms_days(&self) -> u32 {
        self.default_payment_terms_days
    }

    pub fn next_invoice_number(&self) -> u32 {
        self.next_invoice_number
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Render a number the way it appears on an invoice, e.g. `INV-0042`.
    pub fn format_number(prefix: &str, number: u32) -> String {
        format!("{prefix}-{number:04}")
    }

    fn validate_prefix(prefix: &str) -> Result<(), DomainError> {
        if prefix.trim().is_empty() {
            return Err(DomainError::validation("invoice prefix must not be empty"));
        }
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(DomainError::validation(format!(
                "invoice prefix exceeds {MAX_PREFIX_LEN} characters"
            )));
        }
        Ok(())
    }

    fn ensure_initialized(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.initialized {
            return Err(DomainError::not_found());
        }
        if self.account_id != Some(account_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }
}

impl AggregateRoot for AccountSettings {
    type Id = AccountSettingsId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: InitializeSettings (once per account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeSettings {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub invoice_prefix: String,
    pub default_tax_rate_bps: u32,
    pub default_payment_terms_days: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateSettings.
///
/// Changing the prefix only affects invoices created afterwards; the
/// numbering sequence continues unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub invoice_prefix: Option<String>,
    pub default_tax_rate_bps: Option<u32>,
    pub default_payment_terms_days: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateInvoiceNumber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateInvoiceNumber {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountSettingsCommand {
    InitializeSettings(InitializeSettings),
    UpdateSettings(UpdateSettings),
    AllocateInvoiceNumber(AllocateInvoiceNumber),
}

/// Event: SettingsInitialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInitialized {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub invoice_prefix: String,
    pub default_tax_rate_bps: u32,
    pub default_payment_terms_days: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettingsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub invoice_prefix: Option<String>,
    pub default_tax_rate_bps: Option<u32>,
    pub default_payment_terms_days: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceNumberAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNumberAllocated {
    pub account_id: AccountId,
    pub settings_id: AccountSettingsId,
    pub number: u32,
    /// Prefix-qualified rendering, e.g. `INV-0042`.
    pub formatted: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountSettingsEvent {
    SettingsInitialized(SettingsInitialized),
    SettingsUpdated(SettingsUpdated),
    InvoiceNumberAllocated(InvoiceNumberAllocated),
}

impl Event for AccountSettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountSettingsEvent::SettingsInitialized(_) => "settings.account.initialized",
            AccountSettingsEvent::SettingsUpdated(_) => "settings.account.updated",
            AccountSettingsEvent::InvoiceNumberAllocated(_) => {
                "settings.account.invoice_number_allocated"
            }
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountSettingsEvent::SettingsInitialized(e) => e.occurred_at,
            AccountSettingsEvent::SettingsUpdated(e) => e.occurred_at,
            AccountSettingsEvent::InvoiceNumberAllocated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for AccountSettings {
    type Command = AccountSettingsCommand;
    type Event = AccountSettingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountSettingsEvent::SettingsInitialized(e) => {
                self.id = e.settings_id;
                self.account_id = Some(e.account_id);
                self.invoice_prefix = e.invoice_prefix.clone();
                self.default_tax_rate_bps = e.default_tax_rate_bps;
                self.default_payment_terms_days = e.default_payment_terms_days;
                self.next_invoice_number = 1;
                self.initialized = true;
            }
            AccountSettingsEvent::SettingsUpdated(e) => {
                if let Some(prefix) = &e.invoice_prefix {
                    self.invoice_prefix = prefix.clone();
                }
                if let Some(rate) = e.default_tax_rate_bps {
                    self.default_tax_rate_bps = rate;
                }
                if let Some(days) = e.default_payment_terms_days {
                    self.default_payment_terms_days = days;
                }
            }
            AccountSettingsEvent::InvoiceNumberAllocated(e) => {
                self.next_invoice_number = e.number + 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountSettingsCommand::InitializeSettings(cmd) => {
                if self.initialized {
                    return Err(DomainError::conflict(
                        "account settings already initialized",
                    ));
                }
                Self::validate_prefix(&cmd.invoice_prefix)?;

                Ok(vec![AccountSettingsEvent::SettingsInitialized(
                    SettingsInitialized {
                        account_id: cmd.account_id,
                        settings_id: cmd.settings_id,
                        invoice_prefix: cmd.invoice_prefix.clone(),
                        default_tax_rate_bps: cmd.default_tax_rate_bps,
                        default_payment_terms_days: cmd.default_payment_terms_days,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
            AccountSettingsCommand::UpdateSettings(cmd) => {
                self.ensure_initialized(cmd.account_id)?;
                if let Some(prefix) = &cmd.invoice_prefix {
                    Self::validate_prefix(prefix)?;
                }

                Ok(vec![AccountSettingsEvent::SettingsUpdated(SettingsUpdated {
                    account_id: cmd.account_id,
                    settings_id: cmd.settings_id,
                    invoice_prefix: cmd.invoice_prefix.clone(),
                    default_tax_rate_bps: cmd.default_tax_rate_bps,
                    default_payment_terms_days: cmd.default_payment_terms_days,
                    occurred_at: cmd.occurred_at,
                })])
            }
            AccountSettingsCommand::AllocateInvoiceNumber(cmd) => {
                self.ensure_initialized(cmd.account_id)?;

                let number = self.next_invoice_number;
                Ok(vec![AccountSettingsEvent::InvoiceNumberAllocated(
                    InvoiceNumberAllocated {
                        account_id: cmd.account_id,
                        settings_id: cmd.settings_id,
                        number,
                        formatted: Self::format_number(&self.invoice_prefix, number),
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn initialized(account_id: AccountId) -> AccountSettings {
        let settings_id = AccountSettingsId::new(AggregateId::new());
        let mut settings = AccountSettings::empty(settings_id);
        let events = settings
            .handle(&AccountSettingsCommand::InitializeSettings(
                InitializeSettings {
                    account_id,
                    settings_id,
                    invoice_prefix: "INV".to_string(),
                    default_tax_rate_bps: 500,
                    default_payment_terms_days: 30,
                    occurred_at: test_time(),
                },
            ))
            .unwrap();
        for e in &events {
            settings.apply(e);
        }
        settings
    }

    fn allocate(settings: &mut AccountSettings, account_id: AccountId) -> InvoiceNumberAllocated {
        let events = settings
            .handle(&AccountSettingsCommand::AllocateInvoiceNumber(
                AllocateInvoiceNumber {
                    account_id,
                    settings_id: settings.id_typed(),
                    occurred_at: test_time(),
                },
            ))
            .unwrap();
        let allocated = match &events[0] {
            AccountSettingsEvent::InvoiceNumberAllocated(e) => e.clone(),
            other => panic!("expected allocation event, got {other:?}"),
        };
        for e in &events {
            settings.apply(e);
        }
        allocated
    }

    #[test]
    fn numbering_starts_at_one_and_formats_with_prefix() {
        let account_id = AccountId::new();
        let mut settings = initialized(account_id);

        let first = allocate(&mut settings, account_id);
        assert_eq!(first.number, 1);
        assert_eq!(first.formatted, "INV-0001");
    }

    #[test]
    fn numbers_beyond_four_digits_widen_naturally() {
        assert_eq!(AccountSettings::format_number("INV", 42), "INV-0042");
        assert_eq!(AccountSettings::format_number("INV", 12_345), "INV-12345");
    }

    #[test]
    fn double_initialization_is_a_conflict() {
        let account_id = AccountId::new();
        let settings = initialized(account_id);

        let err = settings
            .handle(&AccountSettingsCommand::InitializeSettings(
                InitializeSettings {
                    account_id,
                    settings_id: settings.id_typed(),
                    invoice_prefix: "ACME".to_string(),
                    default_tax_rate_bps: 0,
                    default_payment_terms_days: 14,
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let settings_id = AccountSettingsId::new(AggregateId::new());
        let settings = AccountSettings::empty(settings_id);

        let err = settings
            .handle(&AccountSettingsCommand::InitializeSettings(
                InitializeSettings {
                    account_id: AccountId::new(),
                    settings_id,
                    invoice_prefix: "  ".to_string(),
                    default_tax_rate_bps: 0,
                    default_payment_terms_days: 30,
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn prefix_change_does_not_reset_the_sequence() {
        let account_id = AccountId::new();
        let mut settings = initialized(account_id);
        allocate(&mut settings, account_id);
        allocate(&mut settings, account_id);

        let events = settings
            .handle(&AccountSettingsCommand::UpdateSettings(UpdateSettings {
                account_id,
                settings_id: settings.id_typed(),
                invoice_prefix: Some("ACME".to_string()),
                default_tax_rate_bps: None,
                default_payment_terms_days: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        for e in &events {
            settings.apply(e);
        }

        let next = allocate(&mut settings, account_id);
        assert_eq!(next.number, 3);
        assert_eq!(next.formatted, "ACME-0003");
        // Defaults not named in the update are untouched.
        assert_eq!(settings.default_tax_rate_bps(), 500);
        assert_eq!(settings.default_payment_terms_days(), 30);
    }

    #[test]
    fn allocation_before_initialization_looks_absent() {
        let settings_id = AccountSettingsId::new(AggregateId::new());
        let settings = AccountSettings::empty(settings_id);

        let err = settings
            .handle(&AccountSettingsCommand::AllocateInvoiceNumber(
                AllocateInvoiceNumber {
                    account_id: AccountId::new(),
                    settings_id,
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn other_account_settings_look_absent() {
        let account_id = AccountId::new();
        let settings = initialized(account_id);

        let err = settings
            .handle(&AccountSettingsCommand::AllocateInvoiceNumber(
                AllocateInvoiceNumber {
                    account_id: AccountId::new(),
                    settings_id: settings.id_typed(),
                    occurred_at: test_time(),
                },
            ))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    proptest! {
        /// Property: any number of sequential allocations yields unique,
        /// strictly increasing numbers with no reuse.
        #[test]
        fn allocations_are_unique_and_strictly_increasing(count in 1usize..64) {
            let account_id = AccountId::new();
            let mut settings = initialized(account_id);

            let mut previous = 0u32;
            for _ in 0..count {
                let allocated = allocate(&mut settings, account_id);
                prop_assert!(allocated.number > previous);
                prop_assert_eq!(allocated.number, previous + 1);
                previous = allocated.number;
            }
        }
    }
}
