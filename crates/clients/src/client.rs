use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Aggregate, AggregateId, AggregateRoot, AccountId, DomainError};
use tally_events::Event;

/// Maximum accepted client name length.
const MAX_NAME_LEN: usize = 200;

/// Client identifier (account-scoped via `account_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub AggregateId);

impl ClientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Client status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Archived,
}

/// Contact information for a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Aggregate root: Client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    id: ClientId,
    account_id: Option<AccountId>,
    name: String,
    contact: ContactInfo,
    status: ClientStatus,
    version: u64,
    created: bool,
}

impl Client {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ClientId) -> Self {
        Self {
            id,
            account_id: None,
            name: String::new(),
            contact: ContactInfo::default(),
            status: ClientStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ClientId {
        self.id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Invariant helper: archived clients cannot be billed or edited.
    pub fn can_transact(&self) -> bool {
        self.status == ClientStatus::Active
    }
}

impl AggregateRoot for Client {
    type Id = ClientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterClient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterClient {
    pub account_id: AccountId,
    pub client_id: ClientId,
    pub name: String,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateClient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateClient {
    pub account_id: AccountId,
    pub client_id: ClientId,
    /// Optional new name (if None, keep existing).
    pub name: Option<String>,
    /// Optional new contact info (if None, keep existing).
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveClient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveClient {
    pub account_id: AccountId,
    pub client_id: ClientId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientCommand {
    RegisterClient(RegisterClient),
    UpdateClient(UpdateClient),
    ArchiveClient(ArchiveClient),
}

/// Event: ClientRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistered {
    pub account_id: AccountId,
    pub client_id: ClientId,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClientUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientUpdated {
    pub account_id: AccountId,
    pub client_id: ClientId,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClientArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientArchived {
    pub account_id: AccountId,
    pub client_id: ClientId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    ClientRegistered(ClientRegistered),
    ClientUpdated(ClientUpdated),
    ClientArchived(ClientArchived),
}

impl Event for ClientEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ClientRegistered(_) => "clients.client.registered",
            ClientEvent::ClientUpdated(_) => "clients.client.updated",
            ClientEvent::ClientArchived(_) => "clients.client.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ClientEvent::ClientRegistered(e) => e.occurred_at,
            ClientEvent::ClientUpdated(e) => e.occurred_at,
            ClientEvent::ClientArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Client {
    type Command = ClientCommand;
    type Event = ClientEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ClientEvent::ClientRegistered(e) => {
                self.id = e.client_id;
                self.account_id = Some(e.account_id);
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.status = ClientStatus::Active;
                self.created = true;
            }
            ClientEvent::ClientUpdated(e) => {
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            ClientEvent::ClientArchived(_) => {
                self.status = ClientStatus::Archived;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ClientCommand::RegisterClient(cmd) => self.handle_register(cmd),
            ClientCommand::UpdateClient(cmd) => self.handle_update(cmd),
            ClientCommand::ArchiveClient(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Client {
    fn ensure_account(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.account_id != Some(account_id) {
            // Other-account aggregates must look absent.
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn validate_name(name: &str) -> Result<(), DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::validation("client name must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "client name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterClient) -> Result<Vec<ClientEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("client already exists"));
        }
        Self::validate_name(&cmd.name)?;

        Ok(vec![ClientEvent::ClientRegistered(ClientRegistered {
            account_id: cmd.account_id,
            client_id: cmd.client_id,
            name: cmd.name.clone(),
            contact: cmd.contact.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateClient) -> Result<Vec<ClientEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_account(cmd.account_id)?;

        if !self.can_transact() {
            return Err(DomainError::forbidden(
                "archived clients cannot be updated",
            ));
        }

        let name = match &cmd.name {
            Some(n) => {
                Self::validate_name(n)?;
                n.clone()
            }
            None => self.name.clone(),
        };
        let contact = cmd.contact.clone().unwrap_or_else(|| self.contact.clone());

        Ok(vec![ClientEvent::ClientUpdated(ClientUpdated {
            account_id: cmd.account_id,
            client_id: cmd.client_id,
            name,
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveClient) -> Result<Vec<ClientEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_account(cmd.account_id)?;

        if self.status == ClientStatus::Archived {
            return Err(DomainError::forbidden("client is already archived"));
        }

        Ok(vec![ClientEvent::ClientArchived(ClientArchived {
            account_id: cmd.account_id,
            client_id: cmd.client_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::AggregateId;

    fn test_account_id() -> AccountId {
        AccountId::new()
    }

    fn test_client_id() -> ClientId {
        ClientId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn registered_client(account_id: AccountId, client_id: ClientId) -> Client {
        let mut client = Client::empty(client_id);
        let events = client
            .handle(&ClientCommand::RegisterClient(RegisterClient {
                account_id,
                client_id,
                name: "Acme Studio".to_string(),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        client.apply(&events[0]);
        client
    }

    #[test]
    fn register_emits_client_registered() {
        let client = Client::empty(test_client_id());
        let account_id = test_account_id();
        let client_id = test_client_id();

        let events = client
            .handle(&ClientCommand::RegisterClient(RegisterClient {
                account_id,
                client_id,
                name: "Acme Studio".to_string(),
                contact: Some(ContactInfo {
                    email: Some("hello@acme.test".to_string()),
                    ..ContactInfo::default()
                }),
                occurred_at: test_time(),
            }))
            .unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            ClientEvent::ClientRegistered(e) => {
                assert_eq!(e.account_id, account_id);
                assert_eq!(e.client_id, client_id);
                assert_eq!(e.name, "Acme Studio");
            }
            _ => panic!("expected ClientRegistered event"),
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let client = Client::empty(test_client_id());
        let err = client
            .handle(&ClientCommand::RegisterClient(RegisterClient {
                account_id: test_account_id(),
                client_id: test_client_id(),
                name: "   ".to_string(),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn archived_client_cannot_be_updated() {
        let account_id = test_account_id();
        let client_id = test_client_id();
        let mut client = registered_client(account_id, client_id);

        let events = client
            .handle(&ClientCommand::ArchiveClient(ArchiveClient {
                account_id,
                client_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        client.apply(&events[0]);
        assert_eq!(client.status(), ClientStatus::Archived);

        let err = client
            .handle(&ClientCommand::UpdateClient(UpdateClient {
                account_id,
                client_id,
                name: Some("New Name".to_string()),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::ForbiddenTransition(_)));
    }

    #[test]
    fn other_account_looks_absent() {
        let account_id = test_account_id();
        let client_id = test_client_id();
        let client = registered_client(account_id, client_id);

        let err = client
            .handle(&ClientCommand::UpdateClient(UpdateClient {
                account_id: test_account_id(),
                client_id,
                name: Some("Intruder".to_string()),
                contact: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn update_keeps_unspecified_fields() {
        let account_id = test_account_id();
        let client_id = test_client_id();
        let mut client = registered_client(account_id, client_id);

        let events = client
            .handle(&ClientCommand::UpdateClient(UpdateClient {
                account_id,
                client_id,
                name: None,
                contact: Some(ContactInfo {
                    phone: Some("555-0101".to_string()),
                    ..ContactInfo::default()
                }),
                occurred_at: test_time(),
            }))
            .unwrap();
        client.apply(&events[0]);

        assert_eq!(client.name(), "Acme Studio");
        assert_eq!(client.contact().phone.as_deref(), Some("555-0101"));
    }
}
