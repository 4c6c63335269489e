use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use tally_clients::{ClientEvent, ClientId, ClientStatus, ContactInfo};
use tally_core::{AggregateId, AccountId};
use tally_events::EventEnvelope;

use crate::read_model::AccountStore;

use super::invoices::ProjectionError;

/// Queryable client directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub name: String,
    pub contact: ContactInfo,
    pub status: ClientStatus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    account_id: AccountId,
    aggregate_id: AggregateId,
}

/// Client directory read model fed from the event bus.
#[derive(Debug)]
pub struct ClientDirectoryProjection<S>
where
    S: AccountStore<ClientId, ClientRecord>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ClientDirectoryProjection<S>
where
    S: AccountStore<ClientId, ClientRecord>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn get_cursor(&self, account_id: AccountId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey {
                    account_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, account_id: AccountId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    account_id,
                    aggregate_id,
                },
                seq,
            );
        }
    }

    pub fn get(&self, account_id: AccountId, client_id: &ClientId) -> Option<ClientRecord> {
        self.store.get(account_id, client_id)
    }

    /// List the account's clients sorted by name.
    pub fn list(&self, account_id: AccountId) -> Vec<ClientRecord> {
        let mut rows = self.store.list(account_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "clients.client" {
            return Ok(());
        }

        let account_id = envelope.account_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(account_id, aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ClientEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_account, client_id) = match &ev {
            ClientEvent::ClientRegistered(e) => (e.account_id, e.client_id),
            ClientEvent::ClientUpdated(e) => (e.account_id, e.client_id),
            ClientEvent::ClientArchived(e) => (e.account_id, e.client_id),
        };

        if event_account != account_id {
            return Err(ProjectionError::AccountIsolation(
                "event account_id does not match envelope account_id".to_string(),
            ));
        }
        if client_id.0 != aggregate_id {
            return Err(ProjectionError::AccountIsolation(
                "event client_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            ClientEvent::ClientRegistered(e) => {
                self.store.upsert(
                    account_id,
                    e.client_id,
                    ClientRecord {
                        client_id: e.client_id,
                        name: e.name,
                        contact: e.contact,
                        status: ClientStatus::Active,
                    },
                );
            }
            ClientEvent::ClientUpdated(e) => {
                if let Some(mut record) = self.store.get(account_id, &e.client_id) {
                    record.name = e.name;
                    record.contact = e.contact;
                    self.store.upsert(account_id, e.client_id, record);
                }
            }
            ClientEvent::ClientArchived(e) => {
                if let Some(mut record) = self.store.get(account_id, &e.client_id) {
                    record.status = ClientStatus::Archived;
                    self.store.upsert(account_id, e.client_id, record);
                }
            }
        }

        self.update_cursor(account_id, aggregate_id, seq);
        Ok(())
    }
}
