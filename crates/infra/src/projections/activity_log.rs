use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use tally_core::{AggregateId, AccountId};
use tally_events::EventEnvelope;

/// One append-only audit trail row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    /// Aggregate type the entry describes, e.g. `invoicing.invoice`.
    pub entity_type: String,
    /// Event type, e.g. `invoicing.invoice.payment_recorded`.
    pub action: String,
    pub entity_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
    /// Raw event payload, for display without another store lookup.
    pub metadata: JsonValue,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    account_id: AccountId,
    aggregate_id: AggregateId,
}

/// Account-scoped audit trail.
///
/// Unlike the other projections this one listens to every aggregate type and
/// only ever appends. Entries are kept in arrival order per account.
#[derive(Debug, Default)]
pub struct ActivityLogProjection {
    entries: RwLock<HashMap<AccountId, Vec<ActivityEntry>>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl ActivityLogProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries for an account, oldest first.
    pub fn list(&self, account_id: AccountId) -> Vec<ActivityEntry> {
        match self.entries.read() {
            Ok(entries) => entries.get(&account_id).cloned().unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) {
        let account_id = envelope.account_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let key = CursorKey {
            account_id,
            aggregate_id,
        };

        // Idempotency under at-least-once delivery.
        {
            let cursors = match self.cursors.read() {
                Ok(c) => c,
                Err(_) => return,
            };
            if seq <= *cursors.get(&key).unwrap_or(&0) {
                return;
            }
        }

        // Payloads are externally tagged enums: the single key names the
        // event variant, and `occurred_at` sits inside it.
        let action = envelope
            .payload()
            .as_object()
            .and_then(|obj| obj.keys().next())
            .cloned()
            .unwrap_or_else(|| envelope.aggregate_type().to_string());

        let occurred_at = envelope
            .payload()
            .get(&action)
            .and_then(|v| v.get("occurred_at"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);

        let entry = ActivityEntry {
            entity_type: envelope.aggregate_type().to_string(),
            action,
            entity_id: aggregate_id,
            occurred_at,
            metadata: envelope.payload().clone(),
        };

        if let Ok(mut entries) = self.entries.write() {
            entries.entry(account_id).or_default().push(entry);
        }
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(key, seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(account_id: AccountId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            account_id,
            aggregate_id,
            "invoicing.invoice",
            seq,
            json!({"InvoiceSent": {"occurred_at": "2026-01-15T10:00:00Z"}}),
        )
    }

    #[test]
    fn entries_accumulate_in_order() {
        let log = ActivityLogProjection::new();
        let account_id = AccountId::new();
        let aggregate_id = AggregateId::new();

        log.apply_envelope(&envelope(account_id, aggregate_id, 1));
        log.apply_envelope(&envelope(account_id, aggregate_id, 2));

        let entries = log.list(account_id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entity_type, "invoicing.invoice");
    }

    #[test]
    fn redelivered_envelopes_are_ignored() {
        let log = ActivityLogProjection::new();
        let account_id = AccountId::new();
        let aggregate_id = AggregateId::new();

        let env = envelope(account_id, aggregate_id, 1);
        log.apply_envelope(&env);
        log.apply_envelope(&env);

        assert_eq!(log.list(account_id).len(), 1);
    }

    #[test]
    fn accounts_do_not_see_each_others_activity() {
        let log = ActivityLogProjection::new();
        let account_a = AccountId::new();
        let account_b = AccountId::new();

        log.apply_envelope(&envelope(account_a, AggregateId::new(), 1));

        assert_eq!(log.list(account_a).len(), 1);
        assert!(log.list(account_b).is_empty());
    }
}
