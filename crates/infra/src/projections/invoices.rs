use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use tally_clients::ClientId;
use tally_core::{AggregateId, AccountId};
use tally_events::EventEnvelope;
use tally_invoicing::{InvoiceEvent, InvoiceId, InvoiceStatus};

use crate::read_model::AccountStore;

/// Queryable invoice list entry.
///
/// `status` is the stored status; [`InvoiceSummary::effective_status`] layers
/// the overdue derivation on top at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSummary {
    pub invoice_id: InvoiceId,
    pub client_id: ClientId,
    pub number: String,
    pub status: InvoiceStatus,
    pub subtotal: u64,
    pub tax_amount: u64,
    pub total: u64,
    pub amount_paid: u64,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl InvoiceSummary {
    pub fn balance(&self) -> u64 {
        self.total.saturating_sub(self.amount_paid)
    }

    /// Same derivation the aggregate uses: unsettled and past due reads as
    /// overdue.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        let unsettled = matches!(
            self.status,
            InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::Partial
        );
        if unsettled && self.due_date < now {
            InvoiceStatus::Overdue
        } else {
            self.status
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    account_id: AccountId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),
    #[error("account isolation violation: {0}")]
    AccountIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Invoice list read model fed from the event bus.
///
/// Idempotent: each stream position is applied at most once, tracked by a
/// per-stream cursor, so at-least-once delivery from the bus is safe.
/// Deleted invoices are dropped from the store entirely.
#[derive(Debug)]
pub struct InvoiceListProjection<S>
where
    S: AccountStore<InvoiceId, InvoiceSummary>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> InvoiceListProjection<S>
where
    S: AccountStore<InvoiceId, InvoiceSummary>,
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

    fn clear_cursors(&self, account_id: AccountId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.account_id != account_id);
        }
    }

    pub fn get(&self, account_id: AccountId, invoice_id: &InvoiceId) -> Option<InvoiceSummary> {
        self.store.get(account_id, invoice_id)
    }

    /// List the account's invoices with the overdue derivation applied,
    /// sorted by issue date.
    ///
    /// Issue date, not the number string: "INV-10000" sorts before "INV-9999"
    /// lexicographically, so the formatted number is only a tiebreaker.
    pub fn list(&self, account_id: AccountId, now: DateTime<Utc>) -> Vec<InvoiceSummary> {
        let mut rows: Vec<InvoiceSummary> = self
            .store
            .list(account_id)
            .into_iter()
            .map(|mut summary| {
                summary.status = summary.effective_status(now);
                summary
            })
            .collect();
        rows.sort_by(|a, b| {
            a.issue_date
                .cmp(&b.issue_date)
                .then_with(|| a.number.cmp(&b.number))
        });
        rows
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != "invoicing.invoice" {
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
            // Redelivery; already applied.
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_account, invoice_id) = match &ev {
            InvoiceEvent::InvoiceCreated(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::InvoiceEdited(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::InvoiceSent(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::InvoiceViewed(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::PaymentRecorded(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::InvoiceCancelled(e) => (e.account_id, e.invoice_id),
            InvoiceEvent::InvoiceDeleted(e) => (e.account_id, e.invoice_id),
        };

        if event_account != account_id {
            return Err(ProjectionError::AccountIsolation(
                "event account_id does not match envelope account_id".to_string(),
            ));
        }
        if invoice_id.0 != aggregate_id {
            return Err(ProjectionError::AccountIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceCreated(e) => {
                self.store.upsert(
                    account_id,
                    e.invoice_id,
                    InvoiceSummary {
                        invoice_id: e.invoice_id,
                        client_id: e.client_id,
                        number: e.number,
                        status: InvoiceStatus::Draft,
                        subtotal: e.subtotal,
                        tax_amount: e.tax_amount,
                        total: e.total,
                        amount_paid: 0,
                        issue_date: e.issue_date,
                        due_date: e.due_date,
                    },
                );
            }
            InvoiceEvent::InvoiceEdited(e) => {
                if let Some(mut summary) = self.store.get(account_id, &e.invoice_id) {
                    summary.subtotal = e.subtotal;
                    summary.tax_amount = e.tax_amount;
                    summary.total = e.total;
                    summary.due_date = e.due_date;
                    self.store.upsert(account_id, e.invoice_id, summary);
                }
            }
            InvoiceEvent::InvoiceSent(e) => {
                if let Some(mut summary) = self.store.get(account_id, &e.invoice_id) {
                    summary.status = InvoiceStatus::Sent;
                    self.store.upsert(account_id, e.invoice_id, summary);
                }
            }
            InvoiceEvent::InvoiceViewed(e) => {
                if let Some(mut summary) = self.store.get(account_id, &e.invoice_id) {
                    if summary.status == InvoiceStatus::Sent {
                        summary.status = InvoiceStatus::Viewed;
                    }
                    self.store.upsert(account_id, e.invoice_id, summary);
                }
            }
            InvoiceEvent::PaymentRecorded(e) => {
                if let Some(mut summary) = self.store.get(account_id, &e.invoice_id) {
                    summary.amount_paid = e.new_amount_paid;
                    summary.status = e.new_status;
                    self.store.upsert(account_id, e.invoice_id, summary);
                }
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                if let Some(mut summary) = self.store.get(account_id, &e.invoice_id) {
                    summary.status = InvoiceStatus::Cancelled;
                    self.store.upsert(account_id, e.invoice_id, summary);
                }
            }
            InvoiceEvent::InvoiceDeleted(e) => {
                self.store.remove(account_id, &e.invoice_id);
            }
        }

        self.update_cursor(account_id, aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut accounts = envs.iter().map(|e| e.account_id()).collect::<Vec<_>>();
            accounts.sort_by_key(|a| *a.as_uuid().as_bytes());
            accounts.dedup();
            for a in accounts {
                self.store.clear_account(a);
                self.clear_cursors(a);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.account_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tally_invoicing::InvoiceCreated;
    use uuid::Uuid;

    use crate::read_model::InMemoryAccountStore;

    fn created_envelope(
        account_id: AccountId,
        number: &str,
        seq_offset_days: i64,
    ) -> EventEnvelope<JsonValue> {
        let invoice_id = InvoiceId::new(AggregateId::new());
        let issue_date = Utc::now() + Duration::days(seq_offset_days);
        let event = InvoiceEvent::InvoiceCreated(InvoiceCreated {
            account_id,
            invoice_id,
            client_id: ClientId::new(AggregateId::new()),
            project_id: None,
            number: number.to_string(),
            line_items: vec![],
            tax_rate_bps: 0,
            discount: 0,
            subtotal: 10_000,
            tax_amount: 0,
            total: 10_000,
            issue_date,
            due_date: issue_date + Duration::days(30),
            notes: None,
            occurred_at: issue_date,
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            account_id,
            invoice_id.0,
            "invoicing.invoice",
            1,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn list_keeps_issue_order_past_four_digit_numbers() {
        let projection = InvoiceListProjection::new(InMemoryAccountStore::new());
        let account_id = AccountId::new();

        // Issued in sequence order; the number strings alone would sort
        // "INV-10000" before "INV-9999".
        projection
            .apply_envelope(&created_envelope(account_id, "INV-9999", 0))
            .unwrap();
        projection
            .apply_envelope(&created_envelope(account_id, "INV-10000", 1))
            .unwrap();

        let rows = projection.list(account_id, Utc::now());
        let numbers: Vec<&str> = rows.iter().map(|r| r.number.as_str()).collect();
        assert_eq!(numbers, vec!["INV-9999", "INV-10000"]);
    }
}
