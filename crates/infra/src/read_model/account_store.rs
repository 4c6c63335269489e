use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tally_core::AccountId;

/// Account-isolated key/value store abstraction for disposable read models.
pub trait AccountStore<K, V>: Send + Sync {
    fn get(&self, account_id: AccountId, key: &K) -> Option<V>;
    fn upsert(&self, account_id: AccountId, key: K, value: V);
    fn remove(&self, account_id: AccountId, key: &K);
    fn list(&self, account_id: AccountId) -> Vec<V>;
    /// Clear all read-model records for an account (rebuild support).
    fn clear_account(&self, account_id: AccountId);
}

impl<K, V, S> AccountStore<K, V> for Arc<S>
where
    S: AccountStore<K, V> + ?Sized,
{
    fn get(&self, account_id: AccountId, key: &K) -> Option<V> {
        (**self).get(account_id, key)
    }

    fn upsert(&self, account_id: AccountId, key: K, value: V) {
        (**self).upsert(account_id, key, value)
    }

    fn remove(&self, account_id: AccountId, key: &K) {
        (**self).remove(account_id, key)
    }

    fn list(&self, account_id: AccountId) -> Vec<V> {
        (**self).list(account_id)
    }

    fn clear_account(&self, account_id: AccountId) {
        (**self).clear_account(account_id)
    }
}

/// In-memory account-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryAccountStore<K, V> {
    inner: RwLock<HashMap<(AccountId, K), V>>,
}

impl<K, V> InMemoryAccountStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryAccountStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> AccountStore<K, V> for InMemoryAccountStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, account_id: AccountId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(account_id, key.clone())).cloned()
    }

    fn upsert(&self, account_id: AccountId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((account_id, key), value);
        }
    }

    fn remove(&self, account_id: AccountId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(account_id, key.clone()));
        }
    }

    fn list(&self, account_id: AccountId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((a, _k), v)| if *a == account_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_account(&self, account_id: AccountId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(a, _k), _v| *a != account_id);
        }
    }
}
