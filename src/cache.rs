//! Known-employee registrations, fetched once per import screen.

use std::collections::HashSet;

use tracing::debug;

use crate::error::StoreError;
use crate::store::{self, RecordStore};

/// Lazily filled set of registrations present in the employee table.
///
/// Membership may be stale within one session; [`RegistrationCache::invalidate`]
/// forces the next lookup to hit the store.
#[derive(Debug, Default)]
pub struct RegistrationCache {
    known: Option<HashSet<u64>>,
}

impl RegistrationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.known.is_some()
    }

    /// Cached set, fetching it first when empty.
    ///
    /// # Errors
    ///
    /// Propagates store failures; nothing is cached then.
    pub async fn get_or_fetch<S: RecordStore + ?Sized>(&mut self, store: &S) -> Result<&HashSet<u64>, StoreError> {
        if self.known.is_none() {
            let fetched = store::fetch_registrations(store).await?;
            debug!(registrations = fetched.len(), "registration cache filled");
            self.known = Some(fetched);
        }
        Ok(self.known.get_or_insert_with(HashSet::new))
    }

    pub fn invalidate(&mut self) {
        self.known = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, EMPLOYEE_TABLE};
    use serde_json::json;

    #[tokio::test]
    async fn fetches_once_until_invalidated() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, vec![json!({"registration": 1})]);
        let mut cache = RegistrationCache::new();
        assert!(!cache.is_cached());
        assert!(cache.get_or_fetch(&store).await.unwrap().contains(&1));

        store.insert(EMPLOYEE_TABLE, vec![json!({"registration": 2})]).await.unwrap();
        assert!(!cache.get_or_fetch(&store).await.unwrap().contains(&2));

        cache.invalidate();
        assert!(cache.get_or_fetch(&store).await.unwrap().contains(&2));
    }
}
