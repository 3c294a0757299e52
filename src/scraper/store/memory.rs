use super::{LeaseRecord, PersistentStore, PurgeReport, StoreResult, StoredEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Process-local store. Leases only exclude tasks of this process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    leases: DashMap<String, LeaseRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_entry(&self, key: &str) -> StoreResult<Option<StoredEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_entry(&self, entry: &StoredEntry) -> StoreResult<bool> {
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(mut existing) => {
                if entry.written_at >= existing.get().written_at {
                    existing.insert(entry.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn delete_entry(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_expired_entry(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(())
    }

    async fn try_insert_lease(&self, lease: &LeaseRecord, now: DateTime<Utc>) -> StoreResult<bool> {
        match self.leases.entry(lease.key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    existing.insert(lease.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
                Ok(true)
            }
        }
    }

    async fn get_lease(&self, key: &str) -> StoreResult<Option<LeaseRecord>> {
        Ok(self.leases.get(key).map(|lease| lease.value().clone()))
    }

    async fn delete_lease(&self, key: &str, holder: &str) -> StoreResult<bool> {
        Ok(self
            .leases
            .remove_if(key, |_, lease| lease.holder == holder)
            .is_some())
    }

    async fn delete_expired_lease(&self, key: &str, now: DateTime<Utc>) -> StoreResult<()> {
        self.leases.remove_if(key, |_, lease| lease.is_expired(now));
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let entries_before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let leases_before = self.leases.len();
        self.leases.retain(|_, lease| !lease.is_expired(now));

        Ok(PurgeReport {
            entries: entries_before.saturating_sub(self.entries.len()) as u64,
            leases: leases_before.saturating_sub(self.leases.len()) as u64,
        })
    }

    async fn close(&self) {}
}
