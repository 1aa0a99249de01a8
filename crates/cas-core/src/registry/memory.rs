//! In-process ticket store.
//!
//! Conditional operations run under the write lock, so check-and-set is
//! atomic for every task in the process. Suitable for single-node
//! deployments and tests.

use super::{RegistryError, StoredTicket, TicketStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    records: RwLock<HashMap<String, StoredTicket>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, mut record: StoredTicket) -> Result<u64, RegistryError> {
        let mut records = self.records.write().await;
        let version = records.get(&record.key).map_or(1, |r| r.version + 1);
        record.version = version;
        records.insert(record.key.clone(), record);
        Ok(version)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredTicket>, RegistryError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn remove_all(&self) -> Result<u64, RegistryError> {
        let mut records = self.records.write().await;
        let count = records.len() as u64;
        records.clear();
        Ok(count)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: StoredTicket,
    ) -> Result<Option<u64>, RegistryError> {
        let mut records = self.records.write().await;
        match records.get(&record.key) {
            Some(current) if current.version == expected_version => {
                let version = expected_version + 1;
                record.version = version;
                records.insert(record.key.clone(), record);
                Ok(Some(version))
            }
            _ => Ok(None),
        }
    }

    async fn compare_and_remove(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<bool, RegistryError> {
        let mut records = self.records.write().await;
        match records.get(key) {
            Some(current) if current.version == expected_version => {
                records.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan(
        &self,
        from: usize,
        count: Option<usize>,
    ) -> Result<Vec<StoredTicket>, RegistryError> {
        let records = self.records.read().await;
        let mut all: Vec<&StoredTicket> = records.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));

        let page = all.into_iter().skip(from).cloned();
        Ok(match count {
            Some(count) => page.take(count).collect(),
            None => page.collect(),
        })
    }
}
