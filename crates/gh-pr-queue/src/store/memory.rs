//! In-process blob store

use super::{validate_key, Blob, BlobStore, Generation, WriteCondition};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, (Vec<u8>, u64)>,
    next_generation: u64,
}

/// Blob store held in memory; share it between managers with an `Arc`
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        validate_key(key)?;
        let inner = self.lock()?;
        Ok(inner.entries.get(key).map(|(data, generation)| Blob {
            data: data.clone(),
            generation: generation.to_string(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        data: &[u8],
        condition: WriteCondition,
    ) -> Result<Generation, StoreError> {
        validate_key(key)?;
        let mut inner = self.lock()?;

        let current = inner.entries.get(key).map(|(_, g)| g.to_string());
        let holds = match (&condition, &current) {
            (WriteCondition::Any, _) => true,
            (WriteCondition::DoesNotExist, current) => current.is_none(),
            (WriteCondition::GenerationMatch(expected), Some(current)) => expected == current,
            (WriteCondition::GenerationMatch(_), None) => false,
        };
        if !holds {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner
            .entries
            .insert(key.to_string(), (data.to_vec(), generation));
        Ok(generation.to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.lock()?.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
