//! In-process flag store

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;

use super::{FlagBatch, FlagStore, FlagWrite, REVISION_KEY, Scope, check_guard};
use crate::error::Result;

/// Flag store backed by an ordered map. Batches commit under one write lock.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: RwLock<BTreeMap<(Scope, String), Value>>,
}

impl MemoryFlagStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored flags across all scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.read().is_empty()
    }

    /// Keys present in `scope`, sorted.
    #[must_use]
    pub fn keys(&self, scope: &Scope) -> Vec<String> {
        self.flags
            .read()
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>> {
        Ok(self
            .flags
            .read()
            .get(&(scope.clone(), key.to_string()))
            .cloned())
    }

    fn list_keys(&self, scope: &Scope, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys(scope)
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    fn commit(&self, batch: FlagBatch) -> Result<()> {
        let mut flags = self.flags.write();
        for guard in &batch.guards {
            let current = flags.get(&(guard.scope.clone(), REVISION_KEY.to_string()));
            check_guard(guard, current)?;
        }
        for write in batch.writes {
            match write {
                FlagWrite::Set { scope, key, value } => {
                    flags.insert((scope, key), value);
                }
                FlagWrite::Unset { scope, key } => {
                    flags.remove(&(scope, key));
                }
            }
        }
        Ok(())
    }
}
