//! Staged commits and per-class serialization
//!
//! Every state transition of a class is staged as one [`StagedCommit`] and
//! handed to the flag store in a single call.
//!
//! ## Protocol Phases
//! 1. **Staged**: all writes collected, nothing persisted
//! 2. **Committed**: the store accepted the whole batch
//! 3. **RolledBack**: the store rejected it; nothing was persisted
//!
//! The check-then-act sequences above the store (duplicate check, backup
//! existence check) run under [`ClassLocks`] guards for the actor and the
//! class. Lock order is always actor, then class.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FlagBatch, FlagStore, Scope};
use crate::error::{OverlayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPhase {
    Staged,
    Committed,
    RolledBack,
}

/// A batch of writes for one class, identified for log correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedCommit {
    pub id: String,
    /// Operation that produced the batch (e.g. "apply", "restore").
    pub operation: String,
    pub scope: Scope,
    pub phase: TxPhase,
    pub created_at: DateTime<Utc>,
    pub batch: FlagBatch,
}

impl StagedCommit {
    pub fn stage(operation: &str, scope: Scope, batch: FlagBatch) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            scope,
            phase: TxPhase::Staged,
            created_at: Utc::now(),
            batch,
        }
    }

    /// Hand the batch to the store. On failure the phase becomes
    /// `RolledBack` and the store error is returned.
    pub fn commit(&mut self, store: &dyn FlagStore) -> Result<()> {
        if self.phase != TxPhase::Staged {
            return Err(OverlayError::TransactionFailed(format!(
                "tx {} is {:?}, not staged",
                self.id, self.phase
            )));
        }

        tracing::debug!(
            tx = %self.id,
            operation = %self.operation,
            scope = %self.scope,
            writes = self.batch.writes.len(),
            "committing staged batch"
        );

        match store.commit(self.batch.clone()) {
            Ok(()) => {
                self.phase = TxPhase::Committed;
                Ok(())
            }
            Err(err) => {
                self.phase = TxPhase::RolledBack;
                tracing::warn!(tx = %self.id, operation = %self.operation, "rolled back: {err}");
                Err(err)
            }
        }
    }
}

/// One mutex per (actor, class) and one per actor, created on first use.
#[derive(Debug, Default)]
pub struct ClassLocks {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    actors: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClassLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the class's lock; callers hold `handle.lock()` for
    /// the duration of a transition.
    pub fn handle(&self, actor: &str, class: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry((actor.to_string(), class.to_string()))
                .or_default(),
        )
    }

    /// Shared handle to the actor's lock, taken before any of its classes'.
    pub fn actor_handle(&self, actor: &str) -> Arc<Mutex<()>> {
        let mut actors = self.actors.lock();
        Arc::clone(actors.entry(actor.to_string()).or_default())
    }

    /// Number of classes that have been locked at least once.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}
