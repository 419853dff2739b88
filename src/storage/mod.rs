//! Storage layer for archetype state
//!
//! Everything persists through a per-record key-value flag store. Writes
//! that belong together are staged into a [`FlagBatch`] and committed in one
//! call, so a class never ends up with a backup but no application record
//! (or a new slot sequence without either).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OverlayError, Result};

pub mod items;
pub mod memory;
pub mod repo;
pub mod sqlite;
pub mod tx;

pub use items::StoreItemFactory;
pub use memory::MemoryFlagStore;
pub use repo::{
    ActorTracking, ApplicationRecord, Backup, Change, ClassCommit, ClassLifecycle,
    ClassRepository, ClassState,
};
pub use sqlite::SqliteFlagStore;
pub use tx::{ClassLocks, StagedCommit, TxPhase};

/// Key under which every class scope keeps its commit revision.
pub const REVISION_KEY: &str = "revision";

/// Record a flag belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Scope {
    Actor { actor: String },
    Class { actor: String, class: String },
}

impl Scope {
    pub fn actor(actor: impl Into<String>) -> Self {
        Self::Actor {
            actor: actor.into(),
        }
    }

    pub fn class(actor: impl Into<String>, class: impl Into<String>) -> Self {
        Self::Class {
            actor: actor.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor { actor } => write!(f, "actor:{actor}"),
            Self::Class { actor, class } => write!(f, "class:{actor}/{class}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FlagWrite {
    Set { scope: Scope, key: String, value: Value },
    Unset { scope: Scope, key: String },
}

/// Optimistic concurrency check: the scope's revision must still be
/// `expected` when the batch commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionGuard {
    pub scope: Scope,
    pub expected: u64,
}

/// A set of flag writes applied all-or-nothing.
///
/// Every guard must hold when the batch commits; a batch that touches both a
/// class and its actor guards both revisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagBatch {
    pub writes: Vec<FlagWrite>,
    #[serde(default)]
    pub guards: Vec<RevisionGuard>,
}

impl FlagBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, scope: Scope, key: impl Into<String>, value: Value) -> Self {
        self.writes.push(FlagWrite::Set {
            scope,
            key: key.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn unset(mut self, scope: Scope, key: impl Into<String>) -> Self {
        self.writes.push(FlagWrite::Unset {
            scope,
            key: key.into(),
        });
        self
    }

    #[must_use]
    pub fn guarded(mut self, scope: Scope, expected: u64) -> Self {
        self.guards.push(RevisionGuard { scope, expected });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Per-record key-value persistence.
///
/// Values are deep-copied on every read and write; nothing handed out by a
/// store aliases its internal state.
pub trait FlagStore: Send + Sync {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>>;

    /// Keys stored in `scope` that start with `prefix`, sorted.
    fn list_keys(&self, scope: &Scope, prefix: &str) -> Result<Vec<String>>;

    /// Apply every write in `batch`, or none of them.
    fn commit(&self, batch: FlagBatch) -> Result<()>;

    fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<()> {
        self.commit(FlagBatch::new().set(scope.clone(), key, value))
    }

    fn unset(&self, scope: &Scope, key: &str) -> Result<()> {
        self.commit(FlagBatch::new().unset(scope.clone(), key))
    }
}

/// Decode a stored revision; absent means 0.
pub(crate) fn revision_of(value: Option<&Value>) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| {
            OverlayError::Serialization(format!("revision is not an unsigned integer: {value}"))
        }),
    }
}

/// Fail with `StaleRevision` when the guard does not hold.
pub(crate) fn check_guard(guard: &RevisionGuard, current: Option<&Value>) -> Result<()> {
    let found = revision_of(current)?;
    if found == guard.expected {
        Ok(())
    } else {
        Err(OverlayError::StaleRevision {
            scope: guard.scope.to_string(),
            expected: guard.expected,
            found,
        })
    }
}
