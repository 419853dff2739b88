//! Typed archetype state on top of the flag store.
//!
//! A class scope holds four keys: the live slot sequence, the one-time
//! backup, the application record and a revision counter. The owning actor's
//! scope holds the per-tag tracking map and its own revision counter, since
//! every class of the actor rewrites that map. [`ClassRepository::commit`]
//! writes all of them in one batch guarded on both revisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::tx::StagedCommit;
use super::{FlagBatch, FlagStore, REVISION_KEY, Scope, revision_of};
use crate::core::types::{ClassRef, FeatureSlot, ParsedArchetype};
use crate::error::{OverlayError, Result};
use crate::ports::ItemRef;

pub const SLOTS_KEY: &str = "slots";
pub const BACKUP_KEY: &str = "archetype_backup";
pub const RECORD_KEY: &str = "archetype_record";
pub const TRACKING_KEY: &str = "archetypes";

/// Snapshot of a class's slots taken before the first archetype was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub slots: Vec<FeatureSlot>,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    #[must_use]
    pub fn capture(slots: &[FeatureSlot]) -> Self {
        Self {
            slots: slots.to_vec(),
            created_at: Utc::now(),
        }
    }

    /// SHA-256 of the canonical JSON encoding.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Per-class metadata about applied archetypes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub applied_slugs: Vec<String>,
    pub applied_at: DateTime<Utc>,
    pub last_applied_archetype: ParsedArchetype,
    /// Every applied archetype in application order.
    #[serde(default)]
    pub history: Vec<ParsedArchetype>,
    /// Derived item copies created for modified features, by archetype slug.
    #[serde(default)]
    pub derived_items: BTreeMap<String, Vec<ItemRef>>,
}

impl ApplicationRecord {
    #[must_use]
    pub fn contains(&self, slug: &str) -> bool {
        self.applied_slugs.iter().any(|s| s == slug)
    }

    /// Append one applied archetype.
    pub fn push(&mut self, archetype: &ParsedArchetype, applied_at: DateTime<Utc>) {
        self.applied_slugs.push(archetype.slug.clone());
        self.history.push(archetype.clone());
        self.last_applied_archetype = archetype.clone();
        self.applied_at = applied_at;
    }

    /// Build a record from an ordered, non-empty list of archetypes.
    #[must_use]
    pub fn from_history(history: &[ParsedArchetype], applied_at: DateTime<Utc>) -> Option<Self> {
        let (first, rest) = history.split_first()?;
        let mut record = Self {
            applied_slugs: vec![first.slug.clone()],
            applied_at,
            last_applied_archetype: first.clone(),
            history: vec![first.clone()],
            derived_items: BTreeMap::new(),
        };
        for archetype in rest {
            record.push(archetype, applied_at);
        }
        Some(record)
    }
}

/// Actor-level map of class tag to applied slugs.
pub type ActorTracking = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClassLifecycle {
    Pristine,
    Archetyped { applied: Vec<String> },
}

/// Everything persisted for one class, as read at `revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassState {
    pub slots: Vec<FeatureSlot>,
    pub backup: Option<Backup>,
    pub record: Option<ApplicationRecord>,
    pub tracking: ActorTracking,
    pub revision: u64,
    /// Revision of the owning actor's scope when `tracking` was read.
    pub actor_revision: u64,
}

impl ClassState {
    #[must_use]
    pub fn applied_slugs(&self) -> &[String] {
        match &self.record {
            Some(record) => &record.applied_slugs,
            None => &[],
        }
    }

    #[must_use]
    pub fn is_applied(&self, slug: &str) -> bool {
        self.record.as_ref().is_some_and(|r| r.contains(slug))
    }

    #[must_use]
    pub fn history(&self) -> &[ParsedArchetype] {
        match &self.record {
            Some(record) => &record.history,
            None => &[],
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> ClassLifecycle {
        if self.backup.is_some() {
            ClassLifecycle::Archetyped {
                applied: self.applied_slugs().to_vec(),
            }
        } else {
            ClassLifecycle::Pristine
        }
    }
}

/// What a commit does to one stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    Keep,
    Put(T),
    Clear,
}

/// Staged next state of a class.
#[derive(Debug, Clone)]
pub struct ClassCommit {
    pub class: ClassRef,
    pub expected_revision: u64,
    pub expected_actor_revision: u64,
    pub slots: Option<Vec<FeatureSlot>>,
    pub backup: Change<Backup>,
    pub record: Change<ApplicationRecord>,
    pub tracking: Change<ActorTracking>,
}

impl ClassCommit {
    #[must_use]
    pub fn new(class: &ClassRef, expected_revision: u64) -> Self {
        Self {
            class: class.clone(),
            expected_revision,
            expected_actor_revision: 0,
            slots: None,
            backup: Change::Keep,
            record: Change::Keep,
            tracking: Change::Keep,
        }
    }

    /// Commit on top of `state`, guarded on both revisions it was read at.
    #[must_use]
    pub fn for_state(class: &ClassRef, state: &ClassState) -> Self {
        Self {
            expected_actor_revision: state.actor_revision,
            ..Self::new(class, state.revision)
        }
    }

    fn into_batch(self) -> Result<FlagBatch> {
        let class_scope = ClassRepository::class_scope(&self.class);
        let actor_scope = Scope::actor(self.class.actor_id.as_str());
        let mut batch = FlagBatch::new().guarded(class_scope.clone(), self.expected_revision);

        if let Some(slots) = self.slots {
            batch = batch.set(class_scope.clone(), SLOTS_KEY, serde_json::to_value(slots)?);
        }
        batch = stage_change(batch, &class_scope, BACKUP_KEY, self.backup)?;
        batch = stage_change(batch, &class_scope, RECORD_KEY, self.record)?;
        if !matches!(self.tracking, Change::Keep) {
            batch = batch
                .guarded(actor_scope.clone(), self.expected_actor_revision)
                .set(
                    actor_scope.clone(),
                    REVISION_KEY,
                    Value::from(self.expected_actor_revision + 1),
                );
        }
        batch = stage_change(batch, &actor_scope, TRACKING_KEY, self.tracking)?;
        Ok(batch.set(
            class_scope,
            REVISION_KEY,
            Value::from(self.expected_revision + 1),
        ))
    }
}

fn stage_change<T: Serialize>(
    batch: FlagBatch,
    scope: &Scope,
    key: &str,
    change: Change<T>,
) -> Result<FlagBatch> {
    Ok(match change {
        Change::Keep => batch,
        Change::Put(value) => batch.set(scope.clone(), key, serde_json::to_value(value)?),
        Change::Clear => batch.unset(scope.clone(), key),
    })
}

/// Typed access to class and actor archetype flags.
#[derive(Clone)]
pub struct ClassRepository {
    store: Arc<dyn FlagStore>,
}

impl ClassRepository {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &dyn FlagStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn class_scope(class: &ClassRef) -> Scope {
        Scope::class(class.actor_id.as_str(), class.id.as_str())
    }

    fn read<T: DeserializeOwned>(&self, scope: &Scope, key: &str) -> Result<Option<T>> {
        self.store
            .get(scope, key)?
            .map(|value| {
                serde_json::from_value(value).map_err(|err| {
                    OverlayError::Serialization(format!("decode {scope} {key}: {err}"))
                })
            })
            .transpose()
    }

    pub fn load(&self, class: &ClassRef) -> Result<ClassState> {
        let scope = Self::class_scope(class);
        let actor_scope = Scope::actor(class.actor_id.as_str());
        let revision = revision_of(self.store.get(&scope, REVISION_KEY)?.as_ref())?;
        // Read the actor revision before the map so a concurrent writer can
        // only make the guard fail, never slip past it.
        let actor_revision = revision_of(self.store.get(&actor_scope, REVISION_KEY)?.as_ref())?;
        Ok(ClassState {
            slots: self.read(&scope, SLOTS_KEY)?.unwrap_or_default(),
            backup: self.read(&scope, BACKUP_KEY)?,
            record: self.read(&scope, RECORD_KEY)?,
            tracking: self.read(&actor_scope, TRACKING_KEY)?.unwrap_or_default(),
            revision,
            actor_revision,
        })
    }

    /// Write `commit` in a single guarded batch and return the new revision.
    pub fn commit(&self, operation: &str, commit: ClassCommit) -> Result<u64> {
        let scope = Self::class_scope(&commit.class);
        let next_revision = commit.expected_revision + 1;
        let mut staged = StagedCommit::stage(operation, scope, commit.into_batch()?);
        staged.commit(self.store.as_ref())?;
        Ok(next_revision)
    }

    /// Seed or replace the slot sequence of a class that has no archetype.
    pub fn register_class(&self, class: &ClassRef, slots: Vec<FeatureSlot>) -> Result<u64> {
        let state = self.load(class)?;
        if state.backup.is_some() {
            return Err(OverlayError::ValidationFailed(format!(
                "class {} has archetypes applied; restore it before replacing its features",
                class.name
            )));
        }
        let mut commit = ClassCommit::for_state(class, &state);
        commit.slots = Some(slots);
        self.commit("register", commit)
    }
}
