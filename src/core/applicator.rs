//! Applicator: the per-class archetype state machine
//!
//! A class is `Pristine` until the first archetype is applied, which writes
//! its one and only backup. Further applies stack on top; `restore` returns
//! the class to `Pristine` and `remove` replays the remaining stack from the
//! backup.
//!
//! Every transition runs under the actor's and the class's locks from
//! [`ClassLocks`], reads the class at a revision and commits one guarded
//! batch. Expected outcomes
//! (permission, duplicates, missing backup, conflicts) come back as a
//! [`Rejection`]; they are never errors.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::conflict::{CanApply, Conflict, check_can_apply, validate_stacking};
use super::diff::{
    ChangeSummary, DiffEntry, DiffStatus, UnresolvedTarget, build_next_slots, generate_diff,
    unresolved_targets,
};
use super::types::{ActorRef, ClassRef, FeatureSlot, ParsedArchetype};
use crate::config::{ApplicatorConfig, TrackingScope};
use crate::error::Result;
use crate::ports::{DerivedItemFactory, DerivedItemSpec, ItemRef, NotificationSink, PermissionOracle};
use crate::storage::{
    ActorTracking, ApplicationRecord, Backup, Change, ClassCommit, ClassLifecycle,
    ClassLocks, ClassRepository, ClassState, FlagStore,
};

/// Why a transition did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("{slug} is already applied")]
    AlreadyApplied { slug: String },

    #[error("No backup found")]
    NoBackupFound,

    #[error("{slug} is not applied")]
    NotApplied { slug: String },

    #[error("Nothing to apply")]
    EmptyBatch,

    #[error("{} conflicting feature(s)", conflicts.len())]
    Conflicts { conflicts: Vec<Conflict> },

    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },
}

impl Rejection {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::AlreadyApplied { .. } => "already_applied",
            Self::NoBackupFound => "no_backup_found",
            Self::NotApplied { .. } => "not_applied",
            Self::EmptyBatch => "empty_batch",
            Self::Conflicts { .. } => "conflicts",
            Self::PersistenceFailure { .. } => "persistence_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Slugs committed by this call, in application order.
    pub slugs: Vec<String>,
    pub revision: u64,
    pub backup_created: bool,
    pub slot_count: usize,
    pub summary: ChangeSummary,
    pub derived_items: Vec<ItemRef>,
    pub unresolved: Vec<UnresolvedTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied(ApplyReport),
    Rejected(Rejection),
}

impl ApplyOutcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Applied(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub success: bool,
    pub restored_count: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
}

impl RestoreOutcome {
    fn failed(rejection: Rejection) -> Self {
        Self {
            success: false,
            restored_count: 0,
            message: rejection.to_string(),
            rejection: Some(rejection),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveReport {
    pub slug: String,
    /// Slugs still applied after the removal.
    pub remaining: Vec<String>,
    pub revision: u64,
    pub slot_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed(RemoveReport),
    Rejected(Rejection),
}

impl RemoveOutcome {
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}

pub struct Applicator {
    repo: ClassRepository,
    permissions: Arc<dyn PermissionOracle>,
    notifier: Arc<dyn NotificationSink>,
    items: Arc<dyn DerivedItemFactory>,
    config: ApplicatorConfig,
    locks: ClassLocks,
}

impl Applicator {
    pub fn new(
        store: Arc<dyn FlagStore>,
        permissions: Arc<dyn PermissionOracle>,
        notifier: Arc<dyn NotificationSink>,
        items: Arc<dyn DerivedItemFactory>,
    ) -> Self {
        Self {
            repo: ClassRepository::new(store),
            permissions,
            notifier,
            items,
            config: ApplicatorConfig::default(),
            locks: ClassLocks::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ApplicatorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn repository(&self) -> &ClassRepository {
        &self.repo
    }

    #[must_use]
    pub const fn config(&self) -> &ApplicatorConfig {
        &self.config
    }

    pub fn state(&self, class: &ClassRef) -> Result<ClassLifecycle> {
        Ok(self.repo.load(class)?.lifecycle())
    }

    /// Diff `archetype` against the class's live slots.
    pub fn preview(&self, class: &ClassRef, archetype: &ParsedArchetype) -> Result<Vec<DiffEntry>> {
        let state = self.repo.load(class)?;
        Ok(generate_diff(&state.slots, archetype))
    }

    /// Check `archetype` against everything already applied to the class.
    pub fn check(&self, class: &ClassRef, archetype: &ParsedArchetype) -> Result<CanApply> {
        let state = self.repo.load(class)?;
        Ok(check_can_apply(archetype, state.history()))
    }

    /// Apply one archetype using a diff computed against the live slots.
    pub fn apply(
        &self,
        actor: &ActorRef,
        class: &ClassRef,
        archetype: &ParsedArchetype,
        diff: &[DiffEntry],
    ) -> ApplyOutcome {
        if let Some(rejection) = self.deny(actor, class) {
            return ApplyOutcome::Rejected(rejection);
        }

        // Actor first: sibling classes share the actor's tracking map.
        let actor_handle = self.locks.actor_handle(&class.actor_id);
        let _actor_guard = actor_handle.lock();
        let handle = self.locks.handle(&class.actor_id, &class.id);
        let _guard = handle.lock();

        let state = match self.repo.load(class) {
            Ok(state) => state,
            Err(err) => return ApplyOutcome::Rejected(self.persistence_failure(class, &err)),
        };

        if state.is_applied(&archetype.slug) {
            self.notifier.warn(&format!(
                "{} is already applied to {}",
                archetype.name, class.name
            ));
            return ApplyOutcome::Rejected(Rejection::AlreadyApplied {
                slug: archetype.slug.clone(),
            });
        }

        if self.config.conflict_guard {
            let check = check_can_apply(archetype, state.history());
            if !check.can_apply {
                return ApplyOutcome::Rejected(self.conflicts(class, check.conflicts));
            }
        }

        self.commit_apply(
            actor,
            class,
            &state,
            std::slice::from_ref(archetype),
            archetype,
            diff,
        )
    }

    /// Validate, combine and apply several archetypes in one commit.
    pub fn apply_batch(
        &self,
        actor: &ActorRef,
        class: &ClassRef,
        archetypes: &[ParsedArchetype],
    ) -> ApplyOutcome {
        if let Some(rejection) = self.deny(actor, class) {
            return ApplyOutcome::Rejected(rejection);
        }
        let Some(combined) = ParsedArchetype::combine(archetypes) else {
            return ApplyOutcome::Rejected(Rejection::EmptyBatch);
        };

        // Actor first: sibling classes share the actor's tracking map.
        let actor_handle = self.locks.actor_handle(&class.actor_id);
        let _actor_guard = actor_handle.lock();
        let handle = self.locks.handle(&class.actor_id, &class.id);
        let _guard = handle.lock();

        let state = match self.repo.load(class) {
            Ok(state) => state,
            Err(err) => return ApplyOutcome::Rejected(self.persistence_failure(class, &err)),
        };

        let mut seen = HashSet::new();
        for archetype in archetypes {
            if state.is_applied(&archetype.slug) || !seen.insert(archetype.slug.as_str()) {
                self.notifier.warn(&format!(
                    "{} is already applied to {}",
                    archetype.name, class.name
                ));
                return ApplyOutcome::Rejected(Rejection::AlreadyApplied {
                    slug: archetype.slug.clone(),
                });
            }
        }

        let mut stack = state.history().to_vec();
        stack.extend_from_slice(archetypes);
        let report = validate_stacking(&stack);
        if !report.valid {
            return ApplyOutcome::Rejected(self.conflicts(class, report.conflicts));
        }

        let diff = generate_diff(&state.slots, &combined);
        self.commit_apply(actor, class, &state, archetypes, &combined, &diff)
    }

    /// Put the class back to its pre-archetype slots.
    pub fn restore_from_backup(&self, actor: &ActorRef, class: &ClassRef) -> RestoreOutcome {
        if let Some(rejection) = self.deny(actor, class) {
            return RestoreOutcome::failed(rejection);
        }

        // Actor first: sibling classes share the actor's tracking map.
        let actor_handle = self.locks.actor_handle(&class.actor_id);
        let _actor_guard = actor_handle.lock();
        let handle = self.locks.handle(&class.actor_id, &class.id);
        let _guard = handle.lock();

        let state = match self.repo.load(class) {
            Ok(state) => state,
            Err(err) => return RestoreOutcome::failed(self.persistence_failure(class, &err)),
        };
        let Some(backup) = state.backup.clone() else {
            self.notifier
                .warn(&format!("No archetype backup found for {}", class.name));
            return RestoreOutcome::failed(Rejection::NoBackupFound);
        };

        let restored_count = backup.slots.len();
        let mut commit = ClassCommit::for_state(class, &state);
        commit.slots = Some(backup.slots);
        commit.backup = Change::Clear;
        commit.record = Change::Clear;
        commit.tracking = match self.config.restore_tracking_scope {
            TrackingScope::Actor => Change::Clear,
            TrackingScope::Class => tracking_with(&state.tracking, &class.tag, Vec::new()),
        };

        let revision = match self.repo.commit("restore", commit) {
            Ok(revision) => revision,
            Err(err) => return RestoreOutcome::failed(self.persistence_failure(class, &err)),
        };

        if self.config.discard_derived_items_on_restore {
            let created: Vec<ItemRef> = state
                .record
                .iter()
                .flat_map(|record| record.derived_items.values().flatten().cloned())
                .collect();
            self.discard_best_effort(actor, &created);
        }

        info!(
            actor = %class.actor_id,
            class = %class.id,
            revision,
            restored = restored_count,
            "restored class from backup"
        );
        self.notifier.info(&format!(
            "Restored {restored_count} original features of {}",
            class.name
        ));
        RestoreOutcome {
            success: true,
            restored_count,
            message: "Restored".to_string(),
            rejection: None,
        }
    }

    /// Take one archetype off the stack: restore, then replay the rest.
    pub fn remove(&self, actor: &ActorRef, class: &ClassRef, slug: &str) -> RemoveOutcome {
        if let Some(rejection) = self.deny(actor, class) {
            return RemoveOutcome::Rejected(rejection);
        }

        // Actor first: sibling classes share the actor's tracking map.
        let actor_handle = self.locks.actor_handle(&class.actor_id);
        let _actor_guard = actor_handle.lock();
        let handle = self.locks.handle(&class.actor_id, &class.id);
        let _guard = handle.lock();

        let state = match self.repo.load(class) {
            Ok(state) => state,
            Err(err) => return RemoveOutcome::Rejected(self.persistence_failure(class, &err)),
        };
        let (Some(backup), Some(record)) = (&state.backup, &state.record) else {
            return RemoveOutcome::Rejected(self.not_applied(class, slug));
        };
        if !record.contains(slug) {
            return RemoveOutcome::Rejected(self.not_applied(class, slug));
        }

        let remaining: Vec<ParsedArchetype> = record
            .history
            .iter()
            .filter(|archetype| archetype.slug != slug)
            .cloned()
            .collect();
        let report = validate_stacking(&remaining);
        if !report.valid {
            return RemoveOutcome::Rejected(self.conflicts(class, report.conflicts));
        }

        let slots = remaining.iter().fold(backup.slots.clone(), |slots, archetype| {
            build_next_slots(&generate_diff(&slots, archetype))
        });
        let slot_count = slots.len();
        let remaining_slugs: Vec<String> =
            remaining.iter().map(|archetype| archetype.slug.clone()).collect();

        let mut commit = ClassCommit::for_state(class, &state);
        commit.slots = Some(slots);
        commit.tracking = tracking_with(&state.tracking, &class.tag, remaining_slugs.clone());
        match ApplicationRecord::from_history(&remaining, Utc::now()) {
            Some(mut next) => {
                next.derived_items = record.derived_items.clone();
                next.derived_items.remove(slug);
                commit.record = Change::Put(next);
            }
            None => {
                commit.backup = Change::Clear;
                commit.record = Change::Clear;
            }
        }

        let revision = match self.repo.commit("remove", commit) {
            Ok(revision) => revision,
            Err(err) => return RemoveOutcome::Rejected(self.persistence_failure(class, &err)),
        };

        if let Some(created) = record.derived_items.get(slug) {
            self.discard_best_effort(actor, created);
        }

        info!(
            actor = %class.actor_id,
            class = %class.id,
            slug,
            revision,
            remaining = remaining_slugs.len(),
            "removed archetype"
        );
        self.notifier
            .info(&format!("Removed {slug} from {}", class.name));
        RemoveOutcome::Removed(RemoveReport {
            slug: slug.to_string(),
            remaining: remaining_slugs,
            revision,
            slot_count,
        })
    }

    fn commit_apply(
        &self,
        actor: &ActorRef,
        class: &ClassRef,
        state: &ClassState,
        applied: &[ParsedArchetype],
        stack: &ParsedArchetype,
        diff: &[DiffEntry],
    ) -> ApplyOutcome {
        let next_slots = build_next_slots(diff);
        let slot_count = next_slots.len();

        let specs = self.derived_specs(applied, stack, diff);
        let created = if specs.is_empty() {
            Vec::new()
        } else {
            match self.items.create_derived_items(actor, &specs) {
                Ok(created) => created,
                Err(err) => {
                    return ApplyOutcome::Rejected(self.persistence_failure(class, &err));
                }
            }
        };

        let now = Utc::now();
        let backup_created = state.backup.is_none();
        let mut commit = ClassCommit::for_state(class, state);
        commit.slots = Some(next_slots);
        if backup_created {
            commit.backup = Change::Put(Backup::capture(&state.slots));
        }

        let mut record = match (&state.record, applied.split_first()) {
            (Some(existing), _) => existing.clone(),
            (None, Some((first, _))) => ApplicationRecord {
                applied_slugs: Vec::new(),
                applied_at: now,
                last_applied_archetype: first.clone(),
                history: Vec::new(),
                derived_items: std::collections::BTreeMap::new(),
            },
            (None, None) => return ApplyOutcome::Rejected(Rejection::EmptyBatch),
        };
        for archetype in applied {
            record.push(archetype, now);
        }
        for (spec, item) in specs.iter().zip(&created) {
            record
                .derived_items
                .entry(spec.source_archetype.clone())
                .or_default()
                .push(item.clone());
        }
        commit.record = Change::Put(record);

        let mut slugs = state
            .tracking
            .get(&class.tag)
            .cloned()
            .unwrap_or_default();
        for archetype in applied {
            if !slugs.contains(&archetype.slug) {
                slugs.push(archetype.slug.clone());
            }
        }
        commit.tracking = tracking_with(&state.tracking, &class.tag, slugs);

        let revision = match self.repo.commit("apply", commit) {
            Ok(revision) => revision,
            Err(err) => {
                self.discard_best_effort(actor, &created);
                return ApplyOutcome::Rejected(self.persistence_failure(class, &err));
            }
        };

        let summary = ChangeSummary::from_diff(diff);
        let unresolved = unresolved_targets(diff);
        for target in &unresolved {
            self.notifier.warn(&target.message());
        }

        info!(
            actor = %class.actor_id,
            class = %class.id,
            archetype = %stack.slug,
            revision,
            backup_created,
            slots = slot_count,
            "applied archetype"
        );
        self.notifier
            .summary(&format!("{} on {}", stack.name, class.name), &summary);
        self.notifier
            .info(&format!("Applied {} to {}", stack.name, class.name));

        ApplyOutcome::Applied(ApplyReport {
            slugs: applied.iter().map(|a| a.slug.clone()).collect(),
            revision,
            backup_created,
            slot_count,
            summary,
            derived_items: created,
            unresolved,
        })
    }

    /// One derived item spec per `Modified` row.
    fn derived_specs(
        &self,
        applied: &[ParsedArchetype],
        stack: &ParsedArchetype,
        diff: &[DiffEntry],
    ) -> Vec<DerivedItemSpec> {
        diff.iter()
            .filter(|entry| entry.status == DiffStatus::Modified)
            .filter_map(|entry| {
                let claim = entry.claim.as_ref()?;
                let original_slot: &FeatureSlot = entry.original_slot.as_ref()?;
                // Batches diff a combined stack; credit the archetype that owns the claim.
                let source = applied
                    .iter()
                    .find(|archetype| archetype.claims.contains(claim))
                    .unwrap_or(stack);
                Some(DerivedItemSpec {
                    name: self.config.item_name(&claim.name, &source.name),
                    source_archetype: source.slug.clone(),
                    derived_modified_copy: true,
                    original_slot: original_slot.clone(),
                    claim: claim.clone(),
                })
            })
            .collect()
    }

    /// The caller must act for the class's own actor, and control it.
    fn deny(&self, actor: &ActorRef, class: &ClassRef) -> Option<Rejection> {
        if actor.id == class.actor_id && self.permissions.is_owner_or_elevated(actor) {
            return None;
        }
        warn!(
            actor = %actor.id,
            owner = %class.actor_id,
            class = %class.id,
            "permission denied"
        );
        self.notifier
            .warn(&format!("You do not have permission to modify {}", actor.name));
        Some(Rejection::PermissionDenied)
    }

    fn not_applied(&self, class: &ClassRef, slug: &str) -> Rejection {
        self.notifier
            .warn(&format!("{slug} is not applied to {}", class.name));
        Rejection::NotApplied {
            slug: slug.to_string(),
        }
    }

    fn conflicts(&self, class: &ClassRef, conflicts: Vec<Conflict>) -> Rejection {
        for conflict in &conflicts {
            self.notifier.warn(&format!(
                "{} conflicts with {} on {} ({})",
                conflict.archetype, conflict.blocking_archetype, conflict.feature_name, class.name
            ));
        }
        Rejection::Conflicts { conflicts }
    }

    fn persistence_failure(&self, class: &ClassRef, err: &crate::error::OverlayError) -> Rejection {
        error!(
            actor = %class.actor_id,
            class = %class.id,
            code = err.code(),
            "archetype transition failed: {err}"
        );
        self.notifier
            .error(&format!("Failed to update {}: {err}", class.name));
        Rejection::PersistenceFailure {
            message: err.to_string(),
        }
    }

    fn discard_best_effort(&self, actor: &ActorRef, items: &[ItemRef]) {
        if items.is_empty() {
            return;
        }
        if let Err(err) = self.items.discard_items(actor, items) {
            warn!(actor = %actor.id, count = items.len(), "failed to discard derived items: {err}");
        }
    }
}

/// Tracking map with `tag` set to `slugs`, or removed when `slugs` is empty.
fn tracking_with(tracking: &ActorTracking, tag: &str, slugs: Vec<String>) -> Change<ActorTracking> {
    let mut next = tracking.clone();
    if slugs.is_empty() {
        next.remove(tag);
    } else {
        next.insert(tag.to_string(), slugs);
    }
    if next.is_empty() {
        Change::Clear
    } else {
        Change::Put(next)
    }
}
