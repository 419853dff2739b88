//! Structured difference between a class's slot sequence and an archetype.
//!
//! [`generate_diff`] is pure and never rejects input. Claims that target the
//! same slot are a conflict-checker concern; here the first claim on a slot
//! wins and any later one is surfaced as unresolved with its own reason.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{ArchetypeFeatureClaim, ClaimKind, FeatureRef, FeatureSlot, ParsedArchetype};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Unchanged,
    Removed,
    Added,
    Modified,
}

/// One row of a computed diff.
///
/// `Removed`/`Unchanged` rows always carry `original_slot`; `Added` rows
/// always carry `claim`; `Modified` rows carry both. An `Added` row produced
/// by a matched replacement also carries the slot it takes over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub status: DiffStatus,
    pub name: String,
    pub level: u32,
    pub original_slot: Option<FeatureSlot>,
    pub claim: Option<ArchetypeFeatureClaim>,
}

impl DiffEntry {
    fn unchanged(slot: &FeatureSlot) -> Self {
        Self {
            status: DiffStatus::Unchanged,
            name: slot.display_name.clone(),
            level: slot.level,
            original_slot: Some(slot.clone()),
            claim: None,
        }
    }

    fn removed(slot: &FeatureSlot) -> Self {
        Self {
            status: DiffStatus::Removed,
            name: slot.display_name.clone(),
            level: slot.level,
            original_slot: Some(slot.clone()),
            claim: None,
        }
    }

    fn added(claim: &ArchetypeFeatureClaim, slot: Option<&FeatureSlot>) -> Self {
        Self {
            status: DiffStatus::Added,
            name: claim.name.clone(),
            level: claim.level,
            original_slot: slot.cloned(),
            claim: Some(claim.clone()),
        }
    }

    fn modified(claim: &ArchetypeFeatureClaim, slot: &FeatureSlot) -> Self {
        Self {
            status: DiffStatus::Modified,
            name: claim.name.clone(),
            level: claim.level,
            original_slot: Some(slot.clone()),
            claim: Some(claim.clone()),
        }
    }

    /// An added row whose claim names a target slot that was not matched.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.status == DiffStatus::Added
            && self.original_slot.is_none()
            && self
                .claim
                .as_ref()
                .is_some_and(|claim| claim.target_slot.is_some())
    }
}

/// Compute the diff of `current_slots` against `archetype`.
///
/// The result is sorted by ascending level, ties in emission order: current
/// slots first, then additive claims, then claims whose target was not
/// matched.
#[must_use]
pub fn generate_diff(current_slots: &[FeatureSlot], archetype: &ParsedArchetype) -> Vec<DiffEntry> {
    let mut by_target: HashMap<&FeatureRef, &ArchetypeFeatureClaim> = HashMap::new();
    for claim in &archetype.claims {
        if let Some(target) = &claim.target_slot {
            by_target.entry(&target.id).or_insert(claim);
        }
    }

    let mut diff = Vec::with_capacity(current_slots.len() + archetype.claims.len());
    let mut matched: HashSet<&FeatureRef> = HashSet::new();

    for slot in current_slots {
        match by_target.get(&slot.id) {
            None => diff.push(DiffEntry::unchanged(slot)),
            Some(claim) => {
                matched.insert(&slot.id);
                match claim.kind {
                    ClaimKind::Replacement => {
                        diff.push(DiffEntry::removed(slot));
                        diff.push(DiffEntry::added(claim, Some(slot)));
                    }
                    ClaimKind::Modification => diff.push(DiffEntry::modified(claim, slot)),
                    // Additive claims carry no target, so they never land in by_target.
                    ClaimKind::Additive => diff.push(DiffEntry::unchanged(slot)),
                }
            }
        }
    }

    for claim in archetype.claims.iter().filter(|c| c.target_slot.is_none()) {
        diff.push(DiffEntry::added(claim, None));
    }

    for claim in &archetype.claims {
        let Some(target) = &claim.target_slot else {
            continue;
        };
        let is_primary = by_target
            .get(&target.id)
            .is_some_and(|primary| std::ptr::eq(*primary, claim));
        if is_primary && matched.contains(&target.id) {
            continue;
        }
        if is_primary {
            warn!(
                archetype = %archetype.slug,
                claim = %claim.name,
                target = %target.display_name,
                "claim target slot not matched"
            );
        } else {
            warn!(
                archetype = %archetype.slug,
                claim = %claim.name,
                target = %target.display_name,
                "claim target slot already claimed"
            );
        }
        diff.push(DiffEntry::added(claim, None));
    }

    diff.sort_by_key(|entry| entry.level);
    debug!(
        archetype = %archetype.slug,
        slots = current_slots.len(),
        entries = diff.len(),
        "generated diff"
    );
    diff
}

/// Rebuild the slot sequence to persist from a diff.
///
/// Only slot identity survives: unchanged slots are kept, added or modified
/// rows that took over a slot keep that slot's original id and level, removed
/// rows and pure additions are dropped.
#[must_use]
pub fn build_next_slots(diff: &[DiffEntry]) -> Vec<FeatureSlot> {
    let mut next: Vec<FeatureSlot> = diff
        .iter()
        .filter_map(|entry| match entry.status {
            DiffStatus::Unchanged | DiffStatus::Added | DiffStatus::Modified => {
                entry.original_slot.clone()
            }
            DiffStatus::Removed => None,
        })
        .collect();
    next.sort_by_key(|slot| slot.level);
    next
}

/// Number of rows with the given status.
#[must_use]
pub fn count_status(diff: &[DiffEntry], status: DiffStatus) -> usize {
    diff.iter().filter(|entry| entry.status == status).count()
}

/// Why a targeted claim did not take over its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The class has no slot with the target's id.
    MissingSlot,
    /// An earlier claim of the same archetype already took the slot.
    AlreadyClaimed { by: String },
}

/// A claim whose target slot could not be matched against the class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedTarget {
    pub claim_name: String,
    pub level: u32,
    pub target: FeatureSlot,
    pub reason: UnresolvedReason,
}

impl UnresolvedTarget {
    /// One-line notice text.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.reason {
            UnresolvedReason::MissingSlot => format!(
                "{}: no {} feature to replace at level {}",
                self.claim_name, self.target.display_name, self.level
            ),
            UnresolvedReason::AlreadyClaimed { by } => format!(
                "{}: {} is already claimed by {}",
                self.claim_name, self.target.display_name, by
            ),
        }
    }
}

#[must_use]
pub fn unresolved_targets(diff: &[DiffEntry]) -> Vec<UnresolvedTarget> {
    let claimed_by: HashMap<&FeatureRef, &str> = diff
        .iter()
        .filter(|entry| matches!(entry.status, DiffStatus::Added | DiffStatus::Modified))
        .filter_map(|entry| {
            let slot = entry.original_slot.as_ref()?;
            let claim = entry.claim.as_ref()?;
            Some((&slot.id, claim.name.as_str()))
        })
        .collect();

    diff.iter()
        .filter(|entry| entry.is_unresolved())
        .filter_map(|entry| {
            let claim = entry.claim.as_ref()?;
            let target = claim.target_slot.clone()?;
            let reason = match claimed_by.get(&target.id) {
                Some(by) => UnresolvedReason::AlreadyClaimed {
                    by: (*by).to_string(),
                },
                None => UnresolvedReason::MissingSlot,
            };
            Some(UnresolvedTarget {
                claim_name: claim.name.clone(),
                level: claim.level,
                target,
                reason,
            })
        })
        .collect()
}

/// Names grouped by change kind, for the post-apply summary notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
}

impl ChangeSummary {
    #[must_use]
    pub fn from_diff(diff: &[DiffEntry]) -> Self {
        let mut summary = Self::default();
        for entry in diff {
            match entry.status {
                DiffStatus::Removed => summary.removed.push(entry.name.clone()),
                DiffStatus::Added => summary.added.push(entry.name.clone()),
                DiffStatus::Modified => summary.modified.push(entry.name.clone()),
                DiffStatus::Unchanged => {}
            }
        }
        summary
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.modified.is_empty()
    }

    /// Plain-text rendering, one line per non-empty group.
    #[must_use]
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No changes".to_string();
        }
        let mut out = String::new();
        for (label, names) in [
            ("Removed", &self.removed),
            ("Added", &self.added),
            ("Modified", &self.modified),
        ] {
            if names.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "{label}: {}", names.join(", "));
        }
        out
    }
}
