//! Conflict detection between archetypes competing for the same slot.
//!
//! Matching is by normalized target slot name, not by slot identity:
//! archetype authors re-describe the same base feature with slightly
//! different text, so two differently named features that normalize the same
//! will be reported as a (false positive) conflict. Switching to identity
//! matching would require re-deriving how claim targets link to slot ids.

use std::collections::HashSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalize::normalize;
use super::types::ParsedArchetype;

/// Two archetypes claim the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Display name of the contested slot, as written by the blocking archetype.
    pub feature_name: String,
    /// Name of the archetype already holding the slot.
    pub blocking_archetype: String,
    /// Name of the archetype that was checked against it.
    pub archetype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanApply {
    pub can_apply: bool,
    pub conflicts: Vec<Conflict>,
    /// Deduplicated names of blocking archetypes, first-seen order.
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackingReport {
    pub valid: bool,
    pub conflicts: Vec<Conflict>,
}

/// (normalized name, display name) for every slot-occupying claim.
fn slot_claims(archetype: &ParsedArchetype) -> Vec<(String, &str)> {
    archetype
        .claims
        .iter()
        .filter(|claim| claim.kind.targets_slot())
        .filter_map(|claim| {
            let target = claim.target_slot.as_ref()?;
            Some((normalize(&target.display_name), target.display_name.as_str()))
        })
        .collect()
}

/// Conflicts between `candidate` and each archetype in `applied`.
///
/// Additive claims never conflict. Each contested slot is reported once per
/// blocking archetype.
#[must_use]
pub fn check_against_applied(
    candidate: &ParsedArchetype,
    applied: &[ParsedArchetype],
) -> Vec<Conflict> {
    let wanted: HashSet<String> = slot_claims(candidate)
        .into_iter()
        .map(|(normalized, _)| normalized)
        .collect();
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut conflicts = Vec::new();
    for other in applied {
        let mut reported = HashSet::new();
        for (normalized, display) in slot_claims(other) {
            if wanted.contains(&normalized) && reported.insert(normalized) {
                conflicts.push(Conflict {
                    feature_name: display.to_string(),
                    blocking_archetype: other.name.clone(),
                    archetype: candidate.name.clone(),
                });
            }
        }
    }

    debug!(
        candidate = %candidate.slug,
        applied = applied.len(),
        conflicts = conflicts.len(),
        "checked archetype against applied set"
    );
    conflicts
}

#[must_use]
pub fn check_can_apply(candidate: &ParsedArchetype, applied: &[ParsedArchetype]) -> CanApply {
    let conflicts = check_against_applied(candidate, applied);
    let blocked_by = conflicts
        .iter()
        .map(|conflict| conflict.blocking_archetype.clone())
        .unique()
        .collect();
    CanApply {
        can_apply: conflicts.is_empty(),
        conflicts,
        blocked_by,
    }
}

/// Pairwise check across every combination in `archetypes`.
///
/// Validity does not depend on input order.
#[must_use]
pub fn validate_stacking(archetypes: &[ParsedArchetype]) -> StackingReport {
    let conflicts: Vec<Conflict> = (0..archetypes.len())
        .tuple_combinations()
        .flat_map(|(earlier, later)| {
            check_against_applied(
                &archetypes[later],
                std::slice::from_ref(&archetypes[earlier]),
            )
        })
        .collect();
    StackingReport {
        valid: conflicts.is_empty(),
        conflicts,
    }
}
