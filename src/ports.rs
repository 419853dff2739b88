//! Collaborator contracts consumed by the applicator.
//!
//! The core never talks to a UI, a compendium or a chat log directly; it
//! resolves feature names, checks permissions, emits notices and creates
//! derived items through the traits in this module.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::diff::ChangeSummary;
use crate::core::types::{ActorRef, ArchetypeFeatureClaim, FeatureRef, FeatureSlot};
use crate::error::{OverlayError, Result};

/// Display name used when a feature reference no longer resolves.
pub const UNKNOWN_FEATURE: &str = "Unknown Feature";

// =============================================================================
// FEATURE RESOLUTION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFeature {
    pub display_name: String,
}

pub trait FeatureResolver {
    /// `None` for a stale reference; that is not an error.
    fn resolve(&self, reference: &FeatureRef) -> Option<ResolvedFeature>;
}

/// Resolver over a fixed id → name catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogResolver {
    entries: HashMap<FeatureRef, String>,
}

impl CatalogResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(mut self, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        self.entries
            .insert(FeatureRef::new(id), display_name.into());
        self
    }

    /// Load a JSON object mapping feature ids to display names.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            OverlayError::NotFound(format!("read catalog {}: {err}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl FeatureResolver for CatalogResolver {
    fn resolve(&self, reference: &FeatureRef) -> Option<ResolvedFeature> {
        self.entries.get(reference).map(|name| ResolvedFeature {
            display_name: name.clone(),
        })
    }
}

/// A class grant before its display name is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotGrant {
    pub id: FeatureRef,
    pub level: u32,
    /// Name to use when the resolver has none.
    #[serde(default)]
    pub fallback_name: Option<String>,
}

/// Resolve grants into level-ordered feature slots.
pub fn resolve_slots(resolver: &dyn FeatureResolver, grants: &[SlotGrant]) -> Vec<FeatureSlot> {
    let mut slots: Vec<FeatureSlot> = grants
        .iter()
        .map(|grant| {
            let display_name = resolver.resolve(&grant.id).map_or_else(
                || {
                    tracing::debug!(feature = %grant.id, "feature reference did not resolve");
                    grant
                        .fallback_name
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_FEATURE.to_string())
                },
                |resolved| resolved.display_name,
            );
            FeatureSlot {
                id: grant.id.clone(),
                level: grant.level,
                display_name,
            }
        })
        .collect();
    slots.sort_by_key(|slot| slot.level);
    slots
}

// =============================================================================
// PERMISSIONS
// =============================================================================

pub trait PermissionOracle: Send + Sync {
    fn is_owner_or_elevated(&self, actor: &ActorRef) -> bool;
}

/// Fixed permission set: an elevated user, or a list of owned actors.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    elevated: bool,
    owned: HashSet<String>,
}

impl StaticPermissions {
    #[must_use]
    pub fn elevated() -> Self {
        Self {
            elevated: true,
            owned: HashSet::new(),
        }
    }

    pub fn owner_of<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elevated: false,
            owned: actors.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn denied() -> Self {
        Self::default()
    }
}

impl PermissionOracle for StaticPermissions {
    fn is_owner_or_elevated(&self, actor: &ActorRef) -> bool {
        self.elevated || self.owned.contains(&actor.id)
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Fire-and-forget user notices.
pub trait NotificationSink: Send + Sync {
    fn info(&self, text: &str);
    fn warn(&self, text: &str);
    fn error(&self, text: &str);

    /// Grouped change summary after a successful apply.
    fn summary(&self, title: &str, summary: &ChangeSummary) {
        self.info(&format!("{title}\n{}", summary.render()));
    }
}

/// Routes notices into the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn info(&self, text: &str) {
        tracing::info!(target: "archetype_overlay::notice", "{text}");
    }

    fn warn(&self, text: &str) {
        tracing::warn!(target: "archetype_overlay::notice", "{text}");
    }

    fn error(&self, text: &str) {
        tracing::error!(target: "archetype_overlay::notice", "{text}");
    }
}

// =============================================================================
// DERIVED ITEMS
// =============================================================================

/// Reference to an item created by a [`DerivedItemFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRef(pub String);

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A modified copy of a class feature, flagged with its source archetype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedItemSpec {
    pub name: String,
    pub source_archetype: String,
    /// Always true; marks the item as a derived modified copy.
    pub derived_modified_copy: bool,
    pub original_slot: FeatureSlot,
    pub claim: ArchetypeFeatureClaim,
}

pub trait DerivedItemFactory: Send + Sync {
    fn create_derived_items(&self, owner: &ActorRef, specs: &[DerivedItemSpec])
    -> Result<Vec<ItemRef>>;

    /// Delete items created earlier; used to undo an uncommitted apply.
    fn discard_items(&self, owner: &ActorRef, items: &[ItemRef]) -> Result<()>;
}
