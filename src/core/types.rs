//! Domain types shared by the diff, conflict and apply stages.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

/// Stable reference to an underlying feature document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRef(pub String);

impl FeatureRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One level-tagged feature grant belonging to a class.
///
/// Identity is the `id`; `level` determines ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSlot {
    pub id: FeatureRef,
    pub level: u32,
    pub display_name: String,
}

impl FeatureSlot {
    pub fn new(id: impl Into<String>, level: u32, display_name: impl Into<String>) -> Self {
        Self {
            id: FeatureRef::new(id),
            level,
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Replacement,
    Modification,
    Additive,
}

impl ClaimKind {
    /// Replacement and modification claims occupy an existing slot.
    #[must_use]
    pub const fn targets_slot(self) -> bool {
        matches!(self, Self::Replacement | Self::Modification)
    }
}

/// One feature an archetype contributes, optionally targeting a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeFeatureClaim {
    pub name: String,
    pub level: u32,
    pub kind: ClaimKind,
    #[serde(default)]
    pub target_slot: Option<FeatureSlot>,
    #[serde(default)]
    pub description: String,
}

impl ArchetypeFeatureClaim {
    pub fn replacing(name: impl Into<String>, level: u32, target: FeatureSlot) -> Self {
        Self {
            name: name.into(),
            level,
            kind: ClaimKind::Replacement,
            target_slot: Some(target),
            description: String::new(),
        }
    }

    pub fn modifying(name: impl Into<String>, level: u32, target: FeatureSlot) -> Self {
        Self {
            name: name.into(),
            level,
            kind: ClaimKind::Modification,
            target_slot: Some(target),
            description: String::new(),
        }
    }

    pub fn additive(name: impl Into<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            level,
            kind: ClaimKind::Additive,
            target_slot: None,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A parsed archetype definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArchetype {
    pub name: String,
    pub slug: String,
    pub class_tag: String,
    #[serde(default)]
    pub claims: Vec<ArchetypeFeatureClaim>,
}

impl ParsedArchetype {
    pub fn new(
        name: impl Into<String>,
        slug: impl Into<String>,
        class_tag: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            class_tag: class_tag.into(),
            claims: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_claim(mut self, claim: ArchetypeFeatureClaim) -> Self {
        self.claims.push(claim);
        self
    }

    /// Combine several archetypes into one stack for diffing.
    ///
    /// Claims are concatenated in input order. The result is never persisted
    /// as an entity of its own. Returns `None` for an empty input.
    #[must_use]
    pub fn combine(archetypes: &[Self]) -> Option<Self> {
        let first = archetypes.first()?;
        if archetypes.len() == 1 {
            return Some(first.clone());
        }
        Some(Self {
            name: archetypes
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(" + "),
            slug: archetypes
                .iter()
                .map(|a| a.slug.as_str())
                .collect::<Vec<_>>()
                .join("+"),
            class_tag: first.class_tag.clone(),
            claims: archetypes
                .iter()
                .flat_map(|a| a.claims.iter().cloned())
                .collect(),
        })
    }

    /// Check structural invariants of a definition coming from outside.
    pub fn validate(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(OverlayError::ValidationFailed(format!(
                "archetype '{}' has an empty slug",
                self.name
            )));
        }
        for claim in &self.claims {
            if claim.level == 0 {
                return Err(OverlayError::ValidationFailed(format!(
                    "claim '{}' in '{}' has level 0",
                    claim.name, self.slug
                )));
            }
            let has_target = claim.target_slot.is_some();
            if has_target == (claim.kind == ClaimKind::Additive) {
                return Err(OverlayError::ValidationFailed(format!(
                    "claim '{}' in '{}': target slot must be present exactly when the claim is not additive",
                    claim.name, self.slug
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let archetype: Self = serde_json::from_str(raw)?;
        archetype.validate()?;
        Ok(archetype)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let archetype: Self = serde_yaml::from_str(raw)
            .map_err(|err| OverlayError::Serialization(err.to_string()))?;
        archetype.validate()?;
        Ok(archetype)
    }

    /// Load a definition from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            OverlayError::NotFound(format!("read archetype {}: {err}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&raw),
            _ => Self::from_json_str(&raw),
        }
    }
}

/// The character that owns one or more classes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    pub name: String,
}

impl ActorRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A class record owned by an actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassRef {
    pub actor_id: String,
    pub id: String,
    pub name: String,
    /// Class tag used to key the actor's archetype tracking flag.
    pub tag: String,
}

impl ClassRef {
    pub fn new(
        actor_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            id: id.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }
}
