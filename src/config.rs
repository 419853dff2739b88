use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub applicator: ApplicatorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl Config {
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("ARCHETYPE_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if let Some(patch) = Self::load_patch(&path)? {
                config.merge_patch(patch);
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(root)? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("archetype/config.toml"))
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        let path = root.join("config.toml");
        Self::load_patch(&path)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| OverlayError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| OverlayError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.applicator {
            self.applicator.merge(patch);
        }
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
        if let Some(patch) = patch.permissions {
            self.permissions.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_bool("ARCHETYPE_CONFLICT_GUARD") {
            self.applicator.conflict_guard = value;
        }
        if let Some(value) = env_string("ARCHETYPE_RESTORE_TRACKING_SCOPE") {
            self.applicator.restore_tracking_scope = TrackingScope::parse(&value)?;
        }
        if let Some(value) = env_bool("ARCHETYPE_DISCARD_DERIVED_ITEMS_ON_RESTORE") {
            self.applicator.discard_derived_items_on_restore = value;
        }
        if let Some(value) = env_string("ARCHETYPE_ITEM_NAME_FORMAT") {
            self.applicator.item_name_format = value;
        }

        if let Some(value) = env_string("ARCHETYPE_STORAGE_BACKEND") {
            self.storage.backend = StorageBackend::parse(&value)?;
        }
        if let Some(value) = env_string("ARCHETYPE_STORAGE_DATABASE") {
            self.storage.database = value;
        }

        if let Some(value) = env_bool("ARCHETYPE_ELEVATED") {
            self.permissions.elevated = value;
        }
        if let Some(values) = env_list("ARCHETYPE_OWNERS") {
            self.permissions.owners = merge_unique(values, &self.permissions.owners);
        }

        Ok(())
    }
}

/// How much of the actor's archetype tracking flag a restore clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingScope {
    /// The whole flag, for every class of the actor.
    #[default]
    Actor,
    /// Only the restored class's tag entry.
    Class,
}

impl TrackingScope {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "actor" => Ok(Self::Actor),
            "class" => Ok(Self::Class),
            _ => Err(OverlayError::Config(format!(
                "invalid tracking scope {value} (expected actor|class)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicatorConfig {
    /// Run the conflict checker inside single-archetype applies too.
    #[serde(default)]
    pub conflict_guard: bool,
    #[serde(default)]
    pub restore_tracking_scope: TrackingScope,
    #[serde(default)]
    pub discard_derived_items_on_restore: bool,
    /// `{claim}` and `{archetype}` are substituted.
    #[serde(default = "default_item_name_format")]
    pub item_name_format: String,
}

fn default_item_name_format() -> String {
    "{claim} ({archetype})".to_string()
}

impl Default for ApplicatorConfig {
    fn default() -> Self {
        Self {
            conflict_guard: false,
            restore_tracking_scope: TrackingScope::Actor,
            discard_derived_items_on_restore: false,
            item_name_format: default_item_name_format(),
        }
    }
}

impl ApplicatorConfig {
    fn merge(&mut self, patch: ApplicatorPatch) {
        if let Some(value) = patch.conflict_guard {
            self.conflict_guard = value;
        }
        if let Some(value) = patch.restore_tracking_scope {
            self.restore_tracking_scope = value;
        }
        if let Some(value) = patch.discard_derived_items_on_restore {
            self.discard_derived_items_on_restore = value;
        }
        if let Some(value) = patch.item_name_format {
            self.item_name_format = value;
        }
    }

    /// Name of the derived copy of a modified feature.
    #[must_use]
    pub fn item_name(&self, claim: &str, archetype: &str) -> String {
        self.item_name_format
            .replace("{claim}", claim)
            .replace("{archetype}", archetype)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => Err(OverlayError::Config(format!(
                "invalid storage backend {value} (expected sqlite|memory)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database: "archetypes.db".to_string(),
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.backend {
            self.backend = value;
        }
        if let Some(value) = patch.database {
            self.database = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Game-master privilege: may modify any actor.
    #[serde(default)]
    pub elevated: bool,
    /// Actor ids the user controls.
    #[serde(default)]
    pub owners: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            elevated: true,
            owners: Vec::new(),
        }
    }
}

impl PermissionsConfig {
    fn merge(&mut self, patch: PermissionsPatch) {
        if let Some(value) = patch.elevated {
            self.elevated = value;
        }
        if let Some(values) = patch.owners {
            self.owners = merge_unique(values, &self.owners);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub applicator: Option<ApplicatorPatch>,
    pub storage: Option<StoragePatch>,
    pub permissions: Option<PermissionsPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApplicatorPatch {
    pub conflict_guard: Option<bool>,
    pub restore_tracking_scope: Option<TrackingScope>,
    pub discard_derived_items_on_restore: Option<bool>,
    pub item_name_format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub backend: Option<StorageBackend>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PermissionsPatch {
    pub elevated: Option<bool>,
    pub owners: Option<Vec<String>>,
}

fn merge_unique(values: Vec<String>, existing: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values.into_iter().chain(existing.iter().cloned()) {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToString::to_string)
            .collect()
    })
}
