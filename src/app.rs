use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{Cli, OutputMode};
use crate::config::{Config, StorageBackend};
use crate::core::applicator::Applicator;
use crate::error::{OverlayError, Result};
use crate::ports::{NotificationSink, PermissionOracle, StaticPermissions, TracingNotifier};
use crate::storage::{FlagStore, MemoryFlagStore, SqliteFlagStore, StoreItemFactory};

/// Name of the project-local data directory.
pub const ROOT_DIR: &str = ".archetype";

pub struct AppContext {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
    pub store: Arc<dyn FlagStore>,
    pub items: Arc<StoreItemFactory>,
    pub applicator: Applicator,
    pub output_mode: OutputMode,
    pub verbosity: u8,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = Self::find_root()?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| default_config_path(&root));
        let config = Config::load(cli.config.as_deref(), &root)?;
        let output_mode = cli.output_mode();

        let store = open_store(&root, &config)?;
        let items = Arc::new(StoreItemFactory::new(Arc::clone(&store)));
        let notifier: Arc<dyn NotificationSink> = match output_mode {
            OutputMode::Human => Arc::new(crate::cli::output::ConsoleNotifier),
            OutputMode::Robot => Arc::new(TracingNotifier),
        };
        let applicator = Applicator::new(
            Arc::clone(&store),
            permissions(&config),
            notifier,
            items.clone(),
        )
        .with_config(config.applicator.clone());

        Ok(Self {
            root,
            config_path,
            config,
            store,
            items,
            applicator,
            output_mode,
            verbosity: cli.verbose,
        })
    }

    #[must_use]
    pub fn robot(&self) -> bool {
        self.output_mode == OutputMode::Robot
    }

    fn find_root() -> Result<PathBuf> {
        if let Ok(root) = std::env::var("ARCHETYPE_ROOT") {
            return Ok(PathBuf::from(root));
        }
        let cwd = std::env::current_dir()?;
        if let Some(found) = find_upwards(&cwd, ROOT_DIR) {
            return Ok(found);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| OverlayError::MissingConfig("data directory not found".to_string()))?;
        Ok(data_dir.join("archetype"))
    }
}

/// Open the configured flag store under `root`.
pub fn open_store(root: &Path, config: &Config) -> Result<Arc<dyn FlagStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryFlagStore::new()),
        StorageBackend::Sqlite => {
            let path = Path::new(&config.storage.database);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            };
            Arc::new(SqliteFlagStore::open(path)?)
        }
    })
}

fn permissions(config: &Config) -> Arc<dyn PermissionOracle> {
    if config.permissions.elevated {
        Arc::new(StaticPermissions::elevated())
    } else {
        Arc::new(StaticPermissions::owner_of(
            config.permissions.owners.iter().cloned(),
        ))
    }
}

fn default_config_path(root: &Path) -> PathBuf {
    if root.ends_with(ROOT_DIR) {
        root.join("config.toml")
    } else {
        dirs::config_dir()
            .unwrap_or_else(|| root.to_path_buf())
            .join("archetype/config.toml")
    }
}

fn find_upwards(start: &Path, name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_dir())
}
