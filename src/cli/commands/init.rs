//! archetype init - Create a project-local data directory

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::app::{AppContext, ROOT_DIR, open_store};
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::config::Config;
use crate::error::{OverlayError, Result};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config.toml with the defaults
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Serialize)]
struct InitReport {
    root: PathBuf,
    config_path: PathBuf,
    config_written: bool,
}

pub fn run(ctx: &AppContext, args: &InitArgs) -> Result<()> {
    run_without_context(ctx.robot(), args)
}

/// Initialize without loading an existing root; `init` is what creates it.
pub fn run_without_context(robot: bool, args: &InitArgs) -> Result<()> {
    let root = match std::env::var("ARCHETYPE_ROOT") {
        Ok(root) => PathBuf::from(root),
        Err(_) => std::env::current_dir()?.join(ROOT_DIR),
    };
    std::fs::create_dir_all(&root)?;

    let config_path = root.join("config.toml");
    let config_written = if config_path.exists() && !args.force {
        false
    } else {
        let defaults = toml::to_string_pretty(&Config::default())
            .map_err(|err| OverlayError::Serialization(format!("encode config: {err}")))?;
        std::fs::write(&config_path, defaults)?;
        true
    };

    let config = Config::load(Some(&config_path), &root)?;
    open_store(&root, &config)?;
    tracing::info!(root = %root.display(), config_written, "initialized archetype root");

    let report = InitReport {
        root,
        config_path,
        config_written,
    };
    if robot {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout
        .title("Initialized archetype root")
        .kv("Root", &report.root.display().to_string())
        .kv("Config", &report.config_path.display().to_string());
    if !report.config_written {
        layout.blank().push_line("Kept existing config.toml (use --force to reset it)");
    }
    emit_human(layout);
    Ok(())
}
