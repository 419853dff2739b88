//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - run() function to execute the command

use std::path::PathBuf;

use clap::{Args, Subcommand};

pub mod apply;
pub mod check;
pub mod class;
pub mod diff;
pub mod init;
pub mod remove;
pub mod restore;
pub mod status;

use crate::app::AppContext;
use crate::core::types::{ActorRef, ClassRef, ParsedArchetype};
use crate::error::Result;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a project-local .archetype/ directory with a default config
    Init(init::InitArgs),

    /// Manage class feature progressions
    Class(class::ClassArgs),

    /// Show what one or more archetypes would change
    Diff(diff::DiffArgs),

    /// Check archetypes for conflicts with what is already applied
    Check(check::CheckArgs),

    /// Apply one archetype, or a stack of archetypes in one commit
    Apply(apply::ApplyArgs),

    /// Restore a class to its pre-archetype features
    Restore(restore::RestoreArgs),

    /// Remove one archetype from a class's stack
    Remove(remove::RemoveArgs),

    /// Show a class's archetype state
    Status(status::StatusArgs),
}

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init::run(ctx, args),
        Commands::Class(args) => class::run(ctx, args),
        Commands::Diff(args) => diff::run(ctx, args),
        Commands::Check(args) => check::run(ctx, args),
        Commands::Apply(args) => apply::run(ctx, args),
        Commands::Restore(args) => restore::run(ctx, args),
        Commands::Remove(args) => remove::run(ctx, args),
        Commands::Status(args) => status::run(ctx, args),
    }
}

/// Which class of which actor a command targets.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Owning actor id
    #[arg(long)]
    pub actor: String,

    /// Actor display name (defaults to the id)
    #[arg(long)]
    pub actor_name: Option<String>,

    /// Class record id
    #[arg(long)]
    pub class: String,

    /// Class display name (defaults to the id)
    #[arg(long)]
    pub class_name: Option<String>,

    /// Class tag used for actor-level tracking (defaults to the id)
    #[arg(long)]
    pub tag: Option<String>,
}

impl TargetArgs {
    #[must_use]
    pub fn actor_ref(&self) -> ActorRef {
        ActorRef::new(
            self.actor.clone(),
            self.actor_name.clone().unwrap_or_else(|| self.actor.clone()),
        )
    }

    #[must_use]
    pub fn class_ref(&self) -> ClassRef {
        ClassRef::new(
            self.actor.clone(),
            self.class.clone(),
            self.class_name.clone().unwrap_or_else(|| self.class.clone()),
            self.tag.clone().unwrap_or_else(|| self.class.clone()),
        )
    }
}

/// Load archetype definition files, in argument order.
pub fn load_archetypes(paths: &[PathBuf]) -> Result<Vec<ParsedArchetype>> {
    paths.iter().map(|path| ParsedArchetype::load(path)).collect()
}
