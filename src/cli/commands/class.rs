//! archetype class - Manage class feature progressions

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use super::TargetArgs;
use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::core::types::FeatureSlot;
use crate::error::{OverlayError, Result};
use crate::ports::{CatalogResolver, SlotGrant, resolve_slots};

#[derive(Args, Debug)]
pub struct ClassArgs {
    #[command(subcommand)]
    pub command: ClassCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClassCommand {
    /// Seed a class's slots from a JSON list of feature grants
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// JSON array of `{ "id", "level", "fallback_name"? }` grants
    pub grants: PathBuf,

    /// JSON object mapping feature ids to display names
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

#[derive(Serialize)]
struct ImportReport {
    class: String,
    revision: u64,
    slots: Vec<FeatureSlot>,
}

pub fn run(ctx: &AppContext, args: &ClassArgs) -> Result<()> {
    match &args.command {
        ClassCommand::Import(import) => run_import(ctx, import),
    }
}

fn run_import(ctx: &AppContext, args: &ImportArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.grants).map_err(|err| {
        OverlayError::NotFound(format!("read grants {}: {err}", args.grants.display()))
    })?;
    let grants: Vec<SlotGrant> = serde_json::from_str(&raw)?;
    let resolver = match &args.catalog {
        Some(path) => CatalogResolver::load(path)?,
        None => CatalogResolver::new(),
    };
    let slots = resolve_slots(&resolver, &grants);

    let class = args.target.class_ref();
    let revision = ctx
        .applicator
        .repository()
        .register_class(&class, slots.clone())?;

    let report = ImportReport {
        class: class.id,
        revision,
        slots,
    };
    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout.title(&format!("Imported {} features", report.slots.len()));
    for slot in &report.slots {
        layout.bullet(&format!("L{} {}", slot.level, slot.display_name));
    }
    emit_human(layout);
    Ok(())
}
