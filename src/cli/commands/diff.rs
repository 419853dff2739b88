//! archetype diff - Show what archetypes would change on a class

use std::path::PathBuf;

use clap::Args;
use console::style;
use serde::Serialize;

use super::{TargetArgs, load_archetypes};
use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::core::diff::{
    ChangeSummary, DiffEntry, DiffStatus, UnresolvedTarget, build_next_slots, unresolved_targets,
};
use crate::core::types::ParsedArchetype;
use crate::error::{OverlayError, Result};

#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Archetype definition files; several are stacked in order
    #[arg(required = true)]
    pub archetypes: Vec<PathBuf>,
}

#[derive(Serialize)]
struct DiffReport {
    archetype: String,
    entries: Vec<DiffEntry>,
    summary: ChangeSummary,
    unresolved: Vec<UnresolvedTarget>,
    next_slot_count: usize,
}

pub fn run(ctx: &AppContext, args: &DiffArgs) -> Result<()> {
    let archetypes = load_archetypes(&args.archetypes)?;
    let stack = ParsedArchetype::combine(&archetypes)
        .ok_or_else(|| OverlayError::ValidationFailed("no archetypes given".to_string()))?;
    let class = args.target.class_ref();
    let entries = ctx.applicator.preview(&class, &stack)?;

    let report = DiffReport {
        archetype: stack.name,
        summary: ChangeSummary::from_diff(&entries),
        unresolved: unresolved_targets(&entries),
        next_slot_count: build_next_slots(&entries).len(),
        entries,
    };
    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout.title(&format!("{} on {}", report.archetype, class.name));
    for entry in &report.entries {
        layout.push_line(format!(
            "L{:<3} {} {}",
            entry.level,
            status_label(entry.status),
            entry.name
        ));
    }
    layout.blank().push_line(report.summary.render());
    for target in &report.unresolved {
        layout.push_line(format!("{} {}", style("unresolved").yellow(), target.message()));
    }
    emit_human(layout);
    Ok(())
}

fn status_label(status: DiffStatus) -> String {
    match status {
        DiffStatus::Unchanged => style("unchanged").dim().to_string(),
        DiffStatus::Removed => style("removed  ").red().to_string(),
        DiffStatus::Added => style("added    ").green().to_string(),
        DiffStatus::Modified => style("modified ").cyan().to_string(),
    }
}
