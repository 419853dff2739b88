//! archetype apply - Apply one archetype or a batch

use std::path::PathBuf;

use clap::Args;

use super::{TargetArgs, load_archetypes};
use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::core::applicator::{ApplyOutcome, Rejection};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Archetype definition files; several are validated and applied together
    #[arg(required = true)]
    pub archetypes: Vec<PathBuf>,
}

pub fn run(ctx: &AppContext, args: &ApplyArgs) -> Result<()> {
    let archetypes = load_archetypes(&args.archetypes)?;
    let actor = args.target.actor_ref();
    let class = args.target.class_ref();

    let outcome = match archetypes.as_slice() {
        [] => ApplyOutcome::Rejected(Rejection::EmptyBatch),
        [single] => {
            let diff = ctx.applicator.preview(&class, single)?;
            ctx.applicator.apply(&actor, &class, single, &diff)
        }
        batch => ctx.applicator.apply_batch(&actor, &class, batch),
    };

    let report = match outcome {
        ApplyOutcome::Applied(report) => report,
        ApplyOutcome::Rejected(rejection) => return Err(rejection.into()),
    };
    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout
        .title(&format!("Applied {} to {}", report.slugs.join(", "), class.name))
        .kv("Revision", &report.revision.to_string())
        .kv("Slots", &report.slot_count.to_string())
        .kv("Backup", if report.backup_created { "created" } else { "kept" });
    if !report.derived_items.is_empty() {
        layout.kv("Derived items", &report.derived_items.len().to_string());
    }
    emit_human(layout);
    Ok(())
}
