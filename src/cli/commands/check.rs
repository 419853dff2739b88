//! archetype check - Conflict check against the applied stack

use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use serde::Serialize;

use super::{TargetArgs, load_archetypes};
use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::core::conflict::{Conflict, validate_stacking};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Archetype definition files to check, alone or as a batch
    #[arg(required = true)]
    pub archetypes: Vec<PathBuf>,
}

#[derive(Serialize)]
struct CheckReport {
    can_apply: bool,
    conflicts: Vec<Conflict>,
    blocked_by: Vec<String>,
}

pub fn run(ctx: &AppContext, args: &CheckArgs) -> Result<()> {
    let archetypes = load_archetypes(&args.archetypes)?;
    let class = args.target.class_ref();

    let report = if let [single] = archetypes.as_slice() {
        let check = ctx.applicator.check(&class, single)?;
        CheckReport {
            can_apply: check.can_apply,
            conflicts: check.conflicts,
            blocked_by: check.blocked_by,
        }
    } else {
        let state = ctx.applicator.repository().load(&class)?;
        let mut stack = state.history().to_vec();
        stack.extend(archetypes);
        let stacking = validate_stacking(&stack);
        let blocked_by = stacking
            .conflicts
            .iter()
            .map(|conflict| conflict.blocking_archetype.clone())
            .unique()
            .collect();
        CheckReport {
            can_apply: stacking.valid,
            conflicts: stacking.conflicts,
            blocked_by,
        }
    };

    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    if report.can_apply {
        layout.push_line(format!("No conflicts on {}", class.name));
    } else {
        layout.section("Conflicts");
        for conflict in &report.conflicts {
            layout.bullet(&format!(
                "{}: {} and {}",
                conflict.feature_name, conflict.archetype, conflict.blocking_archetype
            ));
        }
    }
    emit_human(layout);
    Ok(())
}
