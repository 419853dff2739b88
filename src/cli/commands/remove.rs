//! archetype remove - Take one archetype off a class's stack

use clap::Args;

use super::TargetArgs;
use crate::app::AppContext;
use crate::cli::output::{emit_robot, robot_ok};
use crate::core::applicator::RemoveOutcome;
use crate::error::Result;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Slug of the archetype to remove
    pub slug: String,
}

pub fn run(ctx: &AppContext, args: &RemoveArgs) -> Result<()> {
    let actor = args.target.actor_ref();
    let class = args.target.class_ref();

    let report = match ctx.applicator.remove(&actor, &class, &args.slug) {
        RemoveOutcome::Removed(report) => report,
        RemoveOutcome::Rejected(rejection) => return Err(rejection.into()),
    };
    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    if report.remaining.is_empty() {
        println!("Removed {}; {} has no archetypes left", report.slug, class.name);
    } else {
        println!(
            "Removed {}; still applied: {}",
            report.slug,
            report.remaining.join(", ")
        );
    }
    Ok(())
}
