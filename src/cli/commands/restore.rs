//! archetype restore - Put a class back to its original features

use clap::Args;

use super::TargetArgs;
use crate::app::AppContext;
use crate::cli::output::{emit_robot, robot_ok};
use crate::core::applicator::Rejection;
use crate::error::Result;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub fn run(ctx: &AppContext, args: &RestoreArgs) -> Result<()> {
    let actor = args.target.actor_ref();
    let class = args.target.class_ref();
    let outcome = ctx.applicator.restore_from_backup(&actor, &class);

    if !outcome.success {
        let rejection = outcome.rejection.unwrap_or(Rejection::NoBackupFound);
        return Err(rejection.into());
    }
    if ctx.robot() {
        return emit_robot(&robot_ok(outcome));
    }
    println!(
        "{}: {} features restored on {}",
        outcome.message, outcome.restored_count, class.name
    );
    Ok(())
}
