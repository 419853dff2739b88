//! archetype status - Show a class's archetype state

use clap::Args;
use serde::Serialize;

use super::TargetArgs;
use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_robot, robot_ok};
use crate::core::types::FeatureSlot;
use crate::error::Result;
use crate::storage::{ActorTracking, ClassLifecycle};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Serialize)]
struct StatusReport {
    lifecycle: ClassLifecycle,
    revision: u64,
    slots: Vec<FeatureSlot>,
    backup_digest: Option<String>,
    backup_slot_count: Option<usize>,
    tracking: ActorTracking,
    derived_items: usize,
}

pub fn run(ctx: &AppContext, args: &StatusArgs) -> Result<()> {
    let class = args.target.class_ref();
    let state = ctx.applicator.repository().load(&class)?;
    let derived_items = ctx.items.items(&args.target.actor_ref())?.len();

    let report = StatusReport {
        lifecycle: state.lifecycle(),
        revision: state.revision,
        backup_digest: state.backup.as_ref().map(|b| b.digest()).transpose()?,
        backup_slot_count: state.backup.as_ref().map(|b| b.slots.len()),
        slots: state.slots,
        tracking: state.tracking,
        derived_items,
    };
    if ctx.robot() {
        return emit_robot(&robot_ok(report));
    }

    let mut layout = HumanLayout::new();
    layout.title(&format!("{} ({})", class.name, class.actor_id));
    match &report.lifecycle {
        ClassLifecycle::Pristine => layout.kv("State", "pristine"),
        ClassLifecycle::Archetyped { applied } => layout
            .kv("State", "archetyped")
            .kv("Applied", &applied.join(", ")),
    };
    layout.kv("Revision", &report.revision.to_string());
    if let Some(digest) = &report.backup_digest {
        layout.kv("Backup", &digest[..12.min(digest.len())]);
    }
    layout.blank().section("Slots");
    for slot in &report.slots {
        layout.bullet(&format!("L{} {}", slot.level, slot.display_name));
    }
    emit_human(layout);
    Ok(())
}
