//! Archetype overlay core: name normalization, diffing, conflict detection
//! and the per-class application state machine.

pub mod applicator;
pub mod conflict;
pub mod diff;
pub mod normalize;
pub mod types;

pub use applicator::{
    ApplyOutcome, ApplyReport, Applicator, Rejection, RemoveOutcome, RemoveReport, RestoreOutcome,
};
pub use conflict::{CanApply, Conflict, StackingReport, check_can_apply, validate_stacking};
pub use diff::{
    ChangeSummary, DiffEntry, DiffStatus, UnresolvedReason, UnresolvedTarget, build_next_slots,
    generate_diff,
};
pub use normalize::{normalize, same_feature};
pub use types::{
    ActorRef, ArchetypeFeatureClaim, ClaimKind, ClassRef, FeatureRef, FeatureSlot,
    ParsedArchetype,
};
