use std::sync::Arc;

use archetype_overlay::config::{ApplicatorConfig, TrackingScope};
use archetype_overlay::core::applicator::{ApplyOutcome, Rejection, RemoveOutcome};
use archetype_overlay::core::types::{
    ActorRef, ArchetypeFeatureClaim, ClassRef, FeatureSlot, ParsedArchetype,
};
use archetype_overlay::ports::StaticPermissions;
use archetype_overlay::storage::ClassLifecycle;
use archetype_overlay::test_utils::fixtures::{
    bravery_variant, brawler, fighter_slot, fighter_slots, two_handed_fighter, weapon_master,
};
use archetype_overlay::test_utils::logging::init_test_logging;
use archetype_overlay::test_utils::{Harness, NoticeLevel};
use archetype_overlay::assert_log_contains;

fn applied(outcome: &ApplyOutcome) -> &archetype_overlay::core::applicator::ApplyReport {
    match outcome {
        ApplyOutcome::Applied(report) => report,
        ApplyOutcome::Rejected(rejection) => panic!("expected apply, got {rejection:?}"),
    }
}

fn rogue() -> ClassRef {
    ClassRef::new("valeros", "rogue-1", "Rogue", "rogue")
}

fn scout() -> ParsedArchetype {
    ParsedArchetype::new("Scout", "scout", "rogue").with_claim(ArchetypeFeatureClaim::replacing(
        "Scout's Charge",
        4,
        FeatureSlot::new("uncanny-dodge", 4, "Uncanny Dodge"),
    ))
}

fn register_rogue(h: &Harness) {
    h.applicator
        .repository()
        .register_class(
            &rogue(),
            vec![
                FeatureSlot::new("sneak-attack", 1, "Sneak Attack"),
                FeatureSlot::new("uncanny-dodge", 4, "Uncanny Dodge"),
            ],
        )
        .unwrap();
}

#[test]
fn apply_twice_is_idempotent() {
    let h = Harness::new();
    let archetype = two_handed_fighter();

    let first = h.apply(&archetype);
    let report = applied(&first);
    assert!(report.backup_created);
    assert_eq!(report.slugs, vec!["two-handed-fighter".to_string()]);
    let backup = h.state().backup.unwrap();
    let commits = h.store.commits();

    let second = h.apply(&archetype);
    assert_eq!(
        second.rejection(),
        Some(&Rejection::AlreadyApplied {
            slug: "two-handed-fighter".to_string()
        })
    );
    let after = h.state().backup.unwrap();
    assert_eq!(after, backup);
    assert_eq!(after.digest().unwrap(), backup.digest().unwrap());
    assert_eq!(h.store.commits(), commits);
    assert!(h.notifier.contains(NoticeLevel::Warn, "already applied"));
}

#[test]
fn backup_is_captured_once() {
    let h = Harness::new();
    assert!(applied(&h.apply(&two_handed_fighter())).backup_created);
    let report = h.apply(&weapon_master());
    assert!(!applied(&report).backup_created);

    let state = h.state();
    assert_eq!(state.backup.as_ref().unwrap().slots, fighter_slots());
    assert_eq!(
        state.lifecycle(),
        ClassLifecycle::Archetyped {
            applied: vec!["two-handed-fighter".to_string(), "weapon-master".to_string()]
        }
    );
    assert_eq!(
        state.tracking["fighter"],
        vec!["two-handed-fighter".to_string(), "weapon-master".to_string()]
    );
}

#[test]
fn twelve_slots_persist_after_apply() {
    let h = Harness::new();
    let report = h.apply(&two_handed_fighter());
    assert_eq!(applied(&report).slot_count, 12);
    assert_eq!(applied(&report).summary.removed.len(), 6);
    // Only the replaced slots' identities are persisted.
    assert_eq!(h.slots(), fighter_slots());

    let record = h.state().record.unwrap();
    assert_eq!(record.last_applied_archetype, two_handed_fighter());
    assert_eq!(record.applied_slugs, vec!["two-handed-fighter".to_string()]);
}

#[test]
fn restore_round_trip() {
    let h = Harness::new();
    applied(&h.apply(&two_handed_fighter()));
    applied(&h.apply(&weapon_master()));

    let outcome = h.applicator.restore_from_backup(&h.actor, &h.class);
    assert!(outcome.success);
    assert_eq!(outcome.restored_count, 12);
    assert_eq!(outcome.message, "Restored");

    let state = h.state();
    assert_eq!(state.slots, fighter_slots());
    assert!(state.backup.is_none());
    assert!(state.record.is_none());
    assert!(state.tracking.is_empty());
    assert_eq!(state.lifecycle(), ClassLifecycle::Pristine);

    let again = h.applicator.restore_from_backup(&h.actor, &h.class);
    assert!(!again.success);
    assert_eq!(again.message, "No backup found");
    assert_eq!(again.rejection, Some(Rejection::NoBackupFound));
    assert!(h.notifier.contains(NoticeLevel::Warn, "No archetype backup"));
}

#[test]
fn restore_keeps_derived_items_unless_configured() {
    let h = Harness::new();
    applied(&h.apply(&weapon_master()));
    h.applicator.restore_from_backup(&h.actor, &h.class);
    assert_eq!(h.items.live().len(), 2);

    let config = ApplicatorConfig {
        discard_derived_items_on_restore: true,
        ..ApplicatorConfig::default()
    };
    let h = Harness::with(Arc::new(StaticPermissions::elevated()), config);
    applied(&h.apply(&weapon_master()));
    h.applicator.restore_from_backup(&h.actor, &h.class);
    assert!(h.items.live().is_empty());
    assert_eq!(h.items.discarded().len(), 2);
}

#[test]
fn restore_clears_whole_actor_tracking_by_default() {
    let h = Harness::new();
    register_rogue(&h);
    applied(&h.apply(&brawler()));
    let diff = h.applicator.preview(&rogue(), &scout()).unwrap();
    applied(&h.applicator.apply(&h.actor, &rogue(), &scout(), &diff));
    assert_eq!(h.state().tracking.len(), 2);

    assert!(h.applicator.restore_from_backup(&h.actor, &h.class).success);
    assert!(h.state().tracking.is_empty());
    // The rogue itself is still archetyped.
    assert!(matches!(
        h.applicator.state(&rogue()).unwrap(),
        ClassLifecycle::Archetyped { .. }
    ));
}

#[test]
fn restore_with_class_scope_keeps_other_classes() {
    let config = ApplicatorConfig {
        restore_tracking_scope: TrackingScope::Class,
        ..ApplicatorConfig::default()
    };
    let h = Harness::with(Arc::new(StaticPermissions::elevated()), config);
    register_rogue(&h);
    applied(&h.apply(&brawler()));
    let diff = h.applicator.preview(&rogue(), &scout()).unwrap();
    applied(&h.applicator.apply(&h.actor, &rogue(), &scout(), &diff));

    assert!(h.applicator.restore_from_backup(&h.actor, &h.class).success);
    let tracking = h.state().tracking;
    assert!(!tracking.contains_key("fighter"));
    assert_eq!(tracking["rogue"], vec!["scout".to_string()]);
}

#[test]
fn permission_denied_writes_nothing() {
    let h = Harness::with(
        Arc::new(StaticPermissions::denied()),
        ApplicatorConfig::default(),
    );
    let commits = h.store.commits();

    let outcome = h.apply(&two_handed_fighter());
    assert_eq!(outcome.rejection(), Some(&Rejection::PermissionDenied));
    assert!(h.state().backup.is_none());
    assert_eq!(h.store.commits(), commits);

    let restore = h.applicator.restore_from_backup(&h.actor, &h.class);
    assert!(!restore.success);
    assert_eq!(restore.message, "Permission denied");
    assert!(h.notifier.contains(NoticeLevel::Warn, "permission"));
}

#[test]
fn owners_may_modify_their_actor() {
    let h = Harness::with(
        Arc::new(StaticPermissions::owner_of(["valeros"])),
        ApplicatorConfig::default(),
    );
    assert!(h.apply(&brawler()).is_applied());
}

#[test]
fn acting_for_another_actor_is_denied() {
    let h = Harness::with(
        Arc::new(StaticPermissions::owner_of(["valeros"])),
        ApplicatorConfig::default(),
    );
    let foreign = ClassRef::new("kyra", "cleric-1", "Fighter", "fighter");
    h.applicator
        .repository()
        .register_class(&foreign, fighter_slots())
        .unwrap();
    let commits = h.store.commits();

    let archetype = two_handed_fighter();
    let diff = h.applicator.preview(&foreign, &archetype).unwrap();
    let outcome = h.applicator.apply(&h.actor, &foreign, &archetype, &diff);
    assert_eq!(outcome.rejection(), Some(&Rejection::PermissionDenied));

    let batch = h
        .applicator
        .apply_batch(&h.actor, &foreign, &[weapon_master()]);
    assert_eq!(batch.rejection(), Some(&Rejection::PermissionDenied));
    assert_eq!(
        h.applicator.remove(&h.actor, &foreign, "two-handed-fighter"),
        RemoveOutcome::Rejected(Rejection::PermissionDenied)
    );
    assert!(!h.applicator.restore_from_backup(&h.actor, &foreign).success);

    assert_eq!(h.store.commits(), commits);
    assert_eq!(
        h.applicator.state(&foreign).unwrap(),
        ClassLifecycle::Pristine
    );
    // Naming the right actor is not enough without control over it.
    let kyra = ActorRef::new("kyra", "Kyra");
    let diff = h.applicator.preview(&foreign, &archetype).unwrap();
    assert_eq!(
        h.applicator
            .apply(&kyra, &foreign, &archetype, &diff)
            .rejection(),
        Some(&Rejection::PermissionDenied)
    );
}

#[test]
fn elevated_caller_must_still_name_the_class_actor() {
    let h = Harness::new();
    let foreign = ClassRef::new("kyra", "fighter-2", "Fighter", "fighter");
    h.applicator
        .repository()
        .register_class(&foreign, fighter_slots())
        .unwrap();

    let archetype = brawler();
    let diff = h.applicator.preview(&foreign, &archetype).unwrap();
    assert_eq!(
        h.applicator
            .apply(&h.actor, &foreign, &archetype, &diff)
            .rejection(),
        Some(&Rejection::PermissionDenied)
    );

    let kyra = ActorRef::new("kyra", "Kyra");
    assert!(h
        .applicator
        .apply(&kyra, &foreign, &archetype, &diff)
        .is_applied());
    // The harness class of the other actor is untouched.
    assert!(h.state().backup.is_none());
}

#[test]
fn persistence_failure_rolls_back_everything() {
    let h = Harness::new();
    h.store.fail_commits(true);

    let outcome = h.apply(&weapon_master());
    assert!(matches!(
        outcome.rejection(),
        Some(Rejection::PersistenceFailure { .. })
    ));
    let state = h.state();
    assert!(state.backup.is_none());
    assert!(state.record.is_none());
    assert_eq!(state.slots, fighter_slots());
    // The two derived copies were created, then discarded.
    assert!(h.items.live().is_empty());
    assert_eq!(h.items.discarded().len(), 2);
    assert_eq!(h.notifier.at(NoticeLevel::Error).len(), 1);

    h.store.fail_commits(false);
    assert!(h.apply(&weapon_master()).is_applied());
}

#[test]
fn item_factory_failure_aborts_before_commit() {
    let h = Harness::new();
    let commits = h.store.commits();
    h.items.fail_create(true);

    let outcome = h.apply(&weapon_master());
    assert!(matches!(
        outcome.rejection(),
        Some(Rejection::PersistenceFailure { .. })
    ));
    assert_eq!(h.store.commits(), commits);
    assert!(h.state().backup.is_none());
}

#[test]
fn modified_features_get_derived_copies() {
    let h = Harness::new();
    let outcome = h.apply(&weapon_master());
    assert_eq!(applied(&outcome).derived_items.len(), 2);

    let names: Vec<String> = h.items.live().into_iter().map(|(_, spec)| spec.name).collect();
    assert_eq!(
        names,
        vec![
            "Weapon Guard (Weapon Master)".to_string(),
            "Reliable Strike (Weapon Master)".to_string()
        ]
    );
    assert!(h.items.live().iter().all(|(_, spec)| spec.derived_modified_copy
        && spec.source_archetype == "weapon-master"));

    let record = h.state().record.unwrap();
    assert_eq!(record.derived_items["weapon-master"].len(), 2);
}

#[test]
fn conflict_guard_blocks_competing_archetype() {
    let guarded = ApplicatorConfig {
        conflict_guard: true,
        ..ApplicatorConfig::default()
    };
    let h = Harness::with(Arc::new(StaticPermissions::elevated()), guarded);
    applied(&h.apply(&brawler()));
    let outcome = h.apply(&bravery_variant());
    let Some(Rejection::Conflicts { conflicts }) = outcome.rejection() else {
        panic!("expected conflicts, got {outcome:?}");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].feature_name, "Bravery");

    // Without the guard the caller is trusted to have checked.
    let h = Harness::new();
    applied(&h.apply(&brawler()));
    assert!(h.apply(&bravery_variant()).is_applied());
}

#[test]
fn batch_applies_in_one_commit() {
    let h = Harness::new();
    let commits = h.store.commits();
    let outcome = h
        .applicator
        .apply_batch(&h.actor, &h.class, &[two_handed_fighter(), weapon_master()]);
    let report = applied(&outcome);
    assert_eq!(
        report.slugs,
        vec!["two-handed-fighter".to_string(), "weapon-master".to_string()]
    );
    assert_eq!(h.store.commits(), commits + 1);

    let record = h.state().record.unwrap();
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.last_applied_archetype.slug, "weapon-master");
    // Derived copies are credited to the archetype that owns the claim.
    assert_eq!(record.derived_items["weapon-master"].len(), 2);
    assert!(h
        .items
        .live()
        .iter()
        .all(|(_, spec)| spec.name.ends_with("(Weapon Master)")));
}

#[test]
fn batch_rejections() {
    let h = Harness::new();
    let conflicting = h
        .applicator
        .apply_batch(&h.actor, &h.class, &[brawler(), bravery_variant()]);
    assert!(matches!(
        conflicting.rejection(),
        Some(Rejection::Conflicts { .. })
    ));

    let empty = h.applicator.apply_batch(&h.actor, &h.class, &[]);
    assert_eq!(empty.rejection(), Some(&Rejection::EmptyBatch));

    applied(&h.apply(&brawler()));
    let duplicate = h
        .applicator
        .apply_batch(&h.actor, &h.class, &[weapon_master(), brawler()]);
    assert_eq!(
        duplicate.rejection(),
        Some(&Rejection::AlreadyApplied {
            slug: "brawler".to_string()
        })
    );

    // Conflicts against what is already applied count too.
    let against_applied = h
        .applicator
        .apply_batch(&h.actor, &h.class, &[bravery_variant(), weapon_master()]);
    assert!(matches!(
        against_applied.rejection(),
        Some(Rejection::Conflicts { .. })
    ));
    assert!(h.state().backup.is_some());
}

#[test]
fn remove_replays_remaining_stack() {
    let h = Harness::new();
    applied(&h.apply(&two_handed_fighter()));
    applied(&h.apply(&weapon_master()));

    let RemoveOutcome::Removed(report) =
        h.applicator.remove(&h.actor, &h.class, "two-handed-fighter")
    else {
        panic!("expected removal");
    };
    assert_eq!(report.remaining, vec!["weapon-master".to_string()]);
    assert_eq!(report.slot_count, 12);

    let state = h.state();
    assert_eq!(state.backup.as_ref().unwrap().slots, fighter_slots());
    assert_eq!(state.applied_slugs(), ["weapon-master".to_string()]);
    assert_eq!(state.tracking["fighter"], vec!["weapon-master".to_string()]);
    assert_eq!(h.items.live().len(), 2);

    assert!(h
        .applicator
        .remove(&h.actor, &h.class, "weapon-master")
        .is_removed());
    let state = h.state();
    assert_eq!(state.lifecycle(), ClassLifecycle::Pristine);
    assert_eq!(state.slots, fighter_slots());
    assert!(state.tracking.is_empty());
    assert!(h.items.live().is_empty());
}

#[test]
fn remove_unknown_slug_is_rejected() {
    let h = Harness::new();
    assert_eq!(
        h.applicator.remove(&h.actor, &h.class, "brawler"),
        RemoveOutcome::Rejected(Rejection::NotApplied {
            slug: "brawler".to_string()
        })
    );
    applied(&h.apply(&weapon_master()));
    assert!(!h.applicator.remove(&h.actor, &h.class, "brawler").is_removed());
}

#[test]
fn concurrent_applies_of_same_archetype_commit_once() {
    let h = Harness::new();
    let archetype = two_handed_fighter();
    let outcomes: Vec<ApplyOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| h.apply(&archetype))).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
    assert!(outcomes.iter().filter(|o| !o.is_applied()).all(|o| matches!(
        o.rejection(),
        Some(Rejection::AlreadyApplied { .. })
    )));
    let state = h.state();
    assert_eq!(state.applied_slugs().len(), 1);
    assert_eq!(state.revision, 2);
}

#[test]
fn concurrent_stacking_keeps_both() {
    let h = Harness::new();
    let (a, b) = (two_handed_fighter(), weapon_master());
    std::thread::scope(|scope| {
        scope.spawn(|| applied(&h.apply(&a)).revision);
        scope.spawn(|| applied(&h.apply(&b)).revision);
    });
    let state = h.state();
    assert_eq!(state.applied_slugs().len(), 2);
    assert_eq!(state.backup.as_ref().unwrap().slots, fighter_slots());
    assert_eq!(state.revision, 3);
}

#[test]
fn concurrent_applies_to_sibling_classes_keep_all_tracking() {
    const CLASSES: usize = 4;
    const ROUNDS: usize = 25;

    let h = Harness::new();
    let classes: Vec<ClassRef> = (0..CLASSES)
        .map(|i| {
            ClassRef::new(
                "valeros",
                format!("drill-class-{i}"),
                format!("Drill Class {i}"),
                format!("drill-{i}"),
            )
        })
        .collect();
    for class in &classes {
        h.applicator
            .repository()
            .register_class(class, vec![FeatureSlot::new("drill", 1, "Drill")])
            .unwrap();
    }

    for round in 0..ROUNDS {
        std::thread::scope(|scope| {
            for class in &classes {
                let h = &h;
                scope.spawn(move || {
                    let archetype = ParsedArchetype::new(
                        format!("Form {round}"),
                        format!("form-{round}"),
                        class.tag.clone(),
                    )
                    .with_claim(ArchetypeFeatureClaim::additive("Extra Drill", 2));
                    let diff = h.applicator.preview(class, &archetype).unwrap();
                    applied(&h.applicator.apply(&h.actor, class, &archetype, &diff));
                });
            }
        });
    }

    let tracking = h
        .applicator
        .repository()
        .load(&classes[0])
        .unwrap()
        .tracking;
    for class in &classes {
        assert_eq!(tracking[&class.tag].len(), ROUNDS, "tag {}", class.tag);
        let state = h.applicator.repository().load(class).unwrap();
        assert_eq!(state.applied_slugs().len(), ROUNDS);
    }
}

#[test]
fn slot_claimed_twice_gets_its_own_notice() {
    let h = Harness::new();
    let greedy = ParsedArchetype::new("Greedy", "greedy", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("First", 2, fighter_slot(2)))
        .with_claim(ArchetypeFeatureClaim::replacing("Second", 2, fighter_slot(2)));

    let report = applied(&h.apply(&greedy)).clone();
    assert_eq!(report.unresolved.len(), 1);
    assert!(h
        .notifier
        .contains(NoticeLevel::Warn, "Second: Bravery is already claimed by First"));
    assert!(!h.notifier.contains(NoticeLevel::Warn, "no Bravery feature"));
}

#[test]
fn apply_is_logged() {
    let _guard = init_test_logging("archetype_overlay=info");
    let h = Harness::new();
    applied(&h.apply(&brawler()));
    assert_log_contains!(tracing::Level::INFO, "applied archetype");
}
