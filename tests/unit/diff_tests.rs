use archetype_overlay::core::diff::{
    ChangeSummary, DiffStatus, UnresolvedReason, build_next_slots, count_status, generate_diff,
    unresolved_targets,
};
use archetype_overlay::core::types::{ArchetypeFeatureClaim, FeatureSlot, ParsedArchetype};
use archetype_overlay::test_utils::fixtures::{
    FIGHTER_LEVELS, fighter_slot, fighter_slots, two_handed_fighter, weapon_master,
};
use archetype_overlay::test_utils::{TestCase, run_table_tests};

#[test]
fn twelve_slot_scenario() {
    let slots = fighter_slots();
    assert_eq!(
        slots.iter().map(|s| s.level).collect::<Vec<_>>(),
        FIGHTER_LEVELS.to_vec()
    );

    let diff = generate_diff(&slots, &two_handed_fighter());
    assert_eq!(count_status(&diff, DiffStatus::Removed), 6);
    assert_eq!(count_status(&diff, DiffStatus::Modified), 0);
    // Levels 1, 5, 9, 13, 17 and 20 are untouched.
    assert_eq!(count_status(&diff, DiffStatus::Unchanged), 6);
    // Six replacements plus the level 5 addition.
    assert_eq!(count_status(&diff, DiffStatus::Added), 7);
    let replacing_rows = diff
        .iter()
        .filter(|e| e.status == DiffStatus::Added && e.original_slot.is_some())
        .count();
    assert_eq!(replacing_rows, 6);

    let next = build_next_slots(&diff);
    assert_eq!(next.len(), 12);
    assert!(next.windows(2).all(|w| w[0].level <= w[1].level));
}

#[test]
fn next_slots_keep_original_identity() {
    let diff = generate_diff(&fighter_slots(), &two_handed_fighter());
    let next = build_next_slots(&diff);
    // Replacement names do not survive; the replaced slot keeps its id and name.
    assert_eq!(next, fighter_slots());
    assert!(!next.iter().any(|s| s.display_name == "Shattering Strike"));
}

#[test]
fn diff_rows_sorted_by_level_with_slot_rows_first() {
    let diff = generate_diff(&fighter_slots(), &two_handed_fighter());
    assert!(diff.windows(2).all(|w| w[0].level <= w[1].level));

    let level_two: Vec<(DiffStatus, &str)> = diff
        .iter()
        .filter(|e| e.level == 2)
        .map(|e| (e.status, e.name.as_str()))
        .collect();
    assert_eq!(
        level_two,
        vec![
            (DiffStatus::Removed, "Bravery"),
            (DiffStatus::Added, "Shattering Strike"),
        ]
    );

    let level_five: Vec<(DiffStatus, &str)> = diff
        .iter()
        .filter(|e| e.level == 5)
        .map(|e| (e.status, e.name.as_str()))
        .collect();
    assert_eq!(
        level_five,
        vec![
            (DiffStatus::Unchanged, "Weapon Training 1"),
            (DiffStatus::Added, "Two-Handed Training"),
        ]
    );
}

#[test]
fn modification_keeps_slot_at_claim_level() {
    let diff = generate_diff(&fighter_slots(), &weapon_master());
    let modified: Vec<_> = diff
        .iter()
        .filter(|e| e.status == DiffStatus::Modified)
        .collect();
    assert_eq!(modified.len(), 2);
    assert_eq!(modified[0].name, "Weapon Guard");
    assert_eq!(
        modified[0].original_slot.as_ref().map(|s| s.display_name.as_str()),
        Some("Weapon Training 1")
    );
    assert_eq!(build_next_slots(&diff).len(), 12);
}

#[test]
fn unmatched_target_is_surfaced_not_dropped() {
    let ghost = FeatureSlot::new("weapon-specialization", 4, "Weapon Specialization");
    let archetype = ParsedArchetype::new("Lore Warden", "lore-warden", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("Scholastic", 4, ghost.clone()));

    let diff = generate_diff(&fighter_slots(), &archetype);
    assert_eq!(count_status(&diff, DiffStatus::Unchanged), 12);
    assert_eq!(count_status(&diff, DiffStatus::Removed), 0);

    let unresolved = unresolved_targets(&diff);
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].claim_name, "Scholastic");
    assert_eq!(unresolved[0].target, ghost);
    assert_eq!(unresolved[0].reason, UnresolvedReason::MissingSlot);
    // Unresolved rows never take a slot.
    assert_eq!(build_next_slots(&diff).len(), 12);
}

#[test]
fn second_claim_on_same_slot_is_unresolved() {
    let archetype = ParsedArchetype::new("Greedy", "greedy", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("First", 2, fighter_slot(2)))
        .with_claim(ArchetypeFeatureClaim::modifying("Second", 2, fighter_slot(2)));

    let diff = generate_diff(&fighter_slots(), &archetype);
    assert_eq!(count_status(&diff, DiffStatus::Removed), 1);
    assert_eq!(count_status(&diff, DiffStatus::Modified), 0);
    let unresolved = unresolved_targets(&diff);
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].claim_name, "Second");
    assert_eq!(
        unresolved[0].reason,
        UnresolvedReason::AlreadyClaimed {
            by: "First".to_string()
        }
    );
    assert!(!unresolved[0].message().contains("no Bravery feature"));
}

#[test]
fn change_summary_groups() -> Result<(), String> {
    let cases = vec![
        TestCase {
            name: "replacements_and_addition",
            input: two_handed_fighter(),
            expected: (6usize, 7usize, 0usize),
            should_panic: false,
        },
        TestCase {
            name: "modifications_only",
            input: weapon_master(),
            expected: (0, 0, 2),
            should_panic: false,
        },
        TestCase {
            name: "no_claims",
            input: ParsedArchetype::new("Empty", "empty", "fighter"),
            expected: (0, 0, 0),
            should_panic: false,
        },
    ];

    run_table_tests(cases, |archetype| {
        let summary = ChangeSummary::from_diff(&generate_diff(&fighter_slots(), &archetype));
        (
            summary.removed.len(),
            summary.added.len(),
            summary.modified.len(),
        )
    })
}

#[test]
fn change_summary_render() {
    let summary = ChangeSummary::from_diff(&generate_diff(&fighter_slots(), &weapon_master()));
    assert_eq!(summary.render(), "Modified: Weapon Guard, Reliable Strike");
    assert_eq!(ChangeSummary::default().render(), "No changes");
}
