use proptest::prelude::*;

use archetype_overlay::core::conflict::validate_stacking;
use archetype_overlay::core::diff::{DiffStatus, build_next_slots, count_status, generate_diff};
use archetype_overlay::core::types::{ArchetypeFeatureClaim, FeatureSlot, ParsedArchetype};

/// What an archetype does to one slot.
#[derive(Debug, Clone, Copy)]
pub enum Touch {
    Keep,
    Replace,
    Modify,
}

pub fn slots_strategy() -> impl Strategy<Value = Vec<FeatureSlot>> {
    prop::collection::vec(1u32..=20, 0..16).prop_map(|mut levels| {
        levels.sort_unstable();
        levels
            .into_iter()
            .enumerate()
            .map(|(i, level)| FeatureSlot::new(format!("slot-{i}"), level, format!("Feature {i}")))
            .collect()
    })
}

fn touch_strategy() -> impl Strategy<Value = Touch> {
    prop_oneof![Just(Touch::Keep), Just(Touch::Replace), Just(Touch::Modify)]
}

/// Slots plus an archetype touching some of them and adding `additive` claims.
pub fn scenario_strategy() -> impl Strategy<Value = (Vec<FeatureSlot>, Vec<Touch>, usize)> {
    slots_strategy().prop_flat_map(|slots| {
        let n = slots.len();
        (
            Just(slots),
            prop::collection::vec(touch_strategy(), n),
            0usize..4,
        )
    })
}

pub fn build_archetype(
    slug: &str,
    slots: &[FeatureSlot],
    touches: &[Touch],
    additive: usize,
) -> ParsedArchetype {
    let mut archetype = ParsedArchetype::new(slug, slug, "fighter");
    for (slot, touch) in slots.iter().zip(touches) {
        let name = format!("{slug} {}", slot.display_name);
        match touch {
            Touch::Keep => {}
            Touch::Replace => {
                archetype = archetype.with_claim(ArchetypeFeatureClaim::replacing(
                    name,
                    slot.level,
                    slot.clone(),
                ));
            }
            Touch::Modify => {
                archetype = archetype.with_claim(ArchetypeFeatureClaim::modifying(
                    name,
                    slot.level,
                    slot.clone(),
                ));
            }
        }
    }
    for i in 0..additive {
        archetype = archetype.with_claim(ArchetypeFeatureClaim::additive(
            format!("{slug} bonus {i}"),
            u32::try_from(i).unwrap_or(0) + 1,
        ));
    }
    archetype
}

fn count_touch(touches: &[Touch], wanted: fn(&Touch) -> bool) -> usize {
    touches.iter().filter(|t| wanted(t)).count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn no_claims_yield_only_unchanged(slots in slots_strategy()) {
        let archetype = ParsedArchetype::new("Empty", "empty", "fighter");
        let diff = generate_diff(&slots, &archetype);
        prop_assert_eq!(diff.len(), slots.len());
        prop_assert!(diff.iter().all(|e| e.status == DiffStatus::Unchanged));
    }

    #[test]
    fn matched_claims_account_for_every_row((slots, touches, additive) in scenario_strategy()) {
        let archetype = build_archetype("arch", &slots, &touches, additive);
        let diff = generate_diff(&slots, &archetype);

        let replaced = count_touch(&touches, |t| matches!(t, Touch::Replace));
        let modified = count_touch(&touches, |t| matches!(t, Touch::Modify));

        prop_assert_eq!(count_status(&diff, DiffStatus::Removed), replaced);
        prop_assert_eq!(count_status(&diff, DiffStatus::Modified), modified);
        prop_assert_eq!(count_status(&diff, DiffStatus::Added), replaced + additive);
        prop_assert_eq!(
            count_status(&diff, DiffStatus::Unchanged),
            slots.len() - replaced - modified
        );
    }

    #[test]
    fn next_slots_length_excludes_additions((slots, touches, additive) in scenario_strategy()) {
        let archetype = build_archetype("arch", &slots, &touches, additive);
        let diff = generate_diff(&slots, &archetype);
        let removed = count_status(&diff, DiffStatus::Removed);
        let added_with_slot = diff
            .iter()
            .filter(|e| e.status == DiffStatus::Added && e.original_slot.is_some())
            .count();

        let next = build_next_slots(&diff);
        prop_assert_eq!(next.len(), slots.len() - removed + added_with_slot);
        prop_assert_eq!(next.len(), slots.len());
    }

    #[test]
    fn diff_is_level_ordered((slots, touches, additive) in scenario_strategy()) {
        let archetype = build_archetype("arch", &slots, &touches, additive);
        let diff = generate_diff(&slots, &archetype);
        prop_assert!(diff.windows(2).all(|w| w[0].level <= w[1].level));
    }

    #[test]
    fn stacking_validity_ignores_order(
        (slots, first, _) in scenario_strategy(),
        second_seed in prop::collection::vec(touch_strategy(), 16),
    ) {
        let second: Vec<Touch> = second_seed.into_iter().take(slots.len()).collect();
        let a = build_archetype("a", &slots, &first, 0);
        let b = build_archetype("b", &slots, &second, 0);
        let forward = validate_stacking(&[a.clone(), b.clone()]);
        let backward = validate_stacking(&[b, a]);
        prop_assert_eq!(forward.valid, backward.valid);
        prop_assert_eq!(forward.conflicts.len(), backward.conflicts.len());
    }
}
