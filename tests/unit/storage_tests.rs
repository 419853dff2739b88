use std::sync::Arc;

use archetype_overlay::OverlayError;
use archetype_overlay::core::applicator::Applicator;
use archetype_overlay::core::types::{ActorRef, ClassRef};
use archetype_overlay::ports::{StaticPermissions, TracingNotifier};
use archetype_overlay::storage::{
    ClassCommit, ClassRepository, FlagStore, SqliteFlagStore, StoreItemFactory,
};
use archetype_overlay::test_utils::UnitTestFixture;
use archetype_overlay::test_utils::fixtures::{fighter_slots, two_handed_fighter, weapon_master};

fn fighter() -> ClassRef {
    ClassRef::new("valeros", "fighter-1", "Fighter", "fighter")
}

#[test]
fn sqlite_state_survives_reopen() {
    let fixture = UnitTestFixture::new();
    let path = fixture.data_path.join("campaign/archetypes.db");

    {
        let store: Arc<dyn FlagStore> = Arc::new(SqliteFlagStore::open(&path).unwrap());
        let applicator = Applicator::new(
            Arc::clone(&store),
            Arc::new(StaticPermissions::elevated()),
            Arc::new(TracingNotifier),
            Arc::new(StoreItemFactory::new(Arc::clone(&store))),
        );
        let actor = ActorRef::new("valeros", "Valeros");
        applicator
            .repository()
            .register_class(&fighter(), fighter_slots())
            .unwrap();
        let archetype = weapon_master();
        let diff = applicator.preview(&fighter(), &archetype).unwrap();
        assert!(applicator.apply(&actor, &fighter(), &archetype, &diff).is_applied());
    }

    let store: Arc<dyn FlagStore> = Arc::new(SqliteFlagStore::open(&path).unwrap());
    let state = ClassRepository::new(Arc::clone(&store)).load(&fighter()).unwrap();
    assert_eq!(state.revision, 2);
    assert_eq!(state.backup.as_ref().unwrap().slots, fighter_slots());
    assert_eq!(state.applied_slugs(), ["weapon-master".to_string()]);

    let items = StoreItemFactory::new(store)
        .items(&ActorRef::new("valeros", "Valeros"))
        .unwrap();
    assert_eq!(items.len(), 2);
}

#[test]
fn sqlite_rejects_stale_commit() {
    let store: Arc<dyn FlagStore> = Arc::new(SqliteFlagStore::open_in_memory().unwrap());
    let repo = ClassRepository::new(store);
    repo.register_class(&fighter(), fighter_slots()).unwrap();

    let mut stale = ClassCommit::new(&fighter(), 0);
    stale.slots = Some(Vec::new());
    assert!(matches!(
        repo.commit("apply", stale),
        Err(OverlayError::StaleRevision {
            expected: 0,
            found: 1,
            ..
        })
    ));
    assert_eq!(repo.load(&fighter()).unwrap().slots, fighter_slots());
}

#[test]
fn backup_round_trips_losslessly() {
    let store: Arc<dyn FlagStore> = Arc::new(SqliteFlagStore::open_in_memory().unwrap());
    let applicator = Applicator::new(
        Arc::clone(&store),
        Arc::new(StaticPermissions::elevated()),
        Arc::new(TracingNotifier),
        Arc::new(StoreItemFactory::new(Arc::clone(&store))),
    );
    let actor = ActorRef::new("valeros", "Valeros");
    applicator
        .repository()
        .register_class(&fighter(), fighter_slots())
        .unwrap();
    let archetype = two_handed_fighter();
    let diff = applicator.preview(&fighter(), &archetype).unwrap();
    applicator.apply(&actor, &fighter(), &archetype, &diff);

    let first = applicator.repository().load(&fighter()).unwrap();
    let second = applicator.repository().load(&fighter()).unwrap();
    let (a, b) = (first.backup.unwrap(), second.backup.unwrap());
    assert_eq!(a, b);
    assert_eq!(a.digest().unwrap(), b.digest().unwrap());
}
