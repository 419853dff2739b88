use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use super::doubles::{FailingStore, RecordingItemFactory, RecordingNotifier};
use crate::config::ApplicatorConfig;
use crate::core::applicator::{ApplyOutcome, Applicator};
use crate::core::types::{ActorRef, ArchetypeFeatureClaim, ClassRef, FeatureSlot, ParsedArchetype};
use crate::ports::{PermissionOracle, StaticPermissions};
use crate::storage::ClassState;

/// Levels of the twelve-slot fighter progression.
pub const FIGHTER_LEVELS: [u32; 12] = [1, 2, 3, 5, 7, 9, 11, 13, 15, 17, 19, 20];

/// Test fixture providing isolated filesystem environment.
pub struct UnitTestFixture {
    pub temp_dir: TempDir,
    pub data_path: PathBuf,
}

impl Default for UnitTestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitTestFixture {
    #[must_use]
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data_path = temp_dir.path().to_path_buf();
        println!("[FIXTURE] Created temp directory: {data_path:?}");
        Self {
            temp_dir,
            data_path,
        }
    }

    /// Create a test file with content.
    #[must_use]
    pub fn create_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full_path = self.data_path.join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::fs::write(&full_path, content).expect("Failed to write file");
        println!(
            "[FIXTURE] Created file: {:?} ({} bytes)",
            full_path,
            content.len()
        );
        full_path
    }

    /// Write an archetype definition as JSON under `archetypes/`.
    #[must_use]
    pub fn create_archetype(&self, archetype: &ParsedArchetype) -> PathBuf {
        let json = serde_json::to_string_pretty(archetype).expect("Failed to encode archetype");
        self.create_file(&format!("archetypes/{}.json", archetype.slug), &json)
    }
}

/// The base fighter progression, one slot per entry of [`FIGHTER_LEVELS`].
#[must_use]
pub fn fighter_slots() -> Vec<FeatureSlot> {
    vec![
        FeatureSlot::new("bonus-feat", 1, "Bonus Feat"),
        FeatureSlot::new("bravery", 2, "Bravery"),
        FeatureSlot::new("armor-training-1", 3, "Armor Training 1"),
        FeatureSlot::new("weapon-training-1", 5, "Weapon Training 1"),
        FeatureSlot::new("armor-training-2", 7, "Armor Training 2"),
        FeatureSlot::new("weapon-training-2", 9, "Weapon Training 2"),
        FeatureSlot::new("armor-training-3", 11, "Armor Training 3"),
        FeatureSlot::new("weapon-training-3", 13, "Weapon Training 3"),
        FeatureSlot::new("armor-training-4", 15, "Armor Training 4"),
        FeatureSlot::new("weapon-training-4", 17, "Weapon Training 4"),
        FeatureSlot::new("armor-mastery", 19, "Armor Mastery"),
        FeatureSlot::new("weapon-mastery", 20, "Weapon Mastery"),
    ]
}

/// Slot of [`fighter_slots`] at `level`.
#[must_use]
pub fn fighter_slot(level: u32) -> FeatureSlot {
    fighter_slots()
        .into_iter()
        .find(|slot| slot.level == level)
        .expect("no fighter slot at that level")
}

/// Six replacements (levels 2, 3, 7, 11, 15, 19) and one addition at 5.
#[must_use]
pub fn two_handed_fighter() -> ParsedArchetype {
    ParsedArchetype::new("Two-Handed Fighter", "two-handed-fighter", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("Shattering Strike", 2, fighter_slot(2)))
        .with_claim(ArchetypeFeatureClaim::replacing("Overhand Chop", 3, fighter_slot(3)))
        .with_claim(ArchetypeFeatureClaim::additive("Two-Handed Training", 5))
        .with_claim(ArchetypeFeatureClaim::replacing("Backswing", 7, fighter_slot(7)))
        .with_claim(ArchetypeFeatureClaim::replacing("Piledriver", 11, fighter_slot(11)))
        .with_claim(ArchetypeFeatureClaim::replacing(
            "Greater Power Attack",
            15,
            fighter_slot(15),
        ))
        .with_claim(ArchetypeFeatureClaim::replacing("Devastating Blow", 19, fighter_slot(19)))
}

/// Replaces Bravery only.
#[must_use]
pub fn brawler() -> ParsedArchetype {
    ParsedArchetype::new("Brawler", "brawler", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("Close Control", 2, fighter_slot(2)))
}

/// Replaces Bravery, spelled with a qualifier and a rank.
#[must_use]
pub fn bravery_variant() -> ParsedArchetype {
    let mut target = fighter_slot(2);
    target.display_name = "BRAVERY (Ex) I".to_string();
    ParsedArchetype::new("Free Hand Fighter", "free-hand-fighter", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("Deceptive Strike", 2, target))
}

/// Replaces Armor Training 1 only.
#[must_use]
pub fn armor_master() -> ParsedArchetype {
    ParsedArchetype::new("Armor Master", "armor-master", "fighter")
        .with_claim(ArchetypeFeatureClaim::replacing("Deflective Shield", 3, fighter_slot(3)))
}

/// Modifies the level 5 and level 9 weapon training slots.
#[must_use]
pub fn weapon_master() -> ParsedArchetype {
    ParsedArchetype::new("Weapon Master", "weapon-master", "fighter")
        .with_claim(ArchetypeFeatureClaim::modifying(
            "Weapon Guard",
            5,
            fighter_slot(5),
        ))
        .with_claim(ArchetypeFeatureClaim::modifying(
            "Reliable Strike",
            9,
            fighter_slot(9),
        ))
}

/// A fully wired applicator over a fresh fighter, with recording doubles.
pub struct Harness {
    pub store: Arc<FailingStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub items: Arc<RecordingItemFactory>,
    pub applicator: Applicator,
    pub actor: ActorRef,
    pub class: ClassRef,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Elevated permissions, default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with(
            Arc::new(StaticPermissions::elevated()),
            ApplicatorConfig::default(),
        )
    }

    #[must_use]
    pub fn with(permissions: Arc<dyn PermissionOracle>, config: ApplicatorConfig) -> Self {
        let store = Arc::new(FailingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let items = Arc::new(RecordingItemFactory::new());
        let applicator = Applicator::new(
            store.clone(),
            permissions,
            notifier.clone(),
            items.clone(),
        )
        .with_config(config);
        let actor = ActorRef::new("valeros", "Valeros");
        let class = ClassRef::new("valeros", "fighter-1", "Fighter", "fighter");
        applicator
            .repository()
            .register_class(&class, fighter_slots())
            .expect("Failed to register fighter");
        Self {
            store,
            notifier,
            items,
            applicator,
            actor,
            class,
        }
    }

    /// Preview against the live slots, then apply that diff.
    pub fn apply(&self, archetype: &ParsedArchetype) -> ApplyOutcome {
        let diff = self
            .applicator
            .preview(&self.class, archetype)
            .expect("Failed to diff");
        self.applicator
            .apply(&self.actor, &self.class, archetype, &diff)
    }

    #[must_use]
    pub fn state(&self) -> ClassState {
        self.applicator
            .repository()
            .load(&self.class)
            .expect("Failed to load class")
    }

    #[must_use]
    pub fn slots(&self) -> Vec<FeatureSlot> {
        self.state().slots
    }
}
