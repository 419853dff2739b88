use archetype_overlay::config::{Config, StorageBackend, TrackingScope};
use archetype_overlay::test_utils::UnitTestFixture;

#[test]
fn explicit_config_file_overrides_defaults() {
    let fixture = UnitTestFixture::new();
    let path = fixture.create_file(
        "custom.toml",
        r#"
[applicator]
restore_tracking_scope = "class"
item_name_format = "{archetype}: {claim}"

[storage]
backend = "memory"
"#,
    );

    let config = Config::load(Some(&path), &fixture.data_path).unwrap();
    assert_eq!(
        config.applicator.restore_tracking_scope,
        TrackingScope::Class
    );
    assert_eq!(
        config.applicator.item_name("Weapon Guard", "Weapon Master"),
        "Weapon Master: Weapon Guard"
    );
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.storage.database, "archetypes.db");
    assert!(config.permissions.elevated);
}

#[test]
fn project_config_is_read_from_root() {
    let fixture = UnitTestFixture::new();
    let _ = fixture.create_file(
        "config.toml",
        "[permissions]\nelevated = false\nowners = [\"valeros\"]\n",
    );
    let config = Config::load(None, &fixture.data_path).unwrap();
    assert!(!config.permissions.elevated);
    assert!(config.permissions.owners.contains(&"valeros".to_string()));
}

#[test]
fn default_config_serializes_to_loadable_toml() {
    let fixture = UnitTestFixture::new();
    let raw = toml::to_string_pretty(&Config::default()).unwrap();
    let path = fixture.create_file("defaults.toml", &raw);
    let config = Config::load(Some(&path), &fixture.data_path).unwrap();
    assert_eq!(config.applicator.item_name_format, "{claim} ({archetype})");
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
}

#[test]
fn malformed_config_is_an_error() {
    let fixture = UnitTestFixture::new();
    let path = fixture.create_file("broken.toml", "[applicator\nconflict_guard = ");
    let err = Config::load(Some(&path), &fixture.data_path).unwrap_err();
    assert_eq!(err.code(), "config");
}
