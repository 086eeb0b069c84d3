use invstream::catalog::INSTANCE_HOLDINGS_VIEW;
use invstream::sink::Watermarks;
use invstream::utils::{SettingsToml, apply_file_to_opts, catalog_from_file, load_settings_toml};
use invstream::{Opts, ScopeLevel, ViewCatalog};
use std::path::PathBuf;

// --- settings ---

#[test]
fn test_settings_override_only_present_fields() {
    let file = SettingsToml::parse(
        r#"
        [settings]
        db_path = "inventory.db"
        batch_size = 500
        event_high_water = 2000
        "#,
    )
    .unwrap();
    let mut opts = Opts::default();
    let defaults = Opts::default();
    apply_file_to_opts(&file, &mut opts);

    assert_eq!(opts.db_path, Some(PathBuf::from("inventory.db")));
    assert_eq!(opts.batch_size, 500);
    assert_eq!(opts.event_watermarks.high, 2000);
    assert_eq!(opts.event_watermarks.low, defaults.event_watermarks.low);
    assert_eq!(opts.http_watermarks, defaults.http_watermarks);
    assert_eq!(opts.progress_every, defaults.progress_every);
    assert!(!opts.encrypt);
}

#[test]
fn test_low_water_clamped_to_high() {
    let file = SettingsToml::parse("[settings]\nhttp_high_water = 10\nhttp_low_water = 50\n").unwrap();
    let mut opts = Opts::default();
    apply_file_to_opts(&file, &mut opts);
    assert_eq!(opts.http_watermarks, Watermarks::new(10, 10));
}

#[test]
fn test_empty_file_changes_nothing() {
    let file = SettingsToml::parse("").unwrap();
    let mut opts = Opts::default();
    apply_file_to_opts(&file, &mut opts);
    assert_eq!(opts.batch_size, Opts::default().batch_size);
    assert_eq!(catalog_from_file(Some(&file)).unwrap(), ViewCatalog::inventory());
}

#[test]
fn test_bad_toml_is_error() {
    assert!(SettingsToml::parse("[settings\nbatch_size = ").is_err());
    assert!(SettingsToml::parse("[settings]\nbatch_size = \"many\"").is_err());
}

#[test]
fn test_load_missing_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_settings_toml(dir.path()).is_none());
}

#[test]
fn test_load_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".invstream.toml"), "[settings]\nverbose = true\n").unwrap();
    let file = load_settings_toml(dir.path()).unwrap();
    let mut opts = Opts::default();
    apply_file_to_opts(&file, &mut opts);
    assert!(opts.verbose);
}

// --- views ---

#[test]
fn test_no_file_is_inventory_catalog() {
    assert_eq!(catalog_from_file(None).unwrap(), ViewCatalog::inventory());
}

#[test]
fn test_qualifiers_from_file_replace_defaults() {
    let file = SettingsToml::parse(
        r#"
        [views]
        qualifiers = { holdings = "joined_l1", items = "JOINED_L2" }
        "#,
    )
    .unwrap();
    let catalog = catalog_from_file(Some(&file)).unwrap();
    assert_eq!(catalog.scope_of(Some("holdings")), Some(ScopeLevel::JoinedL1));
    assert_eq!(catalog.scope_of(Some("items")), Some(ScopeLevel::JoinedL2));
    assert_eq!(catalog.scope_of(Some("holdingsRecords")), None);
    assert_eq!(catalog.view(ScopeLevel::JoinedL1).view_name, INSTANCE_HOLDINGS_VIEW);
}

#[test]
fn test_views_from_file() {
    let file = SettingsToml::parse(
        r#"
        [views]
        id_column = "rid"

        [[views.view]]
        level = "BASE"
        name = "bib"
        aliases = { BASE = "doc" }

        [[views.view]]
        level = "JOINED_L1"
        name = "bib_hold"
        aliases = { BASE = "doc", JOINED_L1 = "hold_doc" }

        [[views.view]]
        level = "JOINED_L2"
        name = "bib_hold_item"
        aliases = { BASE = "doc", JOINED_L1 = "hold_doc", JOINED_L2 = "item_doc" }
        "#,
    )
    .unwrap();
    let catalog = catalog_from_file(Some(&file)).unwrap();
    assert_eq!(catalog.id_column(), "rid");
    let l2 = catalog.view(ScopeLevel::JoinedL2);
    assert_eq!(l2.view_name, "bib_hold_item");
    assert_eq!(l2.alias(ScopeLevel::JoinedL1), Some("hold_doc"));
}

#[test]
fn test_invalid_views_rejected() {
    let missing_level = SettingsToml::parse(
        r#"
        [[views.view]]
        level = "BASE"
        name = "bib"
        aliases = { BASE = "doc" }
        "#,
    )
    .unwrap();
    assert!(catalog_from_file(Some(&missing_level)).is_err());

    let bad_level = SettingsToml::parse("[views]\nqualifiers = { holdings = \"DEEP\" }\n").unwrap();
    assert!(catalog_from_file(Some(&bad_level)).is_err());

    let base_qualifier = SettingsToml::parse("[views]\nqualifiers = { holdings = \"BASE\" }\n").unwrap();
    assert!(catalog_from_file(Some(&base_qualifier)).is_err());
}
