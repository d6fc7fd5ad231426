use std::fs;

use weekboard::config::{Config, CONFIG_FILE};

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_root(dir.path());

    assert_eq!(config.store.data_dir, "data");
    assert!(config.store.lock_timeout_ms > 0);
    assert_eq!(config.schedule.full_day_shift, "DIA INTEIRO");
    assert!(!config.schedule.auto_create_weeks);
    assert_eq!(config.actor.default, "sistema");
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let toml = r#"
[store]
data_dir = "board-data"
lock_timeout_ms = 250

[schedule]
full_day_shift = "INTEGRAL"
auto_create_weeks = true

[actor]
default = "portaria"
"#;
    fs::write(dir.path().join(CONFIG_FILE), toml)?;

    let config = Config::load_from_root(dir.path());

    assert_eq!(config.store.data_dir, "board-data");
    assert_eq!(config.store.lock_timeout_ms, 250);
    assert_eq!(config.schedule.full_day_shift, "INTEGRAL");
    assert!(config.schedule.auto_create_weeks);
    assert_eq!(config.actor.default, "portaria");
    Ok(())
}

#[test]
fn invalid_config_is_rejected_and_ignored() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, "[store]\ndata_dir = \"../outside\"\n")?;

    assert!(matches!(
        Config::load(&path),
        Err(weekboard::Error::InvalidConfig(_))
    ));
    assert_eq!(Config::load_from_root(dir.path()).store.data_dir, "data");
    Ok(())
}

#[test]
fn config_round_trips_through_save() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(CONFIG_FILE);

    let mut config = Config::default();
    config.schedule.auto_create_weeks = true;
    config.save(&path)?;

    let loaded = Config::load(&path)?;
    assert!(loaded.schedule.auto_create_weeks);
    assert_eq!(loaded.store.data_dir, config.store.data_dir);
    Ok(())
}
