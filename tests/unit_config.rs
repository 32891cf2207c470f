use std::fs;

use libres::config::{BookSeed, Config, CONFIG_FILE};
use libres::error::Error;
use libres::expiry::ClaimPolicy;

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_or_default(&dir.path().join(CONFIG_FILE)).expect("defaults");

    assert_eq!(config.reservations.workers, 5);
    assert_eq!(config.reservations.queue_capacity, 256);
    assert_eq!(config.reservations.window, "5s");
    assert_eq!(
        config.reservations.claim.policy().expect("policy"),
        ClaimPolicy::Random {
            max: std::time::Duration::from_secs(8)
        }
    );
    assert_eq!(config.catalog.members.len(), 3);
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join(CONFIG_FILE);
    let toml = r#"
[reservations]
workers = 12
window = "2m"

[reservations.claim]
mode = "never"

[catalog]
books = [
    { title = "Rust Atomics and Locks", author = "M. Bos" },
    { title = "Programming Rust", author = "J. Blandy" },
]
members = []
"#;
    fs::write(&config_path, toml)?;

    let config = Config::load(&config_path)?;
    assert_eq!(config.reservations.workers, 12);
    assert_eq!(config.reservations.queue_capacity, 256);
    assert_eq!(config.reservations.window()?, chrono::Duration::minutes(2));
    assert_eq!(config.reservations.claim.policy()?, ClaimPolicy::Never);
    assert_eq!(
        config.catalog.books[1],
        BookSeed::new("Programming Rust", "J. Blandy")
    );
    assert!(config.catalog.members.is_empty());
    Ok(())
}

#[test]
fn invalid_file_is_not_replaced_by_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join(CONFIG_FILE);
    fs::write(&config_path, "[reservations]\nworkers = 0\n")?;

    match Config::load_or_default(&config_path) {
        Err(Error::InvalidConfig(message)) => assert!(message.contains("workers")),
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}
