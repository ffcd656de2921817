use std::fs;

use linkhop::{
    config::Config,
    state::{reload_app_state_from_path, AppState, SharedAppState},
};
use tempfile::TempDir;

const INITIAL_CONFIG: &str = r#"
resolver:
  max_hops: 2
codec:
  legacy_base_url: "https://initial.example/?p="
"#;

const UPDATED_CONFIG: &str = r#"
resolver:
  max_hops: 3
codec:
  legacy_base_url: "https://updated.example/?p="
"#;

const INVALID_CONFIG: &str = r#"
resolver:
  max_hops: 3
classifier:
  hosts:
    - name: "Broken"
      pattern: "(unclosed"
      tier: preferred
"#;

fn legacy_start(state: &SharedAppState) -> String {
    let snapshot = state.snapshot();
    let context = linkhop::codec::decode("1234").expect("numeric id should decode");
    snapshot
        .codec()
        .start_url(&context)
        .expect("legacy base url should be configured")
        .to_string()
}

#[test]
fn reload_replaces_state_on_success() {
    let temp = TempDir::new().expect("temp dir should create");
    let config_path = temp.path().join("linkhop.yaml");
    fs::write(&config_path, INITIAL_CONFIG).expect("config should write");

    let config = Config::load_from_path(&config_path).expect("config should load");
    let shared = SharedAppState::new(AppState::from_config(&config).expect("state should build"));
    assert_eq!(legacy_start(&shared), "https://initial.example/?p=1234");

    fs::write(&config_path, UPDATED_CONFIG).expect("config should update");
    reload_app_state_from_path(&config_path, &shared).expect("reload should succeed");

    assert_eq!(legacy_start(&shared), "https://updated.example/?p=1234");
    assert_eq!(shared.snapshot().config().resolver.max_hops, 3);
}

#[test]
fn reload_preserves_state_when_validation_fails() {
    let temp = TempDir::new().expect("temp dir should create");
    let config_path = temp.path().join("linkhop.yaml");
    fs::write(&config_path, INITIAL_CONFIG).expect("config should write");

    let config = Config::load_from_path(&config_path).expect("config should load");
    let shared = SharedAppState::new(AppState::from_config(&config).expect("state should build"));

    fs::write(&config_path, INVALID_CONFIG).expect("config should update");
    let result = reload_app_state_from_path(&config_path, &shared);
    assert!(result.is_err(), "reload should fail for invalid config");

    assert_eq!(legacy_start(&shared), "https://initial.example/?p=1234");
    assert_eq!(shared.snapshot().config().resolver.max_hops, 2);
}
