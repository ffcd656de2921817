use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn linkhop() -> Command {
    let mut command = Command::cargo_bin("linkhop").expect("binary should compile");
    command.env("RUST_LOG", "warn");
    command
}

#[test]
fn validate_command_accepts_valid_configuration() {
    let temp = TempDir::new().expect("temp dir should create");
    let config_path = temp.path().join("linkhop.yaml");
    fs::copy("config/linkhop.yaml", config_path).expect("config file should copy");

    linkhop()
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration at"));
}

#[test]
fn validate_command_rejects_invalid_patterns() {
    let temp = TempDir::new().expect("temp dir should create");
    fs::write(
        temp.path().join("linkhop.yaml"),
        "classifier:\n  blacklist: [\"(unclosed\"]\n",
    )
    .expect("config should write");

    linkhop()
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed validation"));
}

#[test]
fn validate_command_reports_missing_files() {
    let temp = TempDir::new().expect("temp dir should create");

    linkhop()
        .args([
            "validate",
            "-c",
            temp.path().to_str().expect("path should stringify"),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn encode_output_decodes_back_to_the_same_context() {
    let output = linkhop()
        .args([
            "encode",
            "--destination",
            "https://dist.example/go?id=1",
            "--title",
            "Some Show",
            "--season",
            "2",
            "--quality",
            "720p HEVC",
        ])
        .output()
        .expect("encode should run");
    assert!(output.status.success());

    let token = String::from_utf8(output.stdout)
        .expect("utf8 token")
        .trim()
        .to_owned();
    assert!(token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

    linkhop()
        .args(["decode", &token])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"destinationRef\": \"https://dist.example/go?id=1\""))
        .stdout(predicate::str::contains("\"qualityHint\": \"720p HEVC\""))
        .stdout(predicate::str::contains("\"season\": \"2\""));
}

#[test]
fn encode_requires_a_destination_or_content_id() {
    linkhop()
        .args(["encode", "--title", "Nothing to route"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--destination or --content-id"));
}

#[test]
fn decode_rejects_malformed_tokens() {
    linkhop()
        .args(["decode", "not a token!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to decode routing token"));
}

#[test]
fn resolve_prints_a_typed_failure_for_unreachable_hosts() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    linkhop()
        .args([
            "resolve",
            &format!("http://{addr}/start"),
            "-c",
            "config/linkhop.yaml",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"failed\""))
        .stdout(predicate::str::contains("\"kind\": \"fetch\""))
        .stdout(predicate::str::contains(format!(
            "\"fallbackUrl\": \"http://{addr}/start\""
        )));
}
