// ABOUTME: Integration tests for the jumpgate CLI commands.
// ABOUTME: Validates --help output, init, fingerprint and serve startup failures.

use assert_cmd::Command;
use predicates::prelude::*;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey};
use std::fs;

fn jumpgate_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("jumpgate"))
}

#[test]
fn help_shows_commands() {
    jumpgate_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("fingerprint"));
}

#[test]
fn init_creates_config_and_credentials() {
    let temp_dir = tempfile::tempdir().unwrap();

    jumpgate_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created jumpgate.yml"));

    let config = fs::read_to_string(temp_dir.path().join("jumpgate.yml")).unwrap();
    assert!(config.contains("credentials: credentials.yml"));
    let credentials = fs::read_to_string(temp_dir.path().join("credentials.yml")).unwrap();
    assert!(credentials.contains("acl:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("jumpgate.yml");

    fs::write(&config_path, "credentials: mine.yml").unwrap();

    jumpgate_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read_to_string(&config_path).unwrap(), "credentials: mine.yml");
}

#[test]
fn init_force_overwrites() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("jumpgate.yml");
    fs::write(&config_path, "credentials: mine.yml").unwrap();

    jumpgate_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();

    assert!(fs::read_to_string(&config_path).unwrap().contains("listen:"));
}

#[test]
fn fingerprint_prints_sha256() {
    let temp_dir = tempfile::tempdir().unwrap();
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    let expected = key
        .public_key()
        .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
        .to_string();
    let path = temp_dir.path().join("id_ed25519.pub");
    fs::write(&path, key.public_key().to_openssh().unwrap()).unwrap();

    jumpgate_cmd()
        .arg("fingerprint")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("SHA256:"))
        .stdout(predicate::str::contains(expected));
}

#[test]
fn fingerprint_rejects_garbage() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("not_a_key.pub");
    fs::write(&path, "hello world").unwrap();

    jumpgate_cmd()
        .arg("fingerprint")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid public key"));
}

#[test]
fn serve_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();

    jumpgate_cmd()
        .current_dir(temp_dir.path())
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn serve_with_missing_credentials_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(
        temp_dir.path().join("jumpgate.yml"),
        "listen: 127.0.0.1:0\ncredentials: absent.yml\n",
    )
    .unwrap();

    jumpgate_cmd()
        .current_dir(temp_dir.path())
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
