//! End-to-end CLI tests for the mango binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

/// Command with the config lookup pointed at an empty directory.
fn mango(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mango").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download manga chapters"))
        .stdout(predicate::str::contains("--chapters"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mango"));
}

#[test]
fn test_binary_requires_manifest() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("MANIFEST"));
}

#[test]
fn test_binary_invalid_chapter_selection_returns_error() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .args(["m.json", "--chapters", "1-2-3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_missing_manifest_returns_error() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .arg(home.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load manifest"));
}

#[test]
fn test_binary_mangadex_url_without_id_returns_error() {
    let home = TempDir::new().unwrap();
    mango(home.path())
        .arg("https://mangadex.org/title/not-a-series")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open MangaDex series"));
}

#[test]
fn test_binary_invalid_config_returns_error() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "concurrency = 0\n").unwrap();

    mango(home.path())
        .arg("m.json")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_downloads_manifest_into_output_dir() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    for page in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/p/{page}.jpg")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("page {page}")))
            .mount(&server)
            .await;
    }

    let work = TempDir::new().unwrap();
    let manifest = work.path().join("series.json");
    let uri = server.uri();
    let body = serde_json::json!({
        "title": "E2E Series",
        "chapters": [
            {
                "number": 7,
                "title": "",
                "language": "en",
                "pages": [format!("{uri}/p/1.jpg"), format!("{uri}/p/2.jpg"), format!("{uri}/p/3.jpg")],
            }
        ]
    });
    std::fs::write(&manifest, body.to_string()).unwrap();
    let output = work.path().join("out");
    let config_home = work.path().to_path_buf();

    let out_arg = output.clone();
    let assert = tokio::task::spawn_blocking(move || {
        mango(&config_home)
            .arg(&manifest)
            .arg("-o")
            .arg(&out_arg)
            .args(["-q", "--rate-limit", "0"])
            .assert()
    })
    .await
    .unwrap();

    assert.success();
    assert!(output.join("E2E Series - Chapter 7.cbz").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_exits_non_zero_when_every_chapter_fails() {
    let Some(server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let work = TempDir::new().unwrap();
    let manifest = work.path().join("series.json");
    let body = serde_json::json!({
        "title": "Broken",
        "chapters": [
            { "number": 1, "language": "en", "pages": [format!("{}/p/1.jpg", server.uri())] }
        ]
    });
    std::fs::write(&manifest, body.to_string()).unwrap();
    let config_home = work.path().to_path_buf();
    let output = work.path().join("out");

    let assert = tokio::task::spawn_blocking(move || {
        mango(&config_home)
            .arg(&manifest)
            .arg("-o")
            .arg(&output)
            .args(["--rate-limit", "0"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .failure()
        .stderr(predicate::str::contains("selected chapters failed"));
}
