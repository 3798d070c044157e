//! End-to-end CLI tests for the sift binary.

use assert_cmd::Command;
use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn sift() -> Command {
    let mut cmd = Command::cargo_bin("sift").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    sift()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Screen bibliographic records"))
        .stdout(predicate::str::contains("download"))
        .stdout(predicate::str::contains("zotero"));
}

#[test]
fn test_binary_version_displays_version() {
    sift()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sift"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    sift().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    sift()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_download_concurrency_out_of_range_rejected() {
    sift()
        .args(["download", "urls.txt", "--concurrency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--concurrency"));
}

#[test]
fn test_download_missing_input_reports_error() {
    let dir = TempDir::new().unwrap();
    sift()
        .arg("download")
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("input file not found"));
}

#[test]
fn test_screen_invalid_config_reports_context() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("review.toml");
    std::fs::write(&config, "[project]\ninput_file = \"in.csv\"\n").unwrap();
    sift()
        .arg("screen")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load screening config"));
}

#[test]
fn test_screen_writes_output_and_prints_summary() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("records.csv"),
        "title,doi,abstract\nA,10.1/a,Soil carbon study\nA copy,10.1/a,Soil carbon study\n",
    )
    .unwrap();
    let config = dir.path().join("review.toml");
    std::fs::write(
        &config,
        "[project]\ninput_file = \"records.csv\"\noutput_file = \"screened.csv\"\n\
         text_column = \"abstract\"\nlog_level = \"low\"\n\
         [filters.deduplication]\nenabled = true\ncompare_fields = [\"doi\"]\n",
    )
    .unwrap();

    sift()
        .arg("-q")
        .arg("screen")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Screened 2 records: 1 included, 1 excluded"))
        .stdout(predicate::str::contains("duplicates_found: 1"));
    assert!(dir.path().join("screened.csv").exists());
}

#[tokio::test]
async fn test_download_url_list_writes_report() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/paper.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4 cli".to_vec()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("urls.txt");
    std::fs::write(&input, format!("{}/paper.pdf\n", server.uri())).unwrap();

    // The mock server needs this runtime while the binary runs.
    let output = tokio::task::spawn_blocking(move || {
        let out = input.parent().unwrap().join("pdfs");
        sift()
            .args(["-q", "download"])
            .arg(&input)
            .arg("--output-dir")
            .arg(&out)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    output
        .assert()
        .success()
        .stdout(predicate::str::contains("Downloaded 1/1 (0 failed)"));
    assert!(dir.path().join("pdfs").join("paper.pdf").exists());
    let report = std::fs::read_to_string(dir.path().join("urls_download.csv")).unwrap();
    assert!(report.contains(",true,,paper.pdf"), "{report}");
}
