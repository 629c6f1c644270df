//! Integration tests for command-line handling of the binary.

use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_caching-proxy"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute caching-proxy")
}

#[test]
fn test_help_lists_all_flags() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--port", "--origin", "--clear-cache", "--cache-file"] {
        assert!(stdout.contains(flag), "help should mention {flag}: {stdout}");
    }
}

#[test]
fn test_missing_origin_is_a_usage_error() {
    let output = run_cli(&["--port", "8080"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("--port and --origin are required"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_missing_port_is_a_usage_error() {
    let output = run_cli(&["--origin", "http://localhost:9000"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_origin_is_a_usage_error() {
    let output = run_cli(&["--port", "8080", "--origin", "localhost:9000"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid --origin"), "unexpected stderr: {stderr}");
}

#[test]
fn test_clear_cache_removes_file_and_ignores_serve_flags() {
    let dir = TempDir::new().unwrap();
    let cache_file = dir.path().join("proxy_cache.json");
    std::fs::write(&cache_file, br#"{"version":1,"entries":{"http://o/a":[104,105]}}"#).unwrap();

    let output = run_cli(&[
        "--clear-cache",
        "--port",
        "8080",
        "--cache-file",
        cache_file.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Cache cleared."));
    assert!(!cache_file.exists());
}

#[test]
fn test_port_zero_is_a_usage_error_when_serving() {
    let output = run_cli(&["--port", "0", "--origin", "http://localhost:9000"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--port must be between"), "unexpected stderr: {stderr}");
}

#[test]
fn test_clear_cache_with_port_zero_still_clears() {
    let dir = TempDir::new().unwrap();
    let cache_file = dir.path().join("proxy_cache.json");
    std::fs::write(&cache_file, br#"{"version":1,"entries":{}}"#).unwrap();

    let output = run_cli(&[
        "--clear-cache",
        "--port",
        "0",
        "--cache-file",
        cache_file.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert!(!cache_file.exists());
}

#[test]
fn test_clear_cache_without_file_succeeds() {
    let dir = TempDir::new().unwrap();
    let cache_file = dir.path().join("never_written.json");

    let output = run_cli(&["--clear-cache", "--cache-file", cache_file.to_str().unwrap()]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Cache cleared."));
}
