//! Integration tests for CLI argument handling
//!
//! Runs the hkflights binary against a memory store and a local board page.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

const DEPARTURES: &str = include_str!("fixtures/departures.html");

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_hkflights"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute hkflights")
}

/// Serves `body` as text/html to every connection, returning the base URL
fn serve_page(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{}/", addr)
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(
        output.status.success(),
        "Expected --help to exit successfully"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"), "Help should mention serve");
    assert!(stdout.contains("fetch"), "Help should mention fetch");
}

#[test]
fn test_invalid_mode_prints_error_and_exits() {
    let output = run_cli(&["show", "cargo", "--store", "memory"]);
    assert!(!output.status.success(), "Expected invalid mode to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("cargo"),
        "Should name the rejected mode: {}",
        stderr
    );
}

#[test]
fn test_worker_with_memory_store_is_rejected() {
    let output = run_cli(&["worker", "--store", "memory"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("memory"), "stderr was: {}", stderr);
}

#[test]
fn test_show_on_empty_cache_prints_warming_up() {
    let output = run_cli(&["show", "departures", "--store", "memory"]);
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["mode"], "departures");
    assert_eq!(json["flight_count"], 0);
    assert_eq!(json["flights"], serde_json::json!([]));
    assert!(json["error"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("warming up"));
}

#[test]
fn test_fetch_departures_from_local_page() {
    let url = serve_page(DEPARTURES);

    let output = run_cli(&[
        "fetch",
        "departures",
        "--store",
        "memory",
        "--fetcher",
        "http",
        "--departures-url",
        &url,
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["mode"], "departures");
    assert_eq!(json["flight_count"], 3);
    assert!(json.get("error").is_none());
    assert_eq!(
        json["flights"][0]["flight_numbers_only"],
        serde_json::json!(["CX 251", "AA 8900", "BA 4102"])
    );
    assert!(json["last_updated_hkt"].as_str().unwrap().ends_with("+08:00"));
}

#[test]
fn test_fetch_failure_exits_with_status_two() {
    // Nothing listens on port 9 of the loopback in test environments
    let output = run_cli(&[
        "fetch",
        "arrivals",
        "--store",
        "memory",
        "--fetcher",
        "http",
        "--wait-timeout-secs",
        "5",
        "--arrivals-url",
        "http://127.0.0.1:9/",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["flight_count"], 0);
    assert!(json["error"].is_string());
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use hkflights::acquisition::ServePolicy;
    use hkflights::cli::{parse_mode_arg, Cli, Command, StartupConfig, StoreKind};
    use hkflights::data::Mode;

    #[test]
    fn test_cli_fetch_subcommand() {
        let cli = Cli::parse_from(["hkflights", "fetch", "arrivals"]);
        assert_eq!(cli.command, Command::Fetch { mode: Mode::Arrivals });
    }

    #[test]
    fn test_parse_mode_arg_is_case_insensitive() {
        assert_eq!(parse_mode_arg("Departures").unwrap(), Mode::Departures);
        assert!(parse_mode_arg("transfers").is_err());
    }

    #[test]
    fn test_startup_config_for_serve_is_on_demand() {
        let cli = Cli::parse_from(["hkflights", "serve", "--store", "memory"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.acquisition.policy, ServePolicy::OnDemand);
    }

    #[test]
    fn test_startup_config_for_background_serve_is_cache_only() {
        let cli = Cli::parse_from(["hkflights", "serve", "--policy", "background"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.acquisition.policy, ServePolicy::CacheOnly);
    }
}
