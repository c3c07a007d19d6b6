#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use common::init_test_logger;
use ocr_mcp::config::SupervisorConfig;
use ocr_mcp::supervisor::{Supervisor, SupervisorState, GAVE_UP_EXIT_CODE};
use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn fast_config(max_restarts: usize) -> SupervisorConfig {
    SupervisorConfig {
        server_binary: None,
        initial_delay_ms: 10,
        max_delay_ms: 40,
        max_restarts,
        window_secs: 60,
        shutdown_grace_ms: 500,
    }
}

fn shell(script: &str, config: SupervisorConfig) -> Supervisor {
    Supervisor::new(
        PathBuf::from("/bin/sh"),
        vec!["-c".to_string(), script.to_string()],
        config,
    )
}

fn launches(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
#[serial]
async fn crash_loop_gives_up_after_budget() {
    init_test_logger();
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches");
    let script = format!("echo run >> '{}'; exit 3", counter.display());

    let mut supervisor = shell(&script, fast_config(5));
    let code = supervisor.run(CancellationToken::new()).await;

    assert_eq!(code, GAVE_UP_EXIT_CODE);
    assert_eq!(launches(&counter), 6);
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
}

#[tokio::test]
#[serial]
async fn clean_exit_is_not_restarted() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches");
    let script = format!("echo run >> '{}'; exit 0", counter.display());

    let mut supervisor = shell(&script, fast_config(5));
    let code = supervisor.run(CancellationToken::new()).await;

    assert_eq!(code, 0);
    assert_eq!(launches(&counter), 1);
}

#[tokio::test]
#[serial]
async fn terminate_signal_counts_as_clean() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches");
    let script = format!("echo run >> '{}'; kill -TERM $$", counter.display());

    let mut supervisor = shell(&script, fast_config(5));
    let code = supervisor.run(CancellationToken::new()).await;

    assert_eq!(code, 0);
    assert_eq!(launches(&counter), 1);
}

#[tokio::test]
#[serial]
async fn recovers_after_transient_crash() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches");
    // Crash on the first two launches, then exit cleanly.
    let script = format!(
        "echo run >> '{c}'; [ $(wc -l < '{c}') -ge 3 ] && exit 0; exit 1",
        c = counter.display()
    );

    let mut supervisor = shell(&script, fast_config(5));
    let code = supervisor.run(CancellationToken::new()).await;

    assert_eq!(code, 0);
    assert_eq!(launches(&counter), 3);
}

#[tokio::test]
#[serial]
async fn missing_executable_bit_is_fixed_once() {
    let dir = TempDir::new().unwrap();
    let server = dir.path().join("server.sh");
    std::fs::write(&server, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&server, std::fs::Permissions::from_mode(0o644)).unwrap();

    let mut supervisor = Supervisor::new(server.clone(), Vec::new(), fast_config(2));
    let code = supervisor.run(CancellationToken::new()).await;

    assert_eq!(code, 0);
    let mode = std::fs::metadata(&server).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
}

#[tokio::test]
#[serial]
async fn missing_binary_is_a_crash() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = Supervisor::new(
        dir.path().join("does-not-exist"),
        Vec::new(),
        fast_config(2),
    );

    let code = supervisor.run(CancellationToken::new()).await;
    assert_eq!(code, GAVE_UP_EXIT_CODE);
}

#[tokio::test]
#[serial]
async fn shutdown_stops_running_server() {
    let mut supervisor = shell("exec sleep 30", fast_config(5));
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let code = supervisor.run(token).await;

    assert_eq!(code, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.state(), SupervisorState::Terminated);
}

#[tokio::test]
#[serial]
async fn shutdown_during_backoff_skips_restart() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("launches");
    let script = format!("echo run >> '{}'; exit 7", counter.display());

    let config = SupervisorConfig {
        initial_delay_ms: 5_000,
        max_delay_ms: 5_000,
        ..fast_config(5)
    };
    let mut supervisor = shell(&script, config);
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let code = supervisor.run(token).await;

    assert_eq!(code, 0);
    assert_eq!(launches(&counter), 1);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
#[serial]
async fn server_sees_supervised_marker() {
    let mut supervisor = shell(
        "[ \"$OCR_MCP_SUPERVISED\" = 1 ] && exit 0; exit 1",
        fast_config(0),
    );

    assert_eq!(supervisor.run(CancellationToken::new()).await, 0);
}

#[tokio::test]
#[serial]
async fn arguments_are_passed_through() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("args");
    let mut supervisor = Supervisor::new(
        PathBuf::from("/bin/sh"),
        vec![
            "-c".to_string(),
            "echo \"$1 $2\" > \"$0\"".to_string(),
            out.display().to_string(),
            "--debug".to_string(),
            "extra".to_string(),
        ],
        fast_config(0),
    );

    assert_eq!(supervisor.run(CancellationToken::new()).await, 0);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "--debug extra\n");
}
