//! Server child process handling.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::SUPERVISED_ENV;
use crate::error::{OcrMcpError, Result};

/// How a child's exit is treated by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0, or stopped by SIGINT/SIGTERM. Carries the code to exit with.
    Clean(i32),
    Crash(String),
}

pub fn classify_exit(status: ExitStatus) -> ExitKind {
    match status.code() {
        Some(0) => ExitKind::Clean(0),
        Some(code) => ExitKind::Crash(format!("exited with code {code}")),
        None => classify_signal(status),
    }
}

#[cfg(unix)]
fn classify_signal(status: ExitStatus) -> ExitKind {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(sig) if sig == Signal::SIGINT as i32 || sig == Signal::SIGTERM as i32 => {
            ExitKind::Clean(0)
        }
        Some(sig) => ExitKind::Crash(format!("killed by signal {sig}")),
        None => ExitKind::Crash(format!("terminated abnormally ({status})")),
    }
}

#[cfg(not(unix))]
fn classify_signal(status: ExitStatus) -> ExitKind {
    ExitKind::Crash(format!("terminated abnormally ({status})"))
}

/// Check whether a file has any execute bit set.
///
/// Always true off Unix.
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}

/// Set mode 0o755 on Unix. No-op elsewhere.
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions)?;
        debug!(path = %path.display(), "Set executable permission");
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

/// Launch the server with inherited stdio and the supervised marker set.
pub fn spawn_server(binary: &Path, args: &[String]) -> Result<Child> {
    Command::new(binary)
        .args(args)
        .env(SUPERVISED_ENV, "1")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OcrMcpError::Spawn(format!("{}: {e}", binary.display())))
}

/// Ask the child to stop, killing it if it is still alive after `grace`.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            debug!(pid, "Sending SIGTERM to server");
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                if e != nix::errno::Errno::ESRCH {
                    warn!(pid, error = %e, "Failed to send SIGTERM");
                }
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Server ignored SIGTERM, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use tempfile::TempDir;

    #[test]
    fn test_exit_classification() {
        assert_eq!(classify_exit(ExitStatus::from_raw(0)), ExitKind::Clean(0));
        assert!(matches!(
            classify_exit(ExitStatus::from_raw(3 << 8)),
            ExitKind::Crash(reason) if reason.contains("code 3")
        ));
        assert_eq!(classify_exit(ExitStatus::from_raw(15)), ExitKind::Clean(0));
        assert_eq!(classify_exit(ExitStatus::from_raw(2)), ExitKind::Clean(0));
        assert!(matches!(
            classify_exit(ExitStatus::from_raw(9)),
            ExitKind::Crash(reason) if reason.contains("signal 9")
        ));
    }

    #[test]
    fn test_set_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(!is_executable(&path));
        set_executable(&path).unwrap();
        assert!(is_executable(&path));
        assert!(!is_executable(&dir.path().join("missing")));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let args = vec!["-c".to_string(), "trap '' TERM; sleep 30".to_string()];
        let mut child = spawn_server(Path::new("/bin/sh"), &args).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = terminate_child(&mut child, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(status.signal(), Some(9));
    }
}
