//! Bounded invocation of the dezoomify-rs deep-zoom downloader.

use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::DezoomConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DezoomError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("exited with {0}")]
    Failed(ExitStatus),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns a running child and kills it unless it was reaped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child, reaped: false }
    }

    /// Poll until the child exits or `timeout` elapses.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, std::io::Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Download a deep-zoom image from `url` into `output`.
pub fn download(config: &DezoomConfig, url: &str, output: &Path) -> Result<(), DezoomError> {
    let mut cmd = Command::new(&config.command);
    cmd.arg(format!("--compression={}", config.compression))
        .arg(format!("--max-height={}", config.max_dim))
        .arg(format!("--max-width={}", config.max_dim))
        .arg("--")
        .arg(url)
        .arg(output);

    run_bounded(cmd, Duration::from_secs(config.timeout_secs))
}

/// Run a command to completion within `timeout`; the child is killed if the
/// bound is exceeded or waiting fails.
pub fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<(), DezoomError> {
    let child = cmd.spawn().map_err(|source| DezoomError::Spawn {
        command: cmd.get_program().to_string_lossy().to_string(),
        source,
    })?;
    let mut guard = ChildGuard::new(child);

    match guard.wait_timeout(timeout)? {
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(DezoomError::Failed(status)),
        None => Err(DezoomError::Timeout(timeout)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_success() {
        assert!(run_bounded(sh("exit 0"), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_failure_status() {
        let err = run_bounded(sh("exit 3"), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DezoomError::Failed(s) if s.code() == Some(3)));
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 2; touch {}", marker.display());

        let started = Instant::now();
        let err = run_bounded(sh(&script), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, DezoomError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));

        // The killed child never gets to write its marker
        thread::sleep(Duration::from_millis(2500));
        assert!(!marker.exists());
    }

    #[test]
    fn test_missing_binary() {
        let config = DezoomConfig {
            command: "/nonexistent/dezoomify-rs".into(),
            ..Default::default()
        };
        let err = download(&config, "https://example.org", Path::new("out.jpg")).unwrap_err();
        assert!(matches!(err, DezoomError::Spawn { .. }));
    }
}
