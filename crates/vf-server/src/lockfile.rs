//! Server lockfile for dynamic port discovery (SPEC_FULL.md §10.6).
//!
//! The HTTP front door may bind to an OS-assigned ephemeral port
//! (`server.ephemeral_port = true`); it writes a JSON lockfile to
//! `~/.viewfinder/server.lock` so `vf-cli` and tests can discover the
//! running server's address without a fixed, pre-agreed port.
//!
//! ## Race safety
//!
//! `acquire()` uses `O_CREAT | O_EXCL` to atomically create the lockfile.
//! If two servers race, exactly one wins the create -- the loser gets
//! `AlreadyExists` and checks whether the winner is still alive.
//!
//! ## Stale lockfile recovery
//!
//! `read_valid()` checks if the PID in the lockfile is still alive via
//! `kill(pid, 0)`. If the process is dead, the stale lockfile is removed
//! automatically and the next server can start.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Runtime state written by the server after binding its listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLockfile {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub started_at: String,
    pub version: String,
}

/// Result of trying to acquire the lockfile.
pub enum AcquireResult {
    /// We created the lockfile -- we own it.
    Acquired,
    /// Another live server holds the lockfile.
    AlreadyRunning(ServerLockfile),
    /// Stale lockfile was cleaned up -- retry.
    StaleRemoved,
}

impl ServerLockfile {
    /// Canonical lockfile path: `~/.viewfinder/server.lock`.
    pub fn path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".viewfinder").join("server.lock")
    }

    /// Try to exclusively create and write the lockfile.
    pub fn acquire(&self) -> std::io::Result<AcquireResult> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let json = serde_json::to_string_pretty(self)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => match Self::read() {
                Some(existing) if existing.is_alive() => Ok(AcquireResult::AlreadyRunning(existing)),
                _ => {
                    tracing::info!("removing stale server lockfile");
                    Self::remove();
                    Ok(AcquireResult::StaleRemoved)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Acquire with automatic retry after stale cleanup.
    pub fn acquire_or_fail(&self) -> Result<(), String> {
        for attempt in 0..2 {
            match self.acquire() {
                Ok(AcquireResult::Acquired) => return Ok(()),
                Ok(AcquireResult::AlreadyRunning(existing)) => {
                    return Err(format!(
                        "server already running (pid={}, {})",
                        existing.pid,
                        existing.url(),
                    ));
                }
                Ok(AcquireResult::StaleRemoved) if attempt == 0 => {
                    tracing::info!("stale lockfile removed, retrying acquire");
                    continue;
                }
                Ok(AcquireResult::StaleRemoved) => {
                    return Err("failed to acquire lockfile after stale cleanup".into());
                }
                Err(e) => return Err(format!("lockfile I/O error: {e}")),
            }
        }
        Err("lockfile acquire failed".into())
    }

    /// Read the lockfile. Returns `None` if missing or unparseable.
    pub fn read() -> Option<Self> {
        let path = Self::path();
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove the lockfile.
    pub fn remove() {
        let _ = std::fs::remove_file(Self::path());
    }

    /// Check if the PID in this lockfile is still alive.
    pub fn is_alive(&self) -> bool {
        pid_alive(self.pid)
    }

    /// Read the lockfile, validate the PID is alive, and auto-remove stale entries.
    pub fn read_valid() -> Option<Self> {
        let lock = Self::read()?;
        if lock.is_alive() {
            Some(lock)
        } else {
            tracing::info!(pid = lock.pid, "removing stale server lockfile (process not running)");
            Self::remove();
            None
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn lockfile_roundtrip() {
        let lock = ServerLockfile {
            pid: std::process::id(),
            host: "127.0.0.1".into(),
            port: 12345,
            started_at: "2026-02-22T00:00:00Z".into(),
            version: "0.1.0".into(),
        };
        let json = serde_json::to_string_pretty(&lock).unwrap();
        let parsed: ServerLockfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, 12345);
        assert_eq!(parsed.url(), "http://127.0.0.1:12345");
    }

    #[test]
    fn is_alive_for_current_process() {
        let lock = ServerLockfile {
            pid: std::process::id(),
            host: "127.0.0.1".into(),
            port: 0,
            started_at: String::new(),
            version: String::new(),
        };
        assert!(lock.is_alive());
    }
}
