//! Single instance guard.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug)]
/// A file holding our process id, removed when dropped.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// `<tmp>/pie/tracker.pid`
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join("pie").join("tracker.pid")
    }

    /// Write our pid to `path`, unless it names another process that is still running.
    pub fn acquire(path: &Path) -> Result<PidFile> {
        if let Some(pid) = read_pid(path)? {
            if pid != std::process::id() && is_running(pid) {
                return Err(Error::AlreadyRunning(pid));
            }
            debug!(pid, "Replacing stale pid file");
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, std::process::id().to_string())?;

        Ok(PidFile {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, ?error, "Failed to remove pid file");
        }
    }
}

fn read_pid(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse().ok()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness check, a leftover pid file is assumed stale.
#[cfg(not(target_os = "linux"))]
fn is_running(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pie").join("tracker.pid");

        let pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.pid");
        std::fs::write(&path, "not a pid").unwrap();

        let _pid_file = PidFile::acquire(&path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn live_process_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.pid");

        // pid 1 always exists
        std::fs::write(&path, "1").unwrap();

        assert!(matches!(
            PidFile::acquire(&path),
            Err(Error::AlreadyRunning(1))
        ));
    }
}
