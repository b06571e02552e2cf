//! Drain / drain-stop / force-stop, each signaled by the presence of a
//! sentinel file in the run directory.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::app_error::AppError;

const DRAIN: &str = "drain";
const DRAIN_STOP: &str = "drain-stop";
const FORCE_STOP: &str = "force-stop";

fn sentinel_path(rundir: &Path, name: &str) -> PathBuf {
    rundir.join(name)
}

/// Create a sentinel file with exclusive-create semantics. Already
/// existing is treated as success, matching the advisory-gate contract.
fn create_sentinel(rundir: &Path, name: &str) -> Result<(), AppError> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode_0644()
        .open(sentinel_path(rundir, name))
    {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(AppError::Sentinel(format!("{name}: {e}"))),
    }
}

/// Remove a sentinel file. Already absent is treated as success.
fn remove_sentinel(rundir: &Path, name: &str) -> Result<(), AppError> {
    match std::fs::remove_file(sentinel_path(rundir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Sentinel(format!("{name}: {e}"))),
    }
}

fn sentinel_present(rundir: &Path, name: &str) -> bool {
    sentinel_path(rundir, name).exists()
}

trait Mode0644 {
    fn mode_0644(self) -> Self;
}

#[cfg(unix)]
impl Mode0644 for OpenOptions {
    fn mode_0644(mut self) -> Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(0o644);
        self
    }
}

pub fn drain(rundir: &Path) -> Result<(), AppError> {
    create_sentinel(rundir, DRAIN)
}

pub fn drain_stop(rundir: &Path) -> Result<(), AppError> {
    create_sentinel(rundir, DRAIN)?;
    create_sentinel(rundir, DRAIN_STOP)
}

pub fn resume(rundir: &Path) -> Result<(), AppError> {
    remove_sentinel(rundir, DRAIN)
}

pub fn force_stop(rundir: &Path) -> Result<(), AppError> {
    create_sentinel(rundir, FORCE_STOP)
}

pub fn clear_force_stop(rundir: &Path) -> Result<(), AppError> {
    remove_sentinel(rundir, FORCE_STOP)
}

pub fn clear_drain_stop(rundir: &Path) -> Result<(), AppError> {
    remove_sentinel(rundir, DRAIN_STOP)
}

pub fn is_draining(rundir: &Path) -> bool {
    sentinel_present(rundir, DRAIN)
}

pub fn is_drain_stop(rundir: &Path) -> bool {
    sentinel_present(rundir, DRAIN_STOP)
}

pub fn is_force_stop(rundir: &Path) -> bool {
    sentinel_present(rundir, FORCE_STOP)
}

/// Remove a stale `force-stop` sentinel left over from a previous run,
/// swallowing a missing file.
pub fn clear_stale_force_stop(rundir: &Path) -> Result<(), AppError> {
    clear_force_stop(rundir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_then_resume_leaves_no_sentinels() {
        let dir = tempdir();
        drain(&dir).unwrap();
        assert!(is_draining(&dir));
        resume(&dir).unwrap();
        assert!(!is_draining(&dir));
    }

    #[test]
    fn test_create_sentinel_twice_is_ok() {
        let dir = tempdir();
        drain(&dir).unwrap();
        drain(&dir).unwrap();
        assert!(is_draining(&dir));
    }

    #[test]
    fn test_remove_absent_sentinel_is_ok() {
        let dir = tempdir();
        assert!(resume(&dir).is_ok());
    }

    #[test]
    fn test_force_stop_roundtrip() {
        let dir = tempdir();
        force_stop(&dir).unwrap();
        assert!(is_force_stop(&dir));
        clear_force_stop(&dir).unwrap();
        assert!(!is_force_stop(&dir));
    }

    #[test]
    fn test_drain_stop_sets_both_sentinels() {
        let dir = tempdir();
        drain_stop(&dir).unwrap();
        assert!(is_draining(&dir));
        assert!(is_drain_stop(&dir));
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "plancton-mode-test-{}-{}",
            std::process::id(),
            rand_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
            .into()
    }
}
