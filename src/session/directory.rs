//! Output directory layout for a run.
//!
//! ```text
//! <output>/<user>_session_<timestamp>-<rand>/<serial>/log/
//! ```

use crate::error::RunError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Attempts at finding an unused random suffix before giving up.
const MAX_SUFFIX_ATTEMPTS: usize = 16;
const SUFFIX_LEN: usize = 6;

/// Creates the session root and per-device directories.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectories;

impl SessionDirectories {
    pub fn new() -> Self {
        Self
    }

    /// Create a fresh session directory under `base_path` for `user_name`.
    pub async fn create_session_root(
        &self,
        base_path: &Path,
        user_name: &str,
    ) -> Result<PathBuf, RunError> {
        self.create_session_root_at(base_path, user_name, Utc::now())
            .await
    }

    pub(crate) async fn create_session_root_at(
        &self,
        base_path: &Path,
        user_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PathBuf, RunError> {
        fs::create_dir_all(base_path)
            .await
            .map_err(|e| RunError::io(base_path.display(), e))?;

        let prefix = session_prefix(user_name, timestamp);
        for _ in 0..MAX_SUFFIX_ATTEMPTS {
            let candidate = base_path.join(format!("{}-{}", prefix, random_suffix()));
            match fs::create_dir(&candidate).await {
                Ok(()) => {
                    debug!(path = %candidate.display(), "Session directory created");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RunError::io(candidate.display(), e)),
            }
        }

        Err(RunError::Io(format!(
            "no unused session directory name for {}",
            prefix
        )))
    }

    /// Create `<session_root>/<serial>` and its `log` subdirectory.
    ///
    /// Fails if the device directory already exists.
    pub async fn create_device_dir(
        &self,
        session_root: &Path,
        serial: &str,
    ) -> Result<PathBuf, RunError> {
        let device_path = session_root.join(serial);
        fs::create_dir(&device_path)
            .await
            .map_err(|e| RunError::io(device_path.display(), e))?;

        let log_path = device_path.join("log");
        fs::create_dir(&log_path)
            .await
            .map_err(|e| RunError::io(log_path.display(), e))?;

        Ok(device_path)
    }
}

/// `<user>_session_<ISO timestamp with ':' and '.' replaced by '-'>`
fn session_prefix(user_name: &str, timestamp: DateTime<Utc>) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let user = user_name.replace(['/', '\\'], "_");
    format!("{}_session_{}", user, stamp)
}

fn random_suffix() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SUFFIX_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn prefix_format() {
        assert_eq!(
            session_prefix("alice", fixed_time()),
            "alice_session_2024-03-05T14-07-09-000Z"
        );
        assert_eq!(
            session_prefix("a/b", fixed_time()),
            "a_b_session_2024-03-05T14-07-09-000Z"
        );
    }

    #[tokio::test]
    async fn same_second_roots_are_distinct() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let base = tmp.path().join("out");
        let dirs = SessionDirectories::new();

        let first = dirs
            .create_session_root_at(&base, "alice", fixed_time())
            .await
            .expect("first");
        let second = dirs
            .create_session_root_at(&base, "alice", fixed_time())
            .await
            .expect("second");

        assert_ne!(first, second);
        assert!(first.is_dir());
        assert!(second.is_dir());
        let name = first.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("alice_session_2024-03-05T14-07-09-000Z-"));
    }

    #[tokio::test]
    async fn device_dir_with_log() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dirs = SessionDirectories::new();

        let device = dirs
            .create_device_dir(tmp.path(), "SER1")
            .await
            .expect("device dir");
        assert_eq!(device, tmp.path().join("SER1"));
        assert!(device.join("log").is_dir());
    }

    #[tokio::test]
    async fn device_dir_collision_is_io_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dirs = SessionDirectories::new();

        dirs.create_device_dir(tmp.path(), "SER1").await.expect("first");
        let err = dirs.create_device_dir(tmp.path(), "SER1").await.unwrap_err();
        assert!(matches!(err, RunError::Io(_)));
    }
}
