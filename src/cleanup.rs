//! Removal of per-request scratch files.

use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

/// Best effort; failures are logged and never change the outcome. Files that
/// are already gone are not an error.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(error) = tokio::fs::remove_file(path).await
            && error.kind() != ErrorKind::NotFound
        {
            warn!(?path, ?error, "Failed to remove scratch file");
        }
    }
}

/// Owns scratch files until they are cleaned up or handed over.
///
/// A request future can be dropped at any await point when the client goes
/// away. Dropping an armed guard schedules the removal on the runtime.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove the files now.
    pub async fn cleanup(mut self) {
        let paths = std::mem::take(&mut self.paths);
        remove_files(&paths).await;
    }

    /// The files live on; the caller takes responsibility for them.
    pub fn disarm(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }

        let paths = std::mem::take(&mut self.paths);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_files(&paths).await });
            }
            Err(_) => {
                for path in paths {
                    if let Err(error) = std::fs::remove_file(&path)
                        && error.kind() != ErrorKind::NotFound
                    {
                        warn!(?path, ?error, "Failed to remove scratch file");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn scratch(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"x").await.unwrap();
        path
    }

    async fn wait_gone(path: &PathBuf) -> bool {
        for _ in 0..50 {
            if tokio::fs::metadata(path).await.is_err() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn cleanup_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = scratch(&dir, "a").await;
        let missing = dir.path().join("missing");

        CleanupGuard::new(vec![a.clone(), missing]).cleanup().await;
        assert!(tokio::fs::metadata(&a).await.is_err());
    }

    #[tokio::test]
    async fn dropped_guard_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = scratch(&dir, "a").await;

        drop(CleanupGuard::new(vec![a.clone()]));
        assert!(wait_gone(&a).await);
    }

    #[tokio::test]
    async fn cancelled_future_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = scratch(&dir, "a").await;

        let guard = CleanupGuard::new(vec![a.clone()]);
        let pending = async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            guard.cleanup().await;
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(timed_out.is_err());
        assert!(wait_gone(&a).await);
    }

    #[tokio::test]
    async fn disarmed_guard_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = scratch(&dir, "a").await;

        let paths = CleanupGuard::new(vec![a.clone()]).disarm();
        assert_eq!(paths, vec![a.clone()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tokio::fs::metadata(&a).await.is_ok());
    }

    #[test]
    fn drop_outside_runtime_removes_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::write(&a, b"x").unwrap();

        drop(CleanupGuard::new(vec![a.clone()]));
        assert!(!a.exists());
    }
}
