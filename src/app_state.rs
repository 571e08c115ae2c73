use crate::config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

const TEMP_DIR: &str = "temp";
const UPLOADS_DIR: &str = "uploads";
pub const PROCESSED_DIR: &str = "processed";

async fn init_workspace(workspace: &Path) -> std::io::Result<()> {
    for dir in [TEMP_DIR, UPLOADS_DIR, PROCESSED_DIR] {
        let path = workspace.join(dir);
        tokio::fs::create_dir_all(&path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when compositions are unthrottled.
    pub semaphore: Option<Arc<Semaphore>>,
    pub active_jobs: Arc<AtomicUsize>,
    last_stamp: Arc<AtomicU64>,

    pub temp_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let workspace = PathBuf::from(&config.workspace);
        init_workspace(&workspace).await?;

        if tokio::fs::metadata(&config.font_path).await.is_err() {
            warn!(font_path = %config.font_path, "Font file not found, drawtext will fail");
        }

        let semaphore = (config.permits > 0).then(|| Arc::new(Semaphore::new(config.permits)));
        info!(permits = config.permits, workspace = %workspace.display(), "Workspace ready");

        Ok(Self {
            config: Arc::new(config),
            semaphore,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            last_stamp: Arc::new(AtomicU64::new(0)),

            temp_dir: workspace.join(TEMP_DIR),
            uploads_dir: workspace.join(UPLOADS_DIR),
            processed_dir: workspace.join(PROCESSED_DIR),
        })
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.as_path()
    }

    pub fn uploads_dir(&self) -> &Path {
        self.uploads_dir.as_path()
    }

    pub fn processed_dir(&self) -> &Path {
        self.processed_dir.as_path()
    }

    /// Millisecond timestamp, strictly increasing across the process.
    pub fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let prev = self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// `output_<timestamp>.mp4`
    pub fn next_output_name(&self) -> String {
        format!("output_{}.mp4", self.next_stamp())
    }

    /// Waits for a composition slot. Returns `None` when unthrottled.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.semaphore.clone()?;
        debug!(
            available = semaphore.available_permits(),
            "Waiting for composition permit"
        );
        // The semaphore is never closed
        semaphore.acquire_owned().await.ok()
    }

    /// Counts the caller as active until the guard drops.
    pub fn track_job(&self) -> ActiveJob {
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
        ActiveJob(self.active_jobs.clone())
    }
}

pub struct ActiveJob(Arc<AtomicUsize>);

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
