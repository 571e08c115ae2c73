#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use video_card::{AppState, Config};

/// Pretends to be ffmpeg: checks for a filter graph and writes the last argument.
const OK_STUB: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
case "$*" in
  *-filter_complex*) ;;
  *) echo "missing filter graph" >&2; exit 2 ;;
esac
sleep 0.2
printf 'stub-video' > "$out"
"#;

/// Starts writing, then hangs long enough for the client to give up.
const SLOW_STUB: &str = r#"#!/bin/sh
for arg in "$@"; do out="$arg"; done
printf 'partial' > "$out"
sleep 5
printf 'stub-video' > "$out"
"#;

const FAILING_STUB: &str = r#"#!/bin/sh
echo "Cannot load font /opt/secret/fonts/Arial.ttf" >&2
exit 1
"#;

pub struct Stubs {
    _dir: TempDir,
    pub ok: PathBuf,
    pub failing: PathBuf,
    pub slow: PathBuf,
}

/// Scripts are written once, before any test spawns a process, so no
/// executable is ever open for writing while another thread forks.
pub fn stubs() -> &'static Stubs {
    static STUBS: OnceLock<Stubs> = OnceLock::new();
    STUBS.get_or_init(|| {
        let dir = tempfile::tempdir().expect("create stub dir");
        let ok = write_script(dir.path(), "ffmpeg-ok", OK_STUB);
        let failing = write_script(dir.path(), "ffmpeg-fail", FAILING_STUB);
        let slow = write_script(dir.path(), "ffmpeg-slow", SLOW_STUB);
        Stubs {
            _dir: dir,
            ok,
            failing,
            slow,
        }
    })
}

fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, content).expect("write stub");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod stub");
    path
}

/// Test harness running the router on an ephemeral port
pub struct TestServer {
    workspace: TempDir,
    port: u16,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(customize: impl FnOnce(&mut Config)) -> Self {
        let stubs = stubs();
        let workspace = tempfile::tempdir().expect("create workspace");

        let mut config = Config {
            workspace: workspace.path().to_string_lossy().to_string(),
            ffmpeg_bin: stubs.ok.to_string_lossy().to_string(),
            permits: 2,
            ..Default::default()
        };
        customize(&mut config);

        let state = AppState::new(config).await.expect("create app state");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        tokio::spawn(async move {
            video_card::serve(listener, state).await.expect("server error");
        });

        TestServer { workspace, port }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        self.workspace.path().join(name)
    }

    /// File names currently in a workspace directory.
    pub fn files_in(&self, name: &str) -> Vec<String> {
        let mut files = std::fs::read_dir(self.dir(name))
            .expect("read dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        files.sort();
        files
    }
}

pub fn video_part() -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(b"fake mp4 bytes".to_vec())
        .file_name("clip.mp4")
        .mime_str("video/mp4")
        .unwrap()
}

pub fn background_part() -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(b"fake png bytes".to_vec())
        .file_name("bg.png")
        .mime_str("image/png")
        .unwrap()
}

/// All four text fields, no files.
pub fn text_form() -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("doctorName", "Jane Doe")
        .text("degree", "MD")
        .text("mobile", "555-1234")
        .text("address", "1 Main St")
}

pub fn full_form() -> reqwest::multipart::Form {
    text_form()
        .part("video", video_part())
        .part("background", background_part())
}
