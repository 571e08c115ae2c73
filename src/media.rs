//! ffmpeg command builder and runner.

use crate::cleanup::CleanupGuard;
use crate::config::Config;
use crate::filter_graph::{FilterGraph, OUTPUT_LABEL, build_filter_graph};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// How much of the tool's stderr is kept for logging.
const STDERR_TAIL: usize = 2048;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to spawn {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Media process exited with {status}")]
    Failed { status: String, stderr: String },

    #[error("Media process timed out after {0} seconds")]
    Timeout(u64),

    #[error("Media process reported success but wrote no output")]
    MissingOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInput {
    args: Vec<String>,
    source: String,
}

impl MediaInput {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// A generated source, e.g. `color=c=black:s=960x720`.
    pub fn lavfi(description: impl Into<String>) -> Self {
        Self {
            args: vec!["-f".into(), "lavfi".into()],
            source: description.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Builder for a single ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    inputs: Vec<MediaInput>,
    filter_complex: Option<String>,
    maps: Vec<String>,
    output_args: Vec<String>,
    output: PathBuf,
    overwrite: bool,
    log_level: String,
}

impl MediaCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            filter_complex: None,
            maps: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input(mut self, input: MediaInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn filter_complex(mut self, graph: impl Into<String>) -> Self {
        self.filter_complex = Some(graph.into());
        self
    }

    /// Map a stream into the output. Labels from the graph come as `[out]`.
    pub fn map(mut self, spec: impl Into<String>) -> Self {
        self.maps.push(spec.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Build the argv, output path last.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        if let Some(graph) = &self.filter_complex {
            args.push("-filter_complex".to_string());
            args.push(graph.clone());
        }

        for map in &self.maps {
            args.push("-map".to_string());
            args.push(map.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Spawns the media binary and waits for it.
#[derive(Debug, Clone)]
pub struct MediaRunner {
    bin: String,
    timeout: Option<Duration>,
}

impl MediaRunner {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            timeout: None,
        }
    }

    /// 0 disables the timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// Run to completion. Resolves on exit status 0, fails otherwise.
    pub async fn run(&self, cmd: &MediaCommand) -> MediaResult<()> {
        let args = cmd.build_args();
        debug!(bin = %self.bin, ?args, "Running media process");

        let child = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        // Dropping the future on timeout kills the child
        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!(bin = %self.bin, ?timeout, "Media process timed out, killed");
                    return Err(MediaError::Timeout(timeout.as_secs()));
                }
            },
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            return Ok(());
        }

        Err(MediaError::Failed {
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundKind {
    Image,
    Video,
}

impl BackgroundKind {
    /// Still images go through the image2 reader. GIFs have their own demuxer
    /// without a `-loop` option, so they loop like videos.
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "image/gif" => BackgroundKind::Video,
            _ if mime.starts_with("image/") => BackgroundKind::Image,
            _ => BackgroundKind::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Background {
    pub path: PathBuf,
    pub kind: BackgroundKind,
}

/// Everything needed for one composition. Consumed by [`compose`].
#[derive(Debug, Clone)]
pub struct CompositionJob {
    pub video: PathBuf,
    pub background: Option<Background>,
    /// Where ffmpeg writes. Never visible to clients.
    pub staging: PathBuf,
    /// Final location, only populated on success.
    pub output: PathBuf,
    /// Escaped and quoted text block.
    pub text_block: String,
}

impl CompositionJob {
    pub fn filter_graph(&self, config: &Config) -> FilterGraph {
        build_filter_graph(
            &config.canvas,
            &config.text_layout,
            &config.font_path(),
            &self.text_block,
        )
    }

    pub fn command(&self, config: &Config) -> MediaCommand {
        let background = match &self.background {
            // Backgrounds loop so they outlast the foreground, `shortest=1` ends the output
            Some(Background {
                path,
                kind: BackgroundKind::Image,
            }) => MediaInput::file(path).arg("-loop").arg("1"),
            Some(Background {
                path,
                kind: BackgroundKind::Video,
            }) => MediaInput::file(path).arg("-stream_loop").arg("-1"),
            None => MediaInput::lavfi(format!(
                "color=c={}:s={}x{}",
                config.canvas.background_color, config.canvas.width, config.canvas.height
            )),
        };

        MediaCommand::new(&self.staging)
            .input(MediaInput::file(&self.video))
            .input(background)
            .filter_complex(self.filter_graph(config).to_string())
            .map(format!("[{OUTPUT_LABEL}]"))
            .map("0:a?")
            .video_codec(&config.video_codec)
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
            .audio_codec("copy")
            .output_arg("-movflags")
            .output_arg("+faststart")
    }
}

/// Render `job` and move the result into place. On any failure the staging
/// file is removed and `job.output` is left untouched. If the caller is
/// dropped mid-run the child is killed and the staging file removed in the
/// background.
pub async fn compose(job: &CompositionJob, config: &Config) -> MediaResult<PathBuf> {
    let started = Instant::now();
    let runner = MediaRunner::new(&config.ffmpeg_bin).with_timeout(config.process_timeout_secs);
    let cmd = job.command(config);
    let staging = CleanupGuard::new(vec![job.staging.clone()]);

    let result: MediaResult<PathBuf> = async {
        runner.run(&cmd).await?;
        if tokio::fs::metadata(&job.staging).await.is_err() {
            return Err(MediaError::MissingOutput);
        }
        tokio::fs::rename(&job.staging, &job.output).await?;
        Ok(job.output.clone())
    }
    .await;

    match &result {
        Ok(output) => {
            staging.disarm();
            info!(?output, elapsed = ?started.elapsed(), "Composition finished");
        }
        Err(error) => {
            error!(?error, video = ?job.video, "Composition failed");
            staging.cleanup().await;
        }
    }

    result
}
