use crate::text::EscapeProfile;
use anyhow::{Result, bail};
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # Video Card Configuration
///
/// # Server configuration
/// listen_on_port = 3000
/// permits = 4                 # 0 = one ffmpeg per request, unthrottled
/// workspace = "./data"
/// max_upload_bytes = 104857600
/// public_base_url = "https://cards.example.com"
///
/// # Media tool
/// ffmpeg_bin = "/usr/bin/ffmpeg"
/// video_codec = "libx264"
/// process_timeout_secs = 0    # 0 = wait forever
///
/// # Text block
/// wrap_width = 30
/// background_required = true
/// escape_comma_and_period = true
/// escape_percent = true       # keeps drawtext from expanding '%' sequences
/// font_path = "fonts/Arial.ttf"
///
/// [canvas]
/// width = 960
/// height = 720
/// video_height = 480
/// background_color = "black"
///
/// [text_layout]
/// font_size = 24
/// font_color = "white"
/// box_color = "black@0.5"
/// box_border = 10
/// anchor_x = "(w-text_w)/2"
/// anchor_y = "h-text_h-40"
/// line_spacing = 10
/// separate_box = false
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = default_port())]
    pub listen_on_port: u16,

    /// Number of concurrent compositions (0 = unlimited)
    #[arg(short, long, default_value_t = default_permits())]
    pub permits: usize,

    /// Working directory holding uploads, processed and temp directories
    #[arg(short = 'w', long, default_value_t = default_workspace())]
    pub workspace: String,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Largest accepted upload per file, in bytes
    #[arg(long, default_value_t = default_max_upload_bytes())]
    pub max_upload_bytes: u64,

    /// Base URL used when building download links
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,

    /// Media processing binary
    #[arg(long, default_value_t = default_ffmpeg_bin())]
    pub ffmpeg_bin: String,

    /// Video encoder for the composed output
    #[arg(long, default_value_t = default_video_codec())]
    pub video_codec: String,

    /// Kill the media process after this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub process_timeout_secs: u64,

    /// Column budget for each labelled line
    #[arg(long, default_value_t = default_wrap_width())]
    pub wrap_width: usize,

    /// Reject uploads without a background file
    #[arg(long)]
    pub background_required: bool,

    /// Escape ',' and '.' in the text block as well
    #[arg(long)]
    pub escape_comma_and_period: bool,

    /// Escape '%' so drawtext renders it literally
    #[arg(long)]
    pub escape_percent: bool,

    /// Font file used by drawtext
    #[arg(long, default_value_t = default_font_path())]
    pub font_path: String,

    #[command(flatten)]
    pub canvas: Canvas,

    #[command(flatten)]
    pub text_layout: TextLayout,
}

/// Output frame geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct Canvas {
    /// Background canvas width
    #[arg(long = "canvas-width", default_value_t = 960)]
    pub width: u32,

    /// Background canvas height
    #[arg(long = "canvas-height", default_value_t = 720)]
    pub height: u32,

    /// Height the foreground video is scaled to
    #[arg(long, default_value_t = 480)]
    pub video_height: u32,

    /// Canvas color when no background file is uploaded
    #[arg(long, default_value = "black")]
    pub background_color: String,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 960,
            height: 720,
            video_height: 480,
            background_color: "black".to_string(),
        }
    }
}

/// drawtext / drawbox parameters. Anchors are filter expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct TextLayout {
    #[arg(long, default_value_t = 24)]
    pub font_size: u32,

    #[arg(long, default_value = "white")]
    pub font_color: String,

    #[arg(long, default_value = "black@0.5")]
    pub box_color: String,

    #[arg(long, default_value_t = 10)]
    pub box_border: u32,

    #[arg(long, default_value = "(w-text_w)/2")]
    pub anchor_x: String,

    #[arg(long, default_value = "h-text_h-40")]
    pub anchor_y: String,

    #[arg(long, default_value_t = 10)]
    pub line_spacing: u32,

    /// Draw the backdrop as its own drawbox stage instead of drawtext's box
    #[arg(long)]
    pub separate_box: bool,

    /// Top of the backdrop band (separate_box only)
    #[arg(long, default_value = "h-200")]
    pub box_band_y: String,

    /// Height of the backdrop band (separate_box only)
    #[arg(long, default_value_t = 200)]
    pub box_band_height: u32,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            font_size: 24,
            font_color: "white".to_string(),
            box_color: "black@0.5".to_string(),
            box_border: 10,
            anchor_x: "(w-text_w)/2".to_string(),
            anchor_y: "h-text_h-40".to_string(),
            line_spacing: 10,
            separate_box: false,
            box_band_y: "h-200".to_string(),
            box_band_height: 200,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            permits: default_permits(),
            workspace: default_workspace(),
            config: None,
            max_upload_bytes: default_max_upload_bytes(),
            public_base_url: None,
            ffmpeg_bin: default_ffmpeg_bin(),
            video_codec: default_video_codec(),
            process_timeout_secs: 0,
            wrap_width: default_wrap_width(),
            background_required: false,
            escape_comma_and_period: false,
            escape_percent: false,
            font_path: default_font_path(),
            canvas: Canvas::default(),
            text_layout: TextLayout::default(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence unless left at their default
    fn merge_with_file(mut self, file: Config) -> Self {
        let defaults = Config::default();

        prefer_file(&mut self.listen_on_port, defaults.listen_on_port, file.listen_on_port);
        prefer_file(&mut self.permits, defaults.permits, file.permits);
        prefer_file(&mut self.workspace, defaults.workspace, file.workspace);
        prefer_file(
            &mut self.max_upload_bytes,
            defaults.max_upload_bytes,
            file.max_upload_bytes,
        );
        prefer_file(&mut self.ffmpeg_bin, defaults.ffmpeg_bin, file.ffmpeg_bin);
        prefer_file(&mut self.video_codec, defaults.video_codec, file.video_codec);
        prefer_file(
            &mut self.process_timeout_secs,
            defaults.process_timeout_secs,
            file.process_timeout_secs,
        );
        prefer_file(&mut self.wrap_width, defaults.wrap_width, file.wrap_width);
        prefer_file(&mut self.font_path, defaults.font_path, file.font_path);
        // Flags can only be switched on from the CLI
        self.background_required |= file.background_required;
        self.escape_comma_and_period |= file.escape_comma_and_period;
        self.escape_percent |= file.escape_percent;

        if self.public_base_url.is_none() {
            self.public_base_url = file.public_base_url;
        }

        if self.canvas == defaults.canvas {
            self.canvas = file.canvas;
        }
        if self.text_layout == defaults.text_layout {
            self.text_layout = file.text_layout;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.wrap_width == 0 {
            bail!("wrap_width must be greater than 0");
        }
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than 0");
        }
        if self.ffmpeg_bin.trim().is_empty() {
            bail!("ffmpeg_bin cannot be empty");
        }
        if self.font_path.trim().is_empty() {
            bail!("font_path cannot be empty");
        }
        if self.canvas.width == 0 || self.canvas.height == 0 || self.canvas.video_height == 0 {
            bail!("canvas dimensions must be greater than 0");
        }
        if self.text_layout.font_size == 0 {
            bail!("font_size must be greater than 0");
        }

        if let Some(base) = &self.public_base_url
            && !base.starts_with("http://")
            && !base.starts_with("https://")
        {
            bail!("public_base_url must start with http:// or https://");
        }

        Ok(())
    }

    pub fn escape_profile(&self) -> EscapeProfile {
        EscapeProfile::new(self.escape_comma_and_period).with_percent(self.escape_percent)
    }

    pub fn font_path(&self) -> PathBuf {
        PathBuf::from(&self.font_path)
    }
}

fn prefer_file<T: PartialEq>(cli: &mut T, default: T, file: T) {
    if *cli == default {
        *cli = file;
    }
}

// Default value functions
fn default_port() -> u16 {
    3000
}

fn default_permits() -> usize {
    num_cpus::get()
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_wrap_width() -> usize {
    50
}

fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
