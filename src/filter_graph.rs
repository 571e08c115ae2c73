//! The fixed-shape composition graph: scale background, scale video, overlay,
//! optional backdrop box, then draw the text block.

use crate::config::{Canvas, TextLayout};
use crate::text::{EscapeProfile, escape};
use std::fmt;
use std::path::Path;

pub const BACKGROUND_LABEL: &str = "bg";
pub const VIDEO_LABEL: &str = "vid";
pub const OVERLAY_LABEL: &str = "tmp";
pub const BOXED_LABEL: &str = "boxed";
pub const OUTPUT_LABEL: &str = "out";

/// One `[in]...filter[out]` chain of the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterStage {
    pub inputs: Vec<String>,
    pub filter: String,
    pub output: String,
}

impl FilterStage {
    pub fn new<I, S>(inputs: I, filter: impl Into<String>, output: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            filter: filter.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for input in &self.inputs {
            write!(f, "[{input}]")?;
        }
        write!(f, "{}[{}]", self.filter, self.output)
    }
}

/// Ordered stages, rendered as a `-filter_complex` description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterGraph {
    stages: Vec<FilterStage>,
}

impl FilterGraph {
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Label of the last stage, the one mapped to the output file.
    pub fn output_label(&self) -> Option<&str> {
        self.stages.last().map(|stage| stage.output.as_str())
    }

    fn push(&mut self, stage: FilterStage) {
        self.stages.push(stage);
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

/// Build the composition graph. Input 0 is the foreground video, input 1 the
/// background. `text_block` must already be escaped and quoted.
pub fn build_filter_graph(
    canvas: &Canvas,
    layout: &TextLayout,
    font_path: &Path,
    text_block: &str,
) -> FilterGraph {
    let mut graph = FilterGraph::default();

    graph.push(FilterStage::new(
        ["1:v"],
        format!("scale={}:{}", canvas.width, canvas.height),
        BACKGROUND_LABEL,
    ));
    graph.push(FilterStage::new(
        ["0:v"],
        format!("scale=-2:{}", canvas.video_height),
        VIDEO_LABEL,
    ));
    graph.push(FilterStage::new(
        [BACKGROUND_LABEL, VIDEO_LABEL],
        "overlay=(W-w)/2:0:shortest=1",
        OVERLAY_LABEL,
    ));

    let text_input = if layout.separate_box {
        graph.push(FilterStage::new(
            [OVERLAY_LABEL],
            format!(
                "drawbox=x=0:y={}:w=iw:h={}:color={}:t=fill",
                layout.box_band_y, layout.box_band_height, layout.box_color
            ),
            BOXED_LABEL,
        ));
        BOXED_LABEL
    } else {
        OVERLAY_LABEL
    };

    graph.push(FilterStage::new(
        [text_input],
        drawtext(layout, font_path, text_block),
        OUTPUT_LABEL,
    ));

    graph
}

fn drawtext(layout: &TextLayout, font_path: &Path, text_block: &str) -> String {
    let font = escape(&font_path.to_string_lossy(), EscapeProfile::default());
    let mut filter = format!(
        "drawtext=fontfile='{font}':text={text_block}:fontsize={}:fontcolor={}",
        layout.font_size, layout.font_color
    );
    if !layout.separate_box {
        filter.push_str(&format!(
            ":box=1:boxcolor={}:boxborderw={}",
            layout.box_color, layout.box_border
        ));
    }
    filter.push_str(&format!(
        ":x={}:y={}:line_spacing={}",
        layout.anchor_x, layout.anchor_y, layout.line_spacing
    ));
    filter
}
