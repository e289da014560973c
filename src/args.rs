//! Worker command-line options.
//!
//! Every option is optional: an empty string (or `None` for switches) leaves
//! the worker's built-in default in place and produces no argument at all.

/// Options passed to the OCR worker at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Escape non-ASCII characters in the JSON output
    pub ensure_ascii: Option<bool>,
    /// Model directory, absolute or relative to the executable
    pub models: String,
    /// Detection model file name
    pub det: String,
    /// Direction classifier model file name
    pub cls: String,
    /// Recognition model file name
    pub rec: String,
    /// Recognition dictionary file name
    pub keys: String,
    /// Enable text direction detection
    pub do_angle: Option<bool>,
    /// Enable angle voting
    pub most_angle: Option<bool>,
    /// Inference thread count
    pub num_thread: String,
    /// Border added around the image before detection
    pub padding: String,
    /// Long-side limit images are shrunk to
    pub max_side_len: String,
    /// Text box confidence threshold
    pub box_score_thresh: String,
    pub box_thresh: String,
    /// Text box expansion ratio
    pub un_clip_ratio: String,
    /// Image recognized once at startup
    pub image_path: String,
}

/// A single option value as seen by the argument builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgValue<'a> {
    Text(&'a str),
    Switch(Option<bool>),
}

impl ArgValue<'_> {
    fn render(self) -> Option<String> {
        match self {
            ArgValue::Text("") => None,
            ArgValue::Text(value) => Some(value.to_string()),
            ArgValue::Switch(None) => None,
            ArgValue::Switch(Some(true)) => Some("1".to_string()),
            ArgValue::Switch(Some(false)) => Some("0".to_string()),
        }
    }
}

impl WorkerArgs {
    /// Flag names paired with their values, in declaration order.
    fn options(&self) -> [(&'static str, ArgValue<'_>); 15] {
        [
            ("--ensureAscii", ArgValue::Switch(self.ensure_ascii)),
            ("--models", ArgValue::Text(&self.models)),
            ("--det", ArgValue::Text(&self.det)),
            ("--cls", ArgValue::Text(&self.cls)),
            ("--rec", ArgValue::Text(&self.rec)),
            ("--keys", ArgValue::Text(&self.keys)),
            ("--doAngle", ArgValue::Switch(self.do_angle)),
            ("--mostAngle", ArgValue::Switch(self.most_angle)),
            ("--numThread", ArgValue::Text(&self.num_thread)),
            ("--padding", ArgValue::Text(&self.padding)),
            ("--maxSideLen", ArgValue::Text(&self.max_side_len)),
            ("--boxScoreThresh", ArgValue::Text(&self.box_score_thresh)),
            ("--boxThresh", ArgValue::Text(&self.box_thresh)),
            ("--unClipRatio", ArgValue::Text(&self.un_clip_ratio)),
            ("--image_path", ArgValue::Text(&self.image_path)),
        ]
    }

    /// Build the worker argument list, one `--name=value` token per set option.
    pub fn to_args(&self) -> Vec<String> {
        self.options()
            .into_iter()
            .filter_map(|(name, value)| value.render().map(|v| format!("{}={}", name, v)))
            .collect()
    }

    /// The argument list joined by single spaces, as it would appear on a shell line.
    pub fn command_line(&self) -> String {
        self.to_args().join(" ")
    }
}
