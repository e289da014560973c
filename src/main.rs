use clap::Parser;
use ocr_worker::{parse_result, ImageInput, OcrSupervisor};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

#[derive(Parser, Debug)]
#[command(name = "ocr-worker")]
#[command(about = "Run images through a supervised PaddleOCR-json style worker")]
#[command(version)]
pub struct Args {
    /// Path to the OCR worker executable
    #[arg(long, env = "OCR_EXE")]
    pub exe: String,

    /// Images to recognize (paths are passed to the worker as absolute paths)
    #[arg(required_unless_present = "clipboard")]
    pub images: Vec<String>,

    /// Recognize the clipboard image instead of files
    #[arg(long)]
    pub clipboard: bool,

    /// Print the worker's raw response line instead of the parsed result
    #[arg(long)]
    pub raw: bool,

    /// Seconds between scheduled worker restarts (0 disables them)
    #[arg(long, env = "OCR_RESTART_INTERVAL_SECS", default_value = "1200")]
    pub restart_interval_secs: u64,

    /// Milliseconds a worker gets to exit after its input closes
    #[arg(long, env = "OCR_SHUTDOWN_GRACE_MS", default_value = "500")]
    pub shutdown_grace_ms: u64,

    /// Model directory, absolute or relative to the worker executable
    #[arg(long, env = "OCR_MODELS", default_value = "")]
    pub models: String,

    /// Detection model file name
    #[arg(long, default_value = "")]
    pub det: String,

    /// Direction classifier model file name
    #[arg(long, default_value = "")]
    pub cls: String,

    /// Recognition model file name
    #[arg(long, default_value = "")]
    pub rec: String,

    /// Recognition dictionary file name
    #[arg(long, default_value = "")]
    pub keys: String,

    /// Inference thread count
    #[arg(long, env = "OCR_NUM_THREAD", default_value = "")]
    pub num_thread: String,

    /// Border added around the image before detection
    #[arg(long, default_value = "")]
    pub padding: String,

    /// Long-side limit images are shrunk to
    #[arg(long, default_value = "")]
    pub max_side_len: String,

    /// Text box confidence threshold
    #[arg(long, default_value = "")]
    pub box_score_thresh: String,

    #[arg(long, default_value = "")]
    pub box_thresh: String,

    /// Text box expansion ratio
    #[arg(long, default_value = "")]
    pub un_clip_ratio: String,

    /// Escape non-ASCII output (true/false)
    #[arg(long)]
    pub ensure_ascii: Option<bool>,

    /// Detect text direction (true/false)
    #[arg(long)]
    pub do_angle: Option<bool>,

    /// Vote on text direction (true/false)
    #[arg(long)]
    pub most_angle: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

fn label(input: &ImageInput) -> String {
    match input {
        ImageInput::Path(path) => path.clone(),
        ImageInput::Bytes(_) => input.describe(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries one JSON line per image
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::try_from(args)?;

    tracing::info!("Starting ocr-worker v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Worker executable: {}", config.exe_path.display());

    let supervisor = OcrSupervisor::with_config(
        &config.exe_path,
        config.worker_args.clone(),
        config.supervisor.clone(),
    )
    .await?;

    // Requests are issued together; the supervisor serializes them on the pipe
    let ocr = &supervisor;
    let requests = config.inputs.iter().map(|input| async move {
        let response = ocr.ocr(input).await;
        (input, response)
    });
    let responses = futures::future::join_all(requests).await;

    let mut failures = 0;
    for (input, response) in responses {
        let line = match response {
            Ok(raw) if config.raw => String::from_utf8_lossy(&raw).trim_end().to_string(),
            Ok(raw) => match parse_result(&raw) {
                Ok(result) => json!({ "image": label(input), "result": result }).to_string(),
                Err(e) => {
                    failures += 1;
                    json!({ "image": label(input), "error": e.to_string() }).to_string()
                }
            },
            Err(e) => {
                failures += 1;
                tracing::warn!("OCR failed for {}: {}", label(input), e);
                json!({ "image": label(input), "error": e.to_string() }).to_string()
            }
        };
        println!("{}", line);
    }

    supervisor.close().await?;

    if failures > 0 {
        anyhow::bail!("{} of {} images failed", failures, config.inputs.len());
    }
    Ok(())
}
