use crate::Args;
use ocr_worker::{ImageInput, SupervisorConfig, WorkerArgs};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub exe_path: PathBuf,
    pub worker_args: WorkerArgs,
    pub supervisor: SupervisorConfig,
    pub inputs: Vec<ImageInput>,
    pub raw: bool,
}

impl TryFrom<Args> for Config {
    type Error = std::io::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        // The worker runs in its own directory, so relative paths must be
        // resolved against ours first
        let cwd = std::env::current_dir()?;
        let mut inputs: Vec<ImageInput> = args
            .images
            .iter()
            .map(|image| ImageInput::path(cwd.join(image).to_string_lossy().into_owned()))
            .collect();
        if args.clipboard {
            inputs.push(ImageInput::clipboard());
        }

        Ok(Self {
            exe_path: PathBuf::from(args.exe),
            worker_args: WorkerArgs {
                ensure_ascii: args.ensure_ascii,
                models: args.models,
                det: args.det,
                cls: args.cls,
                rec: args.rec,
                keys: args.keys,
                do_angle: args.do_angle,
                most_angle: args.most_angle,
                num_thread: args.num_thread,
                padding: args.padding,
                max_side_len: args.max_side_len,
                box_score_thresh: args.box_score_thresh,
                box_thresh: args.box_thresh,
                un_clip_ratio: args.un_clip_ratio,
                image_path: String::new(),
            },
            supervisor: SupervisorConfig {
                restart_interval: Duration::from_secs(args.restart_interval_secs),
                shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
                ..Default::default()
            },
            inputs,
            raw: args.raw,
        })
    }
}
