use clap::{Args, ValueHint};
use std::path::PathBuf;

use super::job::{DEFAULT_FRAME_COUNT, Orientation, SizeClass};

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Text prompt describing the video to generate
    pub prompt: String,

    /// Orientation of the generated video
    #[arg(short, long, value_enum, default_value_t = Orientation::Landscape)]
    pub orientation: Orientation,

    /// Size class of the generated video
    #[arg(short, long, value_enum, default_value_t = SizeClass::Small)]
    pub size: SizeClass,

    /// Frame count (150, 300, 450 or 600)
    #[arg(short = 'f', long = "frames", default_value_t = DEFAULT_FRAME_COUNT)]
    pub n_frames: u32,

    /// Reference image path to guide generation
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub image: Option<PathBuf>,

    /// Caption describing the desired audio track
    #[arg(long)]
    pub audio_caption: Option<String>,

    /// Transcript to be spoken in the generated video
    #[arg(long)]
    pub audio_transcript: Option<String>,

    /// Directory artifacts are written to (defaults to the data directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// JSON file containing an array of job objects
    #[arg(value_hint = ValueHint::FilePath)]
    pub jobs: PathBuf,

    /// Directory artifacts are written to (defaults to the data directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DraftsArgs {
    /// Number of drafts to list
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
}
