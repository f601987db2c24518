mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod progress;
mod runner;

use std::path::{Path, PathBuf};

pub use builder::{EncodePass, build_pass_args, format_args_for_display_multiline};
pub use error::{FfmpegErrorPayload, parse_ffmpeg_error};
pub use ffprobe::{FfprobeProber, MediaProber, SourceProbe, parse_probe_json, probe_source};
pub use progress::{ProgressPass, ProgressSample, ProgressTracker};
pub use runner::{PassOutcome, run_pass};

use crate::codec::VideoCodec;

/// Everything one two-pass encode needs, resolved by the convergence loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Bits per second.
    pub video_bitrate: i64,
    /// Bits per second.
    pub audio_bitrate: i64,
    pub width: u32,
    pub height: u32,
    /// `None` keeps the source frame rate.
    pub fps: Option<u32>,
    pub codec: VideoCodec,
    pub extra_quality: bool,
    pub hardware_acceleration: bool,
    /// Destination frame count used for progress accounting.
    pub frame_budget: u64,
    /// `-passlogfile` prefix; FFmpeg's default is used when unset.
    pub passlog_prefix: Option<PathBuf>,
}

impl TranscodeJob {
    /// Short side of the output frame, which picks the encoder speed tier.
    pub fn frame_height(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Where the analysis pass writes its throwaway output.
pub fn null_sink() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
