//! Two-pass encode orchestration.

use std::path::PathBuf;
use std::process::Command;

use crate::cancel::CancelSignal;
use crate::codec::VideoCodec;
use crate::error::AppError;
use crate::ffmpeg::discovery::get_ffmpeg_path;
use crate::ffmpeg::{
    EncodePass, PassOutcome, ProgressPass, ProgressSample, ProgressTracker, TranscodeJob,
    build_pass_args, run_pass,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStatus {
    Completed,
    Cancelled,
}

/// Seam between the convergence loop and the encoder.
pub trait Transcoder {
    /// Encode `job`, reporting progress as it goes. Returns `Cancelled` (not an
    /// error) when `cancel` trips before or during either pass.
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(ProgressSample),
        cancel: &dyn CancelSignal,
    ) -> Result<TranscodeStatus, AppError>;
}

impl<T: Transcoder + ?Sized> Transcoder for &T {
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(ProgressSample),
        cancel: &dyn CancelSignal,
    ) -> Result<TranscodeStatus, AppError> {
        (**self).transcode(job, on_progress, cancel)
    }
}

/// Runs both passes through the FFmpeg binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    binary: Option<PathBuf>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn ffmpeg(&self) -> Result<PathBuf, AppError> {
        match &self.binary {
            Some(p) => Ok(p.clone()),
            None => get_ffmpeg_path(),
        }
    }
}

/// Progress slices for the two passes. VP9 reports each pass on its own range.
fn progress_passes(codec: VideoCodec) -> (ProgressPass, ProgressPass) {
    match codec {
        VideoCodec::Vp9 => (ProgressPass::Single, ProgressPass::Single),
        VideoCodec::H264 | VideoCodec::Hevc | VideoCodec::Av1 => {
            (ProgressPass::First, ProgressPass::Second)
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(ProgressSample),
        cancel: &dyn CancelSignal,
    ) -> Result<TranscodeStatus, AppError> {
        let ffmpeg = self.ffmpeg()?;
        let (first, second) = progress_passes(job.codec);

        let mut previous_average = None;
        for (pass, progress_pass) in [(EncodePass::First, first), (EncodePass::Second, second)] {
            if cancel.is_cancelled() {
                return Ok(TranscodeStatus::Cancelled);
            }

            let mut cmd = Command::new(&ffmpeg);
            cmd.args(build_pass_args(job, pass));
            let mut tracker = ProgressTracker::new(progress_pass, job.frame_budget, previous_average);

            log::info!(
                target: "vidfit::transcode",
                "Transcoding {} ({:?} pass)",
                job.output.display(),
                pass
            );
            match run_pass(cmd, &mut tracker, on_progress, cancel)? {
                PassOutcome::Completed { average_fps } => previous_average = average_fps,
                PassOutcome::Failed { code, stderr, .. } => {
                    return Err(AppError::ffmpeg_failed(code, stderr));
                }
                PassOutcome::Cancelled => return Ok(TranscodeStatus::Cancelled),
            }
        }

        Ok(TranscodeStatus::Completed)
    }
}
