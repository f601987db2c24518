//! Target-size convergence loop.
//!
//! Each attempt derives encoder settings from the target size and a running
//! correction factor, encodes, measures the result and nudges the factor by how
//! far the output missed. The loop ends once the output lands inside
//! `[target * (1 - tolerance), target]`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::codec::VideoCodec;
use crate::error::AppError;
use crate::ffmpeg::{
    EncodePass, FfprobeProber, MediaProber, ProgressSample, SourceProbe, TranscodeJob,
    build_pass_args,
};
use crate::settings::{
    EncodeSettings, FramerateMode, compute_settings, destination_dimensions,
    destination_frame_budget, is_crush_mode, total_bitrate,
};
use crate::transcode::{FfmpegTranscoder, TranscodeStatus, Transcoder};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Below this the picture is no longer worth encoding.
pub const MIN_VIDEO_BITRATE: i64 = 5_000;

/// Extra damping applied after an overshoot so the next attempt lands under.
const OVERSHOOT_DAMPING: f64 = 0.95;

/// Floor for the measured percentage when updating the factor, so an empty
/// output cannot blow the factor up to infinity.
const MIN_PERCENT_FOR_CORRECTION: f64 = 1.0;

pub const DEFAULT_TOLERANCE_PERCENT: f64 = 10.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// One compression run as a shell submits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionRequest {
    pub input_path: PathBuf,
    /// Must not exist yet; see [`unique_output_path`].
    pub output_path: PathBuf,
    pub target_size_mib: f64,
    pub tolerance_percent: Option<f64>,
    pub framerate: Option<FramerateMode>,
    pub codec: Option<VideoCodec>,
    pub extra_quality: Option<bool>,
    pub hardware_acceleration: Option<bool>,
    pub passlog_dir: Option<PathBuf>,
    pub max_attempts: Option<u32>,
}

impl CompressionRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        target_size_mib: f64,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            target_size_mib,
            tolerance_percent: None,
            framerate: None,
            codec: None,
            extra_quality: None,
            hardware_acceleration: None,
            passlog_dir: None,
            max_attempts: None,
        }
    }

    pub fn effective_tolerance(&self) -> f64 {
        self.tolerance_percent.unwrap_or(DEFAULT_TOLERANCE_PERCENT)
    }

    pub fn effective_framerate(&self) -> FramerateMode {
        self.framerate.unwrap_or_default()
    }

    pub fn effective_codec(&self) -> VideoCodec {
        self.codec.unwrap_or_default()
    }

    pub fn effective_extra_quality(&self) -> bool {
        self.extra_quality.unwrap_or(false)
    }

    pub fn effective_hardware_acceleration(&self) -> bool {
        self.hardware_acceleration.unwrap_or(false)
    }

    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn target_bytes(&self) -> u64 {
        (self.target_size_mib * BYTES_PER_MIB).round() as u64
    }

    /// `<passlog_dir>/<output stem>-2pass`, when a passlog dir was given.
    pub fn passlog_prefix(&self) -> Option<PathBuf> {
        let dir = self.passlog_dir.as_ref()?;
        let stem = self
            .output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vidfit".to_string());
        Some(dir.join(format!("{}-2pass", stem)))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.input_path.as_os_str().is_empty() {
            return Err(AppError::InvalidRequest("input path is empty".into()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(AppError::InvalidRequest("output path is empty".into()));
        }
        if !self.target_size_mib.is_finite() || self.target_size_mib <= 0.0 {
            return Err(AppError::InvalidRequest(format!(
                "target size must be a positive number of MiB, got {}",
                self.target_size_mib
            )));
        }
        let tolerance = self.effective_tolerance();
        if !(0.0..=100.0).contains(&tolerance) {
            return Err(AppError::InvalidRequest(format!(
                "tolerance must be between 0 and 100 percent, got {}",
                tolerance
            )));
        }
        if self.effective_max_attempts() == 0 {
            return Err(AppError::InvalidRequest(
                "attempt cap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of one loop iteration, fixed before its encode starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeAttempt {
    /// 1-based.
    pub attempt: u32,
    pub video_bitrate: i64,
    pub audio_bitrate: i64,
    pub is_hq_audio: bool,
    /// Preset height, i.e. the "480p" a user would read.
    pub height: u32,
    pub fps: u32,
}

impl EncodeAttempt {
    fn new(attempt: u32, settings: &EncodeSettings) -> Self {
        Self {
            attempt,
            video_bitrate: settings.video_bitrate,
            audio_bitrate: settings.audio_bitrate,
            is_hq_audio: settings.is_hq_audio(),
            height: settings.height,
            fps: settings.fps,
        }
    }
}

/// An attempt whose output missed the tolerance window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFailure {
    #[serde(flatten)]
    pub attempt: EncodeAttempt,
    pub actual_bytes: u64,
    pub target_bytes: u64,
}

impl AttemptFailure {
    pub fn percent_of_target(&self) -> f64 {
        percent_of_target(self.actual_bytes, self.target_bytes)
    }

    pub fn overshot(&self) -> bool {
        self.actual_bytes > self.target_bytes
    }
}

/// Callbacks fired from the worker thread running the loop. Implementors do
/// their own marshalling.
pub trait CompressionEvents {
    fn on_progress(&self, _sample: ProgressSample) {}
    fn on_new_attempt(&self, _attempt: &EncodeAttempt) {}
    fn on_attempt_fail(&self, _failure: &AttemptFailure) {}
}

impl CompressionEvents for () {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CompressionOutcome {
    Success {
        output_path: PathBuf,
        output_bytes: u64,
        attempts: u32,
    },
    /// The input is already no larger than the target. Nothing was written.
    AlreadyMeetsTarget { input_bytes: u64 },
    /// Stopped on request. A partial output may remain on disk.
    Cancelled,
}

/// What the first attempt would do for a probed source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPreview {
    pub total_bitrate: i64,
    pub crush_mode: bool,
    pub video_bitrate: i64,
    pub audio_bitrate: i64,
    pub is_hq_audio: bool,
    pub height: u32,
    pub fps: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub frame_budget: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreview {
    pub first_pass: Vec<String>,
    pub second_pass: Vec<String>,
}

fn percent_of_target(actual_bytes: u64, target_bytes: u64) -> f64 {
    100.0 * actual_bytes as f64 / target_bytes.max(1) as f64
}

fn settings_for(request: &CompressionRequest, probe: &SourceProbe, factor: f64) -> EncodeSettings {
    compute_settings(
        request.target_size_mib,
        request.effective_framerate(),
        probe.width,
        probe.height,
        probe.source_fps,
        probe.duration_seconds,
        factor,
    )
}

/// Resolve `settings` into a concrete encode of `request.input_path`.
pub fn plan_job(
    request: &CompressionRequest,
    probe: &SourceProbe,
    settings: &EncodeSettings,
) -> TranscodeJob {
    let (width, height) =
        destination_dimensions(probe.width, probe.height, probe.is_portrait, settings.height);
    TranscodeJob {
        input: request.input_path.clone(),
        output: request.output_path.clone(),
        video_bitrate: settings.video_bitrate,
        audio_bitrate: settings.audio_bitrate,
        width,
        height,
        fps: Some(settings.fps),
        codec: request.effective_codec(),
        extra_quality: request.effective_extra_quality(),
        hardware_acceleration: request.effective_hardware_acceleration(),
        frame_budget: destination_frame_budget(probe.frame_count, probe.source_fps, settings.fps),
        passlog_prefix: request.passlog_prefix(),
    }
}

pub fn preview_settings(request: &CompressionRequest, probe: &SourceProbe) -> SettingsPreview {
    let settings = settings_for(request, probe, 1.0);
    let job = plan_job(request, probe, &settings);
    let total = total_bitrate(request.target_size_mib, probe.duration_seconds, 1.0);
    SettingsPreview {
        total_bitrate: total,
        crush_mode: is_crush_mode(total as f64),
        video_bitrate: settings.video_bitrate,
        audio_bitrate: settings.audio_bitrate,
        is_hq_audio: settings.is_hq_audio(),
        height: settings.height,
        fps: settings.fps,
        output_width: job.width,
        output_height: job.height,
        frame_budget: job.frame_budget,
    }
}

pub fn preview_commands(request: &CompressionRequest, probe: &SourceProbe) -> CommandPreview {
    let settings = settings_for(request, probe, 1.0);
    let job = plan_job(request, probe, &settings);
    CommandPreview {
        first_pass: build_pass_args(&job, EncodePass::First),
        second_pass: build_pass_args(&job, EncodePass::Second),
    }
}

/// `<stem>-N.<ext>` next to `path` for the first N >= 1 that does not exist.
pub fn unique_output_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u64..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{}-{}.{}", stem, n, ext),
                None => format!("{}-{}", stem, n),
            };
            parent.join(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn reserve_output(path: &Path) -> Result<(), AppError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
        .map_err(|e| AppError::from_output_create(e, path.to_path_buf()))
}

/// Loop-owned mutable state.
#[derive(Debug)]
struct ConvergenceState {
    attempt: u32,
    factor: f64,
    last_failure: Option<AttemptFailure>,
}

impl ConvergenceState {
    fn new() -> Self {
        Self {
            attempt: 0,
            factor: 1.0,
            last_failure: None,
        }
    }

    fn correct(&mut self, percent: f64) {
        self.factor *= 100.0 / percent.max(MIN_PERCENT_FOR_CORRECTION);
        if percent > 100.0 {
            self.factor *= OVERSHOOT_DAMPING;
        }
    }
}

/// Drives probe, settings and encoder until the output fits.
pub struct Compressor<P = FfprobeProber, T = FfmpegTranscoder> {
    prober: P,
    transcoder: T,
}

impl Compressor {
    /// Uses the system ffprobe and FFmpeg.
    pub fn new() -> Self {
        Self::with_backends(FfprobeProber::new(), FfmpegTranscoder::new())
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: MediaProber, T: Transcoder> Compressor<P, T> {
    pub fn with_backends(prober: P, transcoder: T) -> Self {
        Self { prober, transcoder }
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Run the loop to completion on the calling thread.
    pub fn run(
        &self,
        request: &CompressionRequest,
        events: &dyn CompressionEvents,
        cancel: &dyn CancelSignal,
    ) -> Result<CompressionOutcome, AppError> {
        request.validate()?;
        let target_bytes = request.target_bytes();
        let tolerance = request.effective_tolerance();
        let max_attempts = request.effective_max_attempts();

        let input_bytes = fs::metadata(&request.input_path)
            .map_err(|e| AppError::Probe(format!("{}: {}", request.input_path.display(), e)))?
            .len();
        if input_bytes <= target_bytes {
            log::info!(
                target: "vidfit::compress",
                "{} is already {} bytes (target {}), nothing to do",
                request.input_path.display(),
                input_bytes,
                target_bytes
            );
            return Ok(CompressionOutcome::AlreadyMeetsTarget { input_bytes });
        }

        reserve_output(&request.output_path)?;
        let probe = self.prober.probe(&request.input_path)?;

        let mut state = ConvergenceState::new();
        loop {
            if let Some(failure) = &state.last_failure {
                events.on_attempt_fail(failure);
                if state.attempt >= max_attempts {
                    log::warn!(
                        target: "vidfit::compress",
                        "Giving up after {} attempts",
                        state.attempt
                    );
                    return Err(AppError::NonConvergence {
                        attempts: state.attempt,
                    });
                }
            }

            state.attempt += 1;
            let settings = settings_for(request, &probe, state.factor);
            let attempt = EncodeAttempt::new(state.attempt, &settings);
            log::info!(
                target: "vidfit::compress",
                "Attempt {}: {} bps video, {} bps audio, {}p@{} (factor {:.4})",
                attempt.attempt,
                attempt.video_bitrate,
                attempt.audio_bitrate,
                attempt.height,
                attempt.fps,
                state.factor
            );
            events.on_new_attempt(&attempt);
            events.on_progress(ProgressSample {
                fraction: 0.0,
                seconds_left: None,
            });

            if settings.video_bitrate < MIN_VIDEO_BITRATE {
                return Err(AppError::BitrateUnderflow {
                    bitrate: settings.video_bitrate,
                });
            }

            let job = plan_job(request, &probe, &settings);
            let status = self.transcoder.transcode(
                &job,
                &mut |sample| events.on_progress(sample),
                cancel,
            )?;
            if status == TranscodeStatus::Cancelled || cancel.is_cancelled() {
                log::info!(target: "vidfit::compress", "Compression cancelled");
                return Ok(CompressionOutcome::Cancelled);
            }

            let actual_bytes = fs::metadata(&request.output_path)
                .map_err(|_| AppError::OutputMissing(request.output_path.clone()))?
                .len();
            let percent = percent_of_target(actual_bytes, target_bytes);
            log::info!(
                target: "vidfit::compress",
                "Attempt {} produced {} bytes ({:.1}% of target)",
                attempt.attempt,
                actual_bytes,
                percent
            );

            if (100.0 - tolerance..=100.0).contains(&percent) {
                return Ok(CompressionOutcome::Success {
                    output_path: request.output_path.clone(),
                    output_bytes: actual_bytes,
                    attempts: state.attempt,
                });
            }

            state.correct(percent);
            state.last_failure = Some(AttemptFailure {
                attempt,
                actual_bytes,
                target_bytes,
            });
        }
    }
}
