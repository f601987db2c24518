//! Library side of the `vidfit-sidecar` protocol: the work behind each method,
//! and the event bridge that turns loop callbacks into protocol events.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::cancel::CancelSignal;
use crate::codec::{CodecInfo, available_codecs};
use crate::compress::{
    AttemptFailure, CompressionEvents, CompressionOutcome, CompressionRequest, Compressor,
    EncodeAttempt, SettingsPreview, preview_commands, preview_settings, unique_output_path,
};
use crate::error::AppError;
use crate::ffmpeg::discovery::{get_available_encoders, get_ffmpeg_path};
use crate::ffmpeg::{
    FfprobeProber, MediaProber, ProgressSample, SourceProbe, format_args_for_display_multiline,
    path_to_string,
};

pub const PROTOCOL_VERSION: u8 = 1;

/// Receives `(event name, payload)` pairs. Called from the worker thread.
pub type SidecarEventEmitter = Arc<dyn Fn(&str, Value) + Send + Sync>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub ffmpeg_path: String,
    pub codecs: Vec<CodecInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub path: String,
    pub size: u64,
    #[serde(flatten)]
    pub probe: SourceProbe,
}

pub fn app_capabilities() -> Result<AppCapabilitiesResult, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    let encoders = get_available_encoders(&ffmpeg)?;
    Ok(AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        ffmpeg_path: path_to_string(&ffmpeg),
        codecs: available_codecs(&encoders)?,
    })
}

pub fn inspect_metadata(input_path: &Path) -> Result<MediaMetadata, AppError> {
    let size = fs::metadata(input_path)
        .map_err(|e| AppError::Probe(format!("{}: {}", input_path.display(), e)))?
        .len();
    let probe = FfprobeProber::new().probe(input_path)?;
    Ok(MediaMetadata {
        path: path_to_string(input_path),
        size,
        probe,
    })
}

pub fn settings_preview(request: &CompressionRequest) -> Result<SettingsPreview, AppError> {
    request.validate()?;
    let probe = FfprobeProber::new().probe(&request.input_path)?;
    Ok(preview_settings(request, &probe))
}

/// Both passes, one option per line, prefixed with the ffmpeg binary.
pub fn command_preview(request: &CompressionRequest) -> Result<String, AppError> {
    request.validate()?;
    let probe = FfprobeProber::new().probe(&request.input_path)?;
    Ok(render_command_preview(request, &probe, "ffmpeg"))
}

fn render_command_preview(request: &CompressionRequest, probe: &SourceProbe, binary: &str) -> String {
    let preview = preview_commands(request, probe);
    format!(
        "# pass 1\n{}\n{}\n\n# pass 2\n{}\n{}",
        binary,
        format_args_for_display_multiline(&preview.first_pass),
        binary,
        format_args_for_display_multiline(&preview.second_pass)
    )
}

pub fn unique_path(path: &Path) -> PathBuf {
    unique_output_path(path)
}

/// Forwards loop callbacks as `media.job.*` events tagged with the job id.
pub struct SidecarEvents {
    job_id: u64,
    emit: SidecarEventEmitter,
}

impl SidecarEvents {
    pub fn new(job_id: u64, emit: SidecarEventEmitter) -> Self {
        Self { job_id, emit }
    }
}

impl CompressionEvents for SidecarEvents {
    fn on_progress(&self, sample: ProgressSample) {
        (self.emit)(
            "media.job.progress",
            json!({
                "jobId": self.job_id,
                "fraction": sample.fraction,
                "secondsLeft": sample.seconds_left,
            }),
        );
    }

    fn on_new_attempt(&self, attempt: &EncodeAttempt) {
        (self.emit)(
            "media.job.attempt",
            json!({ "jobId": self.job_id, "attempt": attempt }),
        );
    }

    fn on_attempt_fail(&self, failure: &AttemptFailure) {
        (self.emit)(
            "media.job.attemptFail",
            json!({
                "jobId": self.job_id,
                "attempt": failure,
                "percentOfTarget": failure.percent_of_target(),
                "overshot": failure.overshot(),
            }),
        );
    }
}

/// Runs one compression with the system tools, streaming events through `emit`.
pub fn compress_with_events(
    job_id: u64,
    request: &CompressionRequest,
    emit: SidecarEventEmitter,
    cancel: &dyn CancelSignal,
) -> Result<CompressionOutcome, AppError> {
    log::info!(
        target: "vidfit::sidecar",
        "Job {}: {} -> {} ({} MiB)",
        job_id,
        request.input_path.display(),
        request.output_path.display(),
        request.target_size_mib
    );
    let events = SidecarEvents::new(job_id, emit);
    Compressor::new().run(request, &events, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_emitter() -> (SidecarEventEmitter, Arc<Mutex<Vec<(String, Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let emit: SidecarEventEmitter =
            Arc::new(move |name: &str, payload: Value| sink.lock().push((name.to_string(), payload)));
        (emit, seen)
    }

    #[test]
    fn progress_event_payload() {
        let (emit, seen) = recording_emitter();
        let events = SidecarEvents::new(7, emit);
        events.on_progress(ProgressSample {
            fraction: 0.25,
            seconds_left: None,
        });
        events.on_progress(ProgressSample {
            fraction: 0.5,
            seconds_left: Some(12),
        });

        let seen = seen.lock();
        assert_eq!(seen[0].0, "media.job.progress");
        assert_eq!(seen[0].1, json!({"jobId": 7, "fraction": 0.25, "secondsLeft": null}));
        assert_eq!(seen[1].1["secondsLeft"], 12);
    }

    #[test]
    fn attempt_events_carry_parameters() {
        let (emit, seen) = recording_emitter();
        let events = SidecarEvents::new(1, emit);
        let attempt = EncodeAttempt {
            attempt: 2,
            video_bitrate: 400_000,
            audio_bitrate: 96_000,
            is_hq_audio: true,
            height: 480,
            fps: 30,
        };
        events.on_new_attempt(&attempt);
        events.on_attempt_fail(&AttemptFailure {
            attempt,
            actual_bytes: 110,
            target_bytes: 100,
        });

        let seen = seen.lock();
        assert_eq!(seen[0].0, "media.job.attempt");
        assert_eq!(seen[0].1["attempt"]["videoBitrate"], 400_000);
        assert_eq!(seen[1].0, "media.job.attemptFail");
        assert_eq!(seen[1].1["attempt"]["actualBytes"], 110);
        assert_eq!(seen[1].1["overshot"], true);
    }

    #[test]
    fn command_preview_lists_both_passes() {
        let request = CompressionRequest::new("/in.mp4", "/out.mp4", 10.0);
        let probe = SourceProbe {
            duration_seconds: 120.0,
            source_fps: 30,
            width: 1920,
            height: 1080,
            frame_count: 3600,
            is_portrait: false,
        };
        let text = render_command_preview(&request, &probe, "ffmpeg");
        assert!(text.starts_with("# pass 1\nffmpeg\n  -nostdin"));
        assert!(text.contains("# pass 2"));
        assert!(text.contains("  -vf scale=852:480"));
        assert!(text.contains("  -pass 2"));
    }

    #[test]
    fn metadata_for_missing_file_is_probe_error() {
        let err = inspect_metadata(Path::new("/definitely/missing.mp4")).unwrap_err();
        assert!(matches!(err, AppError::Probe(_)));
    }
}
