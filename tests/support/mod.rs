#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use vidfit_core::cancel::CancelSignal;
use vidfit_core::compress::{AttemptFailure, CompressionEvents, EncodeAttempt};
use vidfit_core::error::AppError;
use vidfit_core::ffmpeg::{MediaProber, ProgressSample, SourceProbe, TranscodeJob};
use vidfit_core::transcode::{TranscodeStatus, Transcoder};

pub const MIB: u64 = 1024 * 1024;

/// 1920x1080@30, 120 s, 3600 frames.
pub fn hd_probe() -> SourceProbe {
    SourceProbe {
        duration_seconds: 120.0,
        source_fps: 30,
        width: 1920,
        height: 1080,
        frame_count: 3600,
        is_portrait: false,
    }
}

/// Sparse file of `bytes` bytes.
pub fn sized_file(path: &Path, bytes: u64) -> PathBuf {
    let file = fs::File::create(path).expect("create sized file");
    file.set_len(bytes).expect("set file length");
    path.to_path_buf()
}

pub struct StaticProber {
    result: Result<SourceProbe, String>,
    calls: AtomicU32,
}

impl StaticProber {
    pub fn new(probe: SourceProbe) -> Self {
        Self {
            result: Ok(probe),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaProber for StaticProber {
    fn probe(&self, _path: &Path) -> Result<SourceProbe, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(AppError::Probe)
    }
}

type SizeModel = Box<dyn Fn(&TranscodeJob) -> u64 + Send + Sync>;
type Hook = Box<dyn Fn(&TranscodeJob, &dyn CancelSignal) -> Result<Option<TranscodeStatus>, AppError> + Send + Sync>;

/// Writes an output file whose size is a deterministic function of the job.
pub struct SimulatedTranscoder {
    size_model: SizeModel,
    hook: Option<Hook>,
    jobs: Mutex<Vec<TranscodeJob>>,
}

impl SimulatedTranscoder {
    pub fn with_model(model: impl Fn(&TranscodeJob) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            size_model: Box::new(model),
            hook: None,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// `size = (video + audio bitrate) * duration / 8 * efficiency`
    pub fn linear(duration_seconds: f64, efficiency: f64) -> Self {
        Self::with_model(move |job| {
            let total = (job.video_bitrate + job.audio_bitrate) as f64;
            (total * duration_seconds / 8.0 * efficiency) as u64
        })
    }

    /// Size counts only the video stream, so the first attempt undershoots.
    pub fn video_only(duration_seconds: f64) -> Self {
        Self::with_model(move |job| (job.video_bitrate as f64 * duration_seconds / 8.0) as u64)
    }

    /// Runs before the output is written. `Ok(Some(status))` short-circuits.
    pub fn with_hook(
        mut self,
        hook: impl Fn(&TranscodeJob, &dyn CancelSignal) -> Result<Option<TranscodeStatus>, AppError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.lock().clone()
    }
}

impl Transcoder for SimulatedTranscoder {
    fn transcode(
        &self,
        job: &TranscodeJob,
        on_progress: &mut dyn FnMut(ProgressSample),
        cancel: &dyn CancelSignal,
    ) -> Result<TranscodeStatus, AppError> {
        self.jobs.lock().push(job.clone());
        if cancel.is_cancelled() {
            return Ok(TranscodeStatus::Cancelled);
        }
        if let Some(hook) = &self.hook {
            if let Some(status) = hook(job, cancel)? {
                return Ok(status);
            }
        }
        for step in 1u32..=4 {
            on_progress(ProgressSample {
                fraction: f64::from(step) / 4.0,
                seconds_left: Some(u64::from(4 - step).max(1)),
            });
        }
        let file = fs::File::create(&job.output)?;
        file.set_len((self.size_model)(job))?;
        Ok(TranscodeStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(ProgressSample),
    NewAttempt(EncodeAttempt),
    AttemptFail(AttemptFailure),
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<Event>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn attempts(&self) -> Vec<EncodeAttempt> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::NewAttempt(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<AttemptFailure> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::AttemptFail(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<ProgressSample> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

impl CompressionEvents for RecordingEvents {
    fn on_progress(&self, sample: ProgressSample) {
        self.events.lock().push(Event::Progress(sample));
    }

    fn on_new_attempt(&self, attempt: &EncodeAttempt) {
        self.events.lock().push(Event::NewAttempt(*attempt));
    }

    fn on_attempt_fail(&self, failure: &AttemptFailure) {
        self.events.lock().push(Event::AttemptFail(*failure));
    }
}

/// Executable shell script at `dir/name`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// ffprobe stand-in that prints a fixed JSON document.
#[cfg(unix)]
pub fn fake_ffprobe(dir: &Path, probe: &SourceProbe) -> PathBuf {
    let json = format!(
        r#"{{"programs": [], "streams": [{{"width": {}, "height": {}, "r_frame_rate": "{}/1", "nb_read_packets": "{}"}}], "format": {{"duration": "{:.6}"}}}}"#,
        probe.width, probe.height, probe.source_fps, probe.frame_count, probe.duration_seconds
    );
    write_script(
        dir,
        "ffprobe",
        &format!("#!/bin/sh\ncat <<'EOF'\n{}\nEOF\n", json),
    )
}

/// FFmpeg stand-in. Emits a `-progress` stream and, on pass 2, writes an output
/// of `(b:v + b:a) * duration / 8` bytes. Every invocation appends its pid and
/// argv to `dir/ffmpeg.log`. With `hang` set it streams progress forever.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, duration_seconds: u64, hang: bool) -> PathBuf {
    let log = dir.join("ffmpeg.log");
    let body = format!(
        r#"#!/bin/sh
echo "$$ $*" >> "{log}"
pass=""; vb=0; ab=0; prev=""; last=""
for a in "$@"; do
    case "$prev" in
        -pass) pass="$a" ;;
        -b:v) vb="$a" ;;
        -b:a) ab="$a" ;;
    esac
    prev="$a"
    last="$a"
done
i=0
while [ {hang} -eq 1 ] || [ $i -lt 12 ]; do
    i=$((i + 1))
    echo "frame=$((i * 300))"
    echo "fps=120.0"
    echo "progress=continue"
    [ {hang} -eq 1 ] && sleep 0.01
done
echo "progress=end"
if [ "$pass" = "2" ]; then
    head -c $(( (vb + ab) * {duration} / 8 )) /dev/zero > "$last"
fi
exit 0
"#,
        log = log.display(),
        hang = if hang { 1 } else { 0 },
        duration = duration_seconds,
    );
    write_script(dir, "ffmpeg", &body)
}

/// Temp dir plus the FFmpeg the library resolves, for tests against a real install.
#[cfg(feature = "integration-test-api")]
pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    dir: tempfile::TempDir,
}

#[cfg(feature = "integration-test-api")]
impl IntegrationEnv {
    pub fn new() -> Self {
        let ffmpeg = vidfit_core::ffmpeg::discovery::get_ffmpeg_path().expect("FFmpeg not found");
        let dir = tempfile::tempdir().expect("tempdir");
        Self { ffmpeg, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Noisy 1280x720@30 clip with a sine track, encoded well above any test target.
    pub fn with_test_video(&self, name: &str, duration_secs: f32) -> PathBuf {
        let output_path = self.path(name);
        let status = std::process::Command::new(&self.ffmpeg)
            .args([
                "-loglevel",
                "error",
                "-y",
                "-f",
                "lavfi",
                "-i",
                &format!("testsrc2=duration={}:size=1280x720:rate=30", duration_secs),
                "-f",
                "lavfi",
                "-i",
                &format!("sine=frequency=440:duration={}", duration_secs),
                "-vf",
                "noise=alls=60:allf=t",
                "-c:v",
                "libx264",
                "-b:v",
                "8M",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
                output_path.to_string_lossy().as_ref(),
            ])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}
