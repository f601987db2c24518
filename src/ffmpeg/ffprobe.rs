//! FFprobe-based source inspection. One ffprobe run gathers everything the
//! settings calculator needs: duration, frame rate, frame size, rotation and a
//! packet-counted frame total.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::discovery::get_ffprobe_path;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    #[serde(default)]
    rotation: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    nb_read_packets: Option<Value>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// Source properties, computed once per compression run.
///
/// `width`/`height` are the decoded frame size before any display rotation;
/// `is_portrait` already accounts for a quarter-turn rotation flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProbe {
    pub duration_seconds: f64,
    pub source_fps: u32,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub is_portrait: bool,
}

/// Seam for source inspection so the convergence loop can run without ffprobe.
pub trait MediaProber {
    fn probe(&self, path: &Path) -> Result<SourceProbe, AppError>;
}

impl<P: MediaProber + ?Sized> MediaProber for &P {
    fn probe(&self, path: &Path) -> Result<SourceProbe, AppError> {
        (**self).probe(path)
    }
}

/// Probes with the ffprobe binary found next to FFmpeg, or an explicit one.
#[derive(Debug, Clone, Default)]
pub struct FfprobeProber {
    binary: Option<PathBuf>,
}

impl FfprobeProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<SourceProbe, AppError> {
        let ffprobe = match &self.binary {
            Some(p) => p.clone(),
            None => get_ffprobe_path()?,
        };
        probe_source(&ffprobe, path)
    }
}

/// Rounds an `N/D` frame rate to whole frames per second.
fn parse_frame_rate(s: &str) -> Option<u32> {
    let (num, den) = s.trim().split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    let fps = (num / den).round();
    (fps >= 1.0).then_some(fps as u32)
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_quarter_turn(rotation: i64) -> bool {
    rotation.rem_euclid(180) == 90
}

pub fn parse_probe_json(json: &str) -> Result<SourceProbe, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::Probe(format!("unparseable ffprobe output: {}", e)))?;

    let duration_seconds = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| AppError::Probe("missing or invalid duration".into()))?;

    let stream = output
        .streams
        .first()
        .ok_or_else(|| AppError::Probe("no video stream".into()))?;

    let source_fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| AppError::Probe("missing or invalid frame rate".into()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(AppError::Probe("missing frame size".into())),
    };

    let rotation = stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation.as_ref().and_then(value_as_i64))
        .unwrap_or(0);

    let frame_count = stream
        .nb_read_packets
        .as_ref()
        .and_then(value_as_i64)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(1);

    Ok(SourceProbe {
        duration_seconds,
        source_fps,
        width,
        height,
        frame_count,
        is_portrait: (width < height) ^ is_quarter_turn(rotation),
    })
}

/// Run ffprobe on `path` and parse the first video stream.
pub fn probe_source(ffprobe: &Path, path: &Path) -> Result<SourceProbe, AppError> {
    let path_str = path.to_string_lossy();

    log::debug!(
        target: "vidfit::ffmpeg::ffprobe",
        "probe_source: ffprobe={}, path={}",
        ffprobe.display(),
        path_str
    );

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "format=duration:stream=width,height,r_frame_rate,nb_read_packets:stream_side_data=rotation",
            "-of",
            "json",
            &path_str,
        ])
        .output()
        .map_err(|e| AppError::Probe(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::Probe(format!("ffprobe failed: {}", stderr.trim())));
    }

    let json = String::from_utf8(output.stdout)
        .map_err(|_| AppError::Probe("ffprobe output was not valid UTF-8".into()))?;

    let probe = parse_probe_json(&json)?;
    log::debug!(
        target: "vidfit::ffmpeg::ffprobe",
        "probed {}x{}@{} {:.2}s frames={} portrait={}",
        probe.width,
        probe.height,
        probe.source_fps,
        probe.duration_seconds,
        probe.frame_count,
        probe.is_portrait
    );
    Ok(probe)
}
