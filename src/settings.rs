//! Encoder parameters derived from a target size.
//!
//! Everything here is pure: the same inputs always produce the same settings,
//! which is what lets the convergence loop steer purely through its correction
//! factor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::preset::select_resolution;

/// Bitrate headroom kept back for container and metadata overhead.
const CONTAINER_OVERHEAD_SCALE: f64 = 0.99;

/// Lowest recommended 240p video bitrate (150 Kbps) plus a good Opus bitrate
/// (96 Kbps). Below this the total budget cannot afford both.
pub const CRUSH_THRESHOLD_KBPS: f64 = 246.0;

pub const AUDIO_BITRATE: i64 = 96_000;
pub const CRUSH_AUDIO_BITRATE: i64 = 6_000;
pub const CRUSH_MAX_FPS: u32 = 24;

/// Audio above this counts as high quality when reporting attempts.
pub const HQ_AUDIO_THRESHOLD: i64 = 48_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FramerateMode {
    /// Allow 60 fps only where it costs no resolution.
    #[default]
    Auto,
    /// Cap at 30 fps for sharper frames.
    PreferClear,
    /// Cap at 60 fps for smoother motion.
    PreferSmooth,
}

impl FramerateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FramerateMode::Auto => "auto",
            FramerateMode::PreferClear => "prefer-clear",
            FramerateMode::PreferSmooth => "prefer-smooth",
        }
    }
}

impl fmt::Display for FramerateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramerateMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(FramerateMode::Auto),
            "prefer-clear" => Ok(FramerateMode::PreferClear),
            "prefer-smooth" => Ok(FramerateMode::PreferSmooth),
            other => Err(AppError::InvalidRequest(format!(
                "unknown framerate mode '{}' (expected auto, prefer-clear or prefer-smooth)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeSettings {
    pub video_bitrate: i64,
    pub audio_bitrate: i64,
    pub height: u32,
    pub fps: u32,
}

impl EncodeSettings {
    pub fn is_hq_audio(&self) -> bool {
        self.audio_bitrate > HQ_AUDIO_THRESHOLD
    }
}

/// Total bitrate (video + audio) for `target_size_mib` spread over `duration_seconds`,
/// scaled by the correction factor and the container headroom.
pub fn total_bitrate(target_size_mib: f64, duration_seconds: f64, correction_factor: f64) -> i64 {
    let target_bits = target_size_mib * 1024.0 * 1024.0 * 8.0;
    let naive = (target_bits / duration_seconds).round() * correction_factor;
    (naive * CONTAINER_OVERHEAD_SCALE).round() as i64
}

pub fn is_crush_mode(total_bitrate: f64) -> bool {
    total_bitrate / 1000.0 < CRUSH_THRESHOLD_KBPS
}

/// Derives bitrate, height and fps for one attempt.
///
/// Crush mode trades audio (6 Kbps) and motion (24 fps cap) for picture bits when
/// the total budget is too small for 240p video plus decent audio, which keeps
/// many low targets off the 144p preset.
pub fn compute_settings(
    target_size_mib: f64,
    fps_mode: FramerateMode,
    source_width: u32,
    source_height: u32,
    source_fps: u32,
    duration_seconds: f64,
    correction_factor: f64,
) -> EncodeSettings {
    let total = total_bitrate(target_size_mib, duration_seconds, correction_factor);
    let crush = is_crush_mode(total as f64);
    let audio_bitrate = if crush {
        CRUSH_AUDIO_BITRATE
    } else {
        AUDIO_BITRATE
    };
    let video_bitrate = total - audio_bitrate;

    let mut preset_height = None;
    let max_fps = if crush {
        CRUSH_MAX_FPS
    } else {
        match fps_mode {
            FramerateMode::PreferClear => 30,
            FramerateMode::PreferSmooth => 60,
            FramerateMode::Auto => {
                let at_30 = select_resolution(video_bitrate, source_width, source_height, 30);
                let at_60 = select_resolution(video_bitrate, source_width, source_height, 60);
                preset_height = Some(at_30);
                if at_30 == at_60 && at_30 >= 720 { 60 } else { 30 }
            }
        }
    };

    let fps = source_fps.min(max_fps);
    let height = preset_height
        .unwrap_or_else(|| select_resolution(video_bitrate, source_width, source_height, fps));

    EncodeSettings {
        video_bitrate,
        audio_bitrate,
        height,
        fps,
    }
}

/// Output frame size for `target_height`.
///
/// The width follows the source aspect ratio in landscape orientation. Both sides
/// are floored to an even number (minimum 2) for yuv420p. Portrait sources get
/// width and height swapped back.
pub fn destination_dimensions(
    source_width: u32,
    source_height: u32,
    is_portrait: bool,
    target_height: u32,
) -> (u32, u32) {
    let long_side = u64::from(source_width.max(source_height));
    let short_side = u64::from(source_width.min(source_height)).max(1);
    let scaled = long_side * u64::from(target_height) / short_side;
    let width = even_floor(scaled);
    let height = even_floor(u64::from(target_height));

    if is_portrait {
        (height, width)
    } else {
        (width, height)
    }
}

fn even_floor(side: u64) -> u32 {
    ((side / 2) * 2).max(2) as u32
}

/// Frames expected in the output once the framerate is reduced.
pub fn destination_frame_budget(source_frame_count: u64, source_fps: u32, target_fps: u32) -> u64 {
    if source_fps == 0 || target_fps == 0 {
        return source_frame_count;
    }
    let ratio = f64::from(source_fps) / f64::from(target_fps);
    (source_frame_count as f64 / ratio).floor() as u64
}
