//! Resolution and encoder-speed presets.
//!
//! Bitrate/resolution pairs follow the VP9 VOD recommendations
//! (<https://developers.google.com/media/vp9/settings/vod>). Each ladder is ordered
//! from the highest lower bound to the 144p floor at 0 Kbps.

use crate::codec::VideoCodec;

/// (lower bound in Kbps, (width, height))
type Ladder = [(u32, (u32, u32)); 8];

const LADDER_30FPS: Ladder = [
    (12000, (3840, 2160)),
    (6000, (2560, 1440)),
    (1800, (1920, 1080)),
    (1024, (1280, 720)),
    (512, (640, 480)),
    (276, (640, 360)),
    (150, (320, 240)),
    (0, (192, 144)),
];

const LADDER_60FPS: Ladder = [
    (18000, (3840, 2160)),
    (9000, (2560, 1440)),
    (3000, (1920, 1080)),
    (1800, (1280, 720)),
    (750, (640, 480)),
    (276, (640, 360)),
    (150, (320, 240)),
    (0, (192, 144)),
];

fn ladder_for(framerate: u32) -> &'static Ladder {
    if framerate <= 30 {
        &LADDER_30FPS
    } else {
        &LADDER_60FPS
    }
}

/// Picks an output height for `bitrate_bps` that never upscales the source.
///
/// Walks the framerate's ladder from the top and takes the first preset whose
/// bound the bitrate reaches and whose pixel count fits inside the source. When
/// nothing fits (tiny sources, or a bitrate below every bound) the source's short
/// side is returned so the output stays at source size. The result is also
/// clamped to the short side, which matters for very wide or very tall sources
/// whose pixel count admits a preset taller than the frame itself.
pub fn select_resolution(
    bitrate_bps: i64,
    source_width: u32,
    source_height: u32,
    framerate: u32,
) -> u32 {
    let source_pixels = u64::from(source_width) * u64::from(source_height);
    let short_side = source_width.min(source_height);
    let bitrate_kbps = bitrate_bps as f64 / 1000.0;

    ladder_for(framerate)
        .iter()
        .find(|(bound, (w, h))| {
            bitrate_kbps >= f64::from(*bound) && u64::from(*w) * u64::from(*h) <= source_pixels
        })
        .map(|(_, (_, h))| (*h).min(short_side))
        .unwrap_or(short_side)
}

/// Encoder speed token for `codec`. Frames taller than 480 lines encode on a
/// faster preset unless extra quality was requested.
pub fn select_encoding_speed(
    frame_height: u32,
    codec: VideoCodec,
    extra_quality: bool,
) -> &'static str {
    let hd = frame_height > 480;
    match (codec, extra_quality) {
        (VideoCodec::H264, true) | (VideoCodec::Hevc, true) => "veryslow",
        (VideoCodec::H264, false) => {
            if hd {
                "medium"
            } else {
                "slower"
            }
        }
        (VideoCodec::Hevc, false) => {
            if hd {
                "medium"
            } else {
                "slow"
            }
        }
        (VideoCodec::Av1, true) => "4",
        (VideoCodec::Av1, false) => {
            if hd {
                "10"
            } else {
                "8"
            }
        }
        (VideoCodec::Vp9, true) => "0",
        (VideoCodec::Vp9, false) => {
            if hd {
                "5"
            } else {
                "4"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_fitting_preset_at_30fps() {
        assert_eq!(select_resolution(2_000_000, 1920, 1080, 30), 1080);
        assert_eq!(select_resolution(1_024_000, 1920, 1080, 30), 720);
        assert_eq!(select_resolution(600_000, 1920, 1080, 30), 480);
        assert_eq!(select_resolution(150_000, 1920, 1080, 30), 240);
        assert_eq!(select_resolution(10_000, 1920, 1080, 30), 144);
    }

    #[test]
    fn sixty_fps_ladder_needs_more_bitrate() {
        assert_eq!(select_resolution(2_000_000, 1920, 1080, 60), 720);
        assert_eq!(select_resolution(600_000, 1920, 1080, 60), 360);
        assert_eq!(select_resolution(3_000_000, 1920, 1080, 60), 1080);
    }

    #[test]
    fn thirty_fps_is_inclusive_boundary() {
        assert_eq!(select_resolution(600_000, 1920, 1080, 30), 480);
        assert_eq!(select_resolution(600_000, 1920, 1080, 31), 360);
    }

    #[test]
    fn never_upscales_small_source() {
        // 4K bitrate, but source is 640x360.
        assert_eq!(select_resolution(50_000_000, 640, 360, 30), 360);
    }

    #[test]
    fn tiny_source_passes_through_short_side() {
        assert_eq!(select_resolution(1_000_000, 160, 120, 30), 120);
        assert_eq!(select_resolution(1_000_000, 120, 160, 30), 120);
    }

    #[test]
    fn negative_bitrate_passes_through() {
        assert_eq!(select_resolution(-10_000, 1920, 1080, 30), 1080);
    }

    #[test]
    fn wide_source_height_is_clamped() {
        // 3000x500 has more pixels than 1280x720, but only 500 lines.
        assert_eq!(select_resolution(1_500_000, 3000, 500, 30), 500);
    }

    #[test]
    fn portrait_source_uses_pixel_count() {
        assert_eq!(select_resolution(1_100_000, 1080, 1920, 30), 720);
    }

    #[test]
    fn pixel_count_never_exceeds_source() {
        let sources = [(1920, 1080), (1080, 1920), (640, 360), (200, 150), (3840, 2160), (720, 480)];
        for (w, h) in sources {
            for fps in [24, 30, 60] {
                for kbps in (0..25_000).step_by(97) {
                    let height = select_resolution(i64::from(kbps) * 1000, w, h, fps);
                    assert!(height <= w.min(h), "{w}x{h}@{fps} {kbps}Kbps -> {height}");
                    let width = (u64::from(w.max(h)) * u64::from(height)) / u64::from(w.min(h));
                    assert!(width * u64::from(height) <= u64::from(w) * u64::from(h));
                }
            }
        }
    }

    #[test]
    fn speed_tokens() {
        assert_eq!(select_encoding_speed(1080, VideoCodec::H264, false), "medium");
        assert_eq!(select_encoding_speed(480, VideoCodec::H264, false), "slower");
        assert_eq!(select_encoding_speed(480, VideoCodec::Hevc, false), "slow");
        assert_eq!(select_encoding_speed(720, VideoCodec::Hevc, true), "veryslow");
        assert_eq!(select_encoding_speed(720, VideoCodec::Av1, false), "10");
        assert_eq!(select_encoding_speed(360, VideoCodec::Av1, false), "8");
        assert_eq!(select_encoding_speed(360, VideoCodec::Av1, true), "4");
        assert_eq!(select_encoding_speed(1080, VideoCodec::Vp9, false), "5");
        assert_eq!(select_encoding_speed(240, VideoCodec::Vp9, false), "4");
        assert_eq!(select_encoding_speed(240, VideoCodec::Vp9, true), "0");
    }
}
