use super::{TranscodeJob, null_sink, path_to_string};
use crate::codec::VideoCodec;
use crate::preset::select_encoding_speed;

/// Audio below this bitrate is downmixed to mono.
const MONO_AUDIO_THRESHOLD: i64 = 12_000;
/// VP9 analysis always runs at the fastest usable speed.
const VP9_FIRST_PASS_CPU_USED: &str = "4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePass {
    /// Analysis pass; output is discarded.
    First,
    /// Final pass; writes the destination file.
    Second,
}

impl EncodePass {
    fn number(self) -> &'static str {
        match self {
            EncodePass::First => "1",
            EncodePass::Second => "2",
        }
    }
}

fn wants_faststart(job: &TranscodeJob) -> bool {
    job.output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "mp4" | "mov" | "m4v"))
        .unwrap_or(false)
}

fn container_tag(codec: VideoCodec) -> Option<&'static str> {
    match codec {
        VideoCodec::Hevc => Some("hvc1"),
        VideoCodec::Av1 => Some("av01"),
        VideoCodec::H264 | VideoCodec::Vp9 => None,
    }
}

/// FFmpeg arguments (without the binary) for one pass of `job`.
pub fn build_pass_args(job: &TranscodeJob, pass: EncodePass) -> Vec<String> {
    let codec = job.codec;
    let speed = match (codec, pass) {
        (VideoCodec::Vp9, EncodePass::First) => VP9_FIRST_PASS_CPU_USED,
        _ => select_encoding_speed(job.frame_height(), codec, job.extra_quality),
    };

    log::debug!(
        target: "vidfit::ffmpeg::builder",
        "Building pass {} command: encoder={}, {}={}, {}x{}, b:v={}",
        pass.number(),
        codec.encoder_name(),
        codec.speed_flag(),
        speed,
        job.width,
        job.height,
        job.video_bitrate
    );

    let mut args: Vec<String> = vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
    ];
    if job.hardware_acceleration {
        args.extend(["-hwaccel".to_string(), "auto".to_string()]);
    }
    args.extend([
        "-i".to_string(),
        path_to_string(&job.input),
        codec.speed_flag().to_string(),
        speed.to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", job.width, job.height),
    ]);

    if let Some(prefix) = &job.passlog_prefix {
        args.extend(["-passlogfile".to_string(), path_to_string(prefix)]);
    }

    match codec {
        VideoCodec::Vp9 => args.extend([
            "-deadline".to_string(),
            "good".to_string(),
            "-row-mt".to_string(),
            "1".to_string(),
            "-frame-parallel".to_string(),
            "1".to_string(),
        ]),
        VideoCodec::H264 => args.extend(["-profile:v".to_string(), "main".to_string()]),
        VideoCodec::Hevc | VideoCodec::Av1 => {}
    }

    if let Some(fps) = job.fps {
        args.extend(["-r".to_string(), fps.to_string()]);
    }

    args.extend([
        "-c:v".to_string(),
        codec.encoder_name().to_string(),
        "-b:v".to_string(),
        job.video_bitrate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-pass".to_string(),
        pass.number().to_string(),
    ]);

    match pass {
        EncodePass::First => {
            args.extend([
                "-an".to_string(),
                "-f".to_string(),
                "null".to_string(),
                null_sink().to_string(),
            ]);
        }
        EncodePass::Second => {
            if let Some(tag) = container_tag(codec) {
                args.extend(["-tag:v".to_string(), tag.to_string()]);
            }
            if wants_faststart(job) {
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
            }
            let channels = if job.audio_bitrate < MONO_AUDIO_THRESHOLD { "1" } else { "2" };
            args.extend([
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                job.audio_bitrate.to_string(),
                "-ac".to_string(),
                channels.to_string(),
                path_to_string(&job.output),
            ]);
        }
    }

    args
}

/// Formats args for readable display: option and value on the same line when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-')
            && i + 1 < args.len()
            && !args[i + 1].starts_with('-')
        {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(codec: VideoCodec) -> TranscodeJob {
        TranscodeJob {
            input: PathBuf::from("/in.mov"),
            output: PathBuf::from("/out.mp4"),
            video_bitrate: 596_060,
            audio_bitrate: 96_000,
            width: 852,
            height: 480,
            fps: Some(30),
            codec,
            extra_quality: false,
            hardware_acceleration: false,
            frame_budget: 3600,
            passlog_prefix: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn h264_first_pass_discards_output() {
        let args = build_pass_args(&job(VideoCodec::H264), EncodePass::First);
        assert_eq!(&args[..6], ["-nostdin", "-y", "-progress", "pipe:1", "-i", "/in.mov"]);
        assert_eq!(value_after(&args, "-preset"), Some("slower"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=852:480"));
        assert_eq!(value_after(&args, "-profile:v"), Some("main"));
        assert_eq!(value_after(&args, "-r"), Some("30"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-b:v"), Some("596060"));
        assert_eq!(value_after(&args, "-pass"), Some("1"));
        assert_eq!(&args[args.len() - 4..], ["-an", "-f", "null", null_sink()]);
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn second_pass_writes_output_with_opus() {
        let args = build_pass_args(&job(VideoCodec::H264), EncodePass::Second);
        assert_eq!(value_after(&args, "-pass"), Some("2"));
        assert_eq!(value_after(&args, "-c:a"), Some("libopus"));
        assert_eq!(value_after(&args, "-b:a"), Some("96000"));
        assert_eq!(value_after(&args, "-ac"), Some("2"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
        assert!(!args.iter().any(|a| a == "-an"));
    }

    #[test]
    fn low_audio_bitrate_is_mono() {
        let mut j = job(VideoCodec::H264);
        j.audio_bitrate = 6000;
        let args = build_pass_args(&j, EncodePass::Second);
        assert_eq!(value_after(&args, "-ac"), Some("1"));
    }

    #[test]
    fn keep_source_fps_omits_rate() {
        let mut j = job(VideoCodec::Hevc);
        j.fps = None;
        let args = build_pass_args(&j, EncodePass::Second);
        assert!(!args.iter().any(|a| a == "-r"));
    }

    #[test]
    fn vp9_uses_cpu_used_and_fast_first_pass() {
        let mut j = job(VideoCodec::Vp9);
        j.output = PathBuf::from("/out.webm");
        let first = build_pass_args(&j, EncodePass::First);
        assert_eq!(value_after(&first, "-cpu-used"), Some("4"));
        assert_eq!(value_after(&first, "-deadline"), Some("good"));
        assert_eq!(value_after(&first, "-row-mt"), Some("1"));
        assert_eq!(value_after(&first, "-frame-parallel"), Some("1"));
        assert!(!first.iter().any(|a| a == "-preset"));

        j.extra_quality = true;
        let second = build_pass_args(&j, EncodePass::Second);
        assert_eq!(value_after(&second, "-cpu-used"), Some("0"));
        assert!(!second.iter().any(|a| a == "-movflags"));
        assert!(!second.iter().any(|a| a == "-tag:v"));
    }

    #[test]
    fn hevc_and_av1_get_container_tags() {
        let hevc = build_pass_args(&job(VideoCodec::Hevc), EncodePass::Second);
        assert_eq!(value_after(&hevc, "-tag:v"), Some("hvc1"));
        assert!(!hevc.iter().any(|a| a == "-profile:v"));

        let av1 = build_pass_args(&job(VideoCodec::Av1), EncodePass::Second);
        assert_eq!(value_after(&av1, "-tag:v"), Some("av01"));
        assert_eq!(value_after(&av1, "-preset"), Some("8"));
    }

    #[test]
    fn portrait_frame_height_uses_short_side() {
        let mut j = job(VideoCodec::H264);
        j.width = 720;
        j.height = 1280;
        let args = build_pass_args(&j, EncodePass::Second);
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=720:1280"));
    }

    #[test]
    fn passlog_and_hwaccel_are_optional() {
        let mut j = job(VideoCodec::H264);
        assert!(!build_pass_args(&j, EncodePass::First).iter().any(|a| a == "-passlogfile"));

        j.passlog_prefix = Some(PathBuf::from("/tmp/logs/out-2pass"));
        j.hardware_acceleration = true;
        for pass in [EncodePass::First, EncodePass::Second] {
            let args = build_pass_args(&j, pass);
            assert_eq!(value_after(&args, "-passlogfile"), Some("/tmp/logs/out-2pass"));
            assert_eq!(value_after(&args, "-hwaccel"), Some("auto"));
            let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
            let input = args.iter().position(|a| a == "-i").unwrap();
            assert!(hw < input);
        }
    }

    #[test]
    fn multiline_display_pairs_flags_with_values() {
        let args: Vec<String> = ["-y", "-i", "/in.mp4", "-an", "/out.mp4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            format_args_for_display_multiline(&args),
            "  -y\n  -i /in.mp4\n  -an /out.mp4"
        );
        assert_eq!(format_args_for_display_multiline(&[]), "");
    }
}
