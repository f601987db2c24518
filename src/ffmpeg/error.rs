//! Turn encoder failures into a short summary plus the full stderr as detail.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). -1 is used for spawn failure.

use serde::Serialize;

/// Failure payload sent to the shell. Summary is shown, detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_ffmpeg_error(stderr: &str, exit_code: Option<i32>) -> FfmpegErrorPayload {
    let summary = known_stderr_summary(stderr)
        .or_else(|| exit_code.and_then(known_exit_code_summary))
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("FFmpeg failed (exit code {}).", code),
            None => first_line_truncated(stderr, 120),
        });
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// Recognisable stderr lines that say more than the exit code does.
fn known_stderr_summary(stderr: &str) -> Option<String> {
    const PATTERNS: &[(&str, &str)] = &[
        ("Unknown encoder", "The selected encoder is not available in this FFmpeg build."),
        ("Invalid data found when processing input", "The source video could not be decoded."),
        ("No space left on device", "Ran out of disk space while writing the output."),
        ("Permission denied", "FFmpeg was not allowed to read or write a file."),
    ];
    PATTERNS
        .iter()
        .find(|(needle, _)| stderr.contains(needle))
        .map(|(_, summary)| summary.to_string())
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("FFmpeg not found or failed to start.".into()),
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}
