//! App error type for the compression engine. Implements Display and Serialize so a
//! shell can show the message as-is.

use std::io;
use std::path::PathBuf;

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("Could not retrieve video properties. Source video may be missing or corrupted. ({0})")]
    Probe(String),

    #[error(
        "Could not create exported file. A file with the reserved name already exists: {}",
        .0.display()
    )]
    PathCollision(PathBuf),

    #[error(
        "Could not create exported file. There are insufficient permissions to create a file at {}",
        .0.display()
    )]
    Permission(PathBuf),

    #[error(
        "Video bitrate got too low ({bitrate} bps, below 5 Kbps). The target size may be too low for this file."
    )]
    BitrateUnderflow { bitrate: i64 },

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error(
        "Cannot read output file {}. Was it moved or deleted mid-compression?",
        .0.display()
    )]
    OutputMissing(PathBuf),

    #[error("Output size did not land inside the tolerance window after {attempts} attempts")]
    NonConvergence { attempts: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown codec: {0}")]
    UnknownCodec(String),
}

impl AppError {
    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// Maps a failure to create the output file to the collision/permission taxonomy.
    pub fn from_output_create(err: io::Error, path: PathBuf) -> Self {
        match err.kind() {
            io::ErrorKind::AlreadyExists => Self::PathCollision(path),
            io::ErrorKind::PermissionDenied => Self::Permission(path),
            _ => Self::Io(io::Error::new(
                err.kind(),
                format!("cannot create {}: {}", path.display(), err),
            )),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// Spawn and pipe failures of the external tools carry no exit code.
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::FfmpegFailed {
            code: -1,
            stderr: s,
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
