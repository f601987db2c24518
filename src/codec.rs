//! Video codecs the engine can target and the FFmpeg encoders behind them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
    Av1,
    Vp9,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodecInfo {
    pub value: VideoCodec,
    pub encoder: String,
    pub name: String,
}

macro_rules! codec_table {
    (
        $( [$variant:ident, $value:expr, $encoder:expr, $name:expr] ),* $(,)?
    ) => {
        impl VideoCodec {
            pub const ALL: &'static [VideoCodec] = &[ $( VideoCodec::$variant ),* ];

            /// Name used on the command line and in requests.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( VideoCodec::$variant => $value ),*
                }
            }

            /// FFmpeg encoder implementing this codec.
            pub fn encoder_name(self) -> &'static str {
                match self {
                    $( VideoCodec::$variant => $encoder ),*
                }
            }

            pub fn display_name(self) -> &'static str {
                match self {
                    $( VideoCodec::$variant => $name ),*
                }
            }
        }

        /// Encoder names the engine knows how to drive.
        pub const SUPPORTED_ENCODER_NAMES: &[&str] = &[ $($encoder),* ];
    };
}

codec_table!(
    [H264, "h264", "libx264", "H.264 (Widest support)"],
    [Hevc, "hevc", "libx265", "H.265 (Smaller files)"],
    [Av1, "av1", "libsvtav1", "AV1 (Smallest files)"],
    [Vp9, "vp9", "libvpx-vp9", "VP9 (Browser-friendly)"],
);

impl VideoCodec {
    /// Flag that carries the speed token: VP9 uses -cpu-used, the rest -preset.
    pub fn speed_flag(self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "-cpu-used",
            VideoCodec::H264 | VideoCodec::Hevc | VideoCodec::Av1 => "-preset",
        }
    }

    pub fn info(self) -> CodecInfo {
        CodecInfo {
            value: self,
            encoder: self.encoder_name().to_string(),
            name: self.display_name().to_string(),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoCodec {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        VideoCodec::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower || c.encoder_name() == lower)
            .ok_or_else(|| AppError::UnknownCodec(s.to_string()))
    }
}

/// Codecs whose encoder appears in `available_encoders`, in table order.
pub fn available_codecs(available_encoders: &[String]) -> Result<Vec<CodecInfo>, AppError> {
    let codecs: Vec<CodecInfo> = VideoCodec::ALL
        .iter()
        .filter(|c| available_encoders.iter().any(|e| e == c.encoder_name()))
        .map(|c| c.info())
        .collect();

    if codecs.is_empty() {
        return Err(AppError::from(
            "No supported video encoders found in FFmpeg. Please ensure FFmpeg is installed with libx264, libx265, libsvtav1 or libvpx-vp9.",
        ));
    }
    Ok(codecs)
}
