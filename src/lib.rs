pub mod cancel;
pub mod codec;
pub mod compress;
pub mod error;
pub mod ffmpeg;
pub mod preset;
pub mod settings;
pub mod sidecar_api;
pub mod transcode;

pub use cancel::{CancelSignal, CancellationToken, NeverCancel};
pub use codec::{CodecInfo, VideoCodec};
pub use compress::{
    AttemptFailure, CompressionEvents, CompressionOutcome, CompressionRequest, Compressor,
    EncodeAttempt, unique_output_path,
};
pub use error::AppError;
pub use settings::{EncodeSettings, FramerateMode};
pub use transcode::{FfmpegTranscoder, TranscodeStatus, Transcoder};
