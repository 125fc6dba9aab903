//! Error types for the streamer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signaling protocol violations and channel failures.
///
/// Every variant is fatal to the connection it was raised on, never to
/// the process or to other connections.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Malformed signaling message: {0}")]
    Malformed(String),

    #[error("Binary frames are not part of the signaling protocol")]
    BinaryFrame,

    #[error("Expected SDP type \"{expected}\", got \"{got}\"")]
    UnexpectedSdpType { expected: &'static str, got: &'static str },

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Unexpected {message} message in state {state}")]
    UnexpectedMessage { message: &'static str, state: &'static str },

    #[error("Signaling channel closed")]
    ChannelClosed,
}

/// Media-engine failures, isolated to the owning peer
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Pipeline construction failed: {0}")]
    PipelineInit(String),

    #[error("Pipeline is closed")]
    PipelineClosed,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Resampler error: {0}")]
    Resampler(String),
}

/// Infrastructure failures reported by `Streamer::start`
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start background thread: {0}")]
    Spawn(std::io::Error),

    #[error("Failed to build runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Background thread exited during startup")]
    StartupAborted,
}

/// Host audio device errors (capture adapter)
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
