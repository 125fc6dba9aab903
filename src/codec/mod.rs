//! Codecs used by the WebRTC engine
//!
//! Opus for audio is always built, together with the resampler that
//! feeds it from rates Opus cannot encode. H.264 for video needs the
//! `h264` feature; without it the engine offers audio only.

pub mod encoder;
pub mod resample;
#[cfg(feature = "h264")]
pub mod h264;

pub use encoder::{EncoderStats, OpusEncoder, SUPPORTED_SAMPLE_RATES};
pub use resample::StereoResampler;
#[cfg(feature = "h264")]
pub use h264::H264Encoder;
