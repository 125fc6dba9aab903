//! Opus encoder wrapper
//!
//! Encodes the stereo frames pulled from a peer's ring into Opus packets
//! for the WebRTC audio track.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::config::{OpusApplication, OpusBandwidth, OpusConfig, OpusSignal};
use crate::error::CodecError;
use crate::media::AudioFrame;

/// Largest packet libopus will produce for one frame
const MAX_PACKET_SIZE: usize = 4000;

/// Sample rates libopus accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Opus encoder with a reusable interleave and output buffer
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    /// Interleaved input for one frame
    interleave_buffer: Vec<f32>,
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create an encoder for the given configuration
    pub fn new(config: OpusConfig) -> Result<Self, CodecError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported sample rate: {}",
                config.sample_rate
            )));
        }

        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    config.channels
                )))
            }
        };

        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(config.sample_rate, channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            interleave_buffer: Vec::with_capacity(config.frame_size * config.channels as usize),
            config,
            encode_buffer: vec![0u8; MAX_PACKET_SIZE],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        if config.vbr && config.cvbr {
            encoder
                .set_vbr_constraint(true)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set CVBR: {}", e)))?;
        }

        encoder
            .set_complexity(config.complexity.min(10) as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder
            .set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        encoder
            .set_dtx(config.dtx)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set DTX: {}", e)))?;

        let signal = match config.signal {
            OpusSignal::Auto => opus::Signal::Auto,
            OpusSignal::Voice => opus::Signal::Voice,
            OpusSignal::Music => opus::Signal::Music,
        };
        encoder
            .set_signal(signal)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        let bandwidth = match config.max_bandwidth {
            OpusBandwidth::Narrowband => opus::Bandwidth::Narrowband,
            OpusBandwidth::Mediumband => opus::Bandwidth::Mediumband,
            OpusBandwidth::Wideband => opus::Bandwidth::Wideband,
            OpusBandwidth::Superwideband => opus::Bandwidth::Superwideband,
            OpusBandwidth::Fullband => opus::Bandwidth::Fullband,
        };
        encoder
            .set_bandwidth(bandwidth)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bandwidth: {}", e)))?;

        Ok(())
    }

    /// Encode interleaved samples; length must be `samples_per_frame()`
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    /// Encode one Opus frame worth of stereo frames. A mono encoder takes
    /// the left channel.
    pub fn encode_frames<I>(&mut self, frames: I) -> Result<Bytes, CodecError>
    where
        I: IntoIterator<Item = AudioFrame>,
    {
        let mut buffer = std::mem::take(&mut self.interleave_buffer);
        buffer.clear();
        for frame in frames.into_iter().take(self.config.frame_size) {
            if self.config.channels == 1 {
                buffer.push(frame.samples[0]);
            } else {
                buffer.extend_from_slice(&frame.samples);
            }
        }

        let result = self.encode(&buffer);
        self.interleave_buffer = buffer;
        result
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    /// Samples per channel per frame
    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    /// Total samples per frame across channels
    pub fn samples_per_frame(&self) -> usize {
        self.config.frame_size * self.config.channels as usize
    }

    /// Frame duration in nanoseconds
    pub fn frame_duration_ns(&self) -> u64 {
        self.config.frame_size as u64 * crate::constants::NANOS_PER_SECOND
            / self.config.sample_rate as u64
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
