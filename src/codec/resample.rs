//! Sample-rate conversion ahead of the Opus encoder
//!
//! Opus only runs at 8/12/16/24/48 kHz. Any other source rate is converted
//! to the encoder rate with a band-limited sinc resampler that produces one
//! encoder frame per call.

use rubato::{
    Resampler as RubatoResampler, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::CodecError;
use crate::media::AudioFrame;

const CHANNELS: usize = 2;
const SINC_LEN: usize = 128;

/// Stereo resampler with a fixed output chunk
pub struct StereoResampler {
    resampler: SincFixedOut<f32>,
    source_rate: u32,
    target_rate: u32,
    /// Planar input for one chunk
    input: Vec<Vec<f32>>,
}

impl StereoResampler {
    /// `output_frames` is the number of frames each [`process`](Self::process)
    /// call yields, normally the encoder frame size
    pub fn new(source_rate: u32, target_rate: u32, output_frames: usize) -> Result<Self, CodecError> {
        if source_rate == 0 || target_rate == 0 || output_frames == 0 {
            return Err(CodecError::Resampler(format!(
                "Invalid conversion {} Hz -> {} Hz in chunks of {}",
                source_rate, target_rate, output_frames
            )));
        }

        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = SincFixedOut::<f32>::new(ratio, 2.0, params, output_frames, CHANNELS)
            .map_err(|e| CodecError::Resampler(e.to_string()))?;

        Ok(Self {
            resampler,
            source_rate,
            target_rate,
            input: vec![Vec::new(); CHANNELS],
        })
    }

    /// Input frames the next [`process`](Self::process) call consumes
    pub fn input_frames_next(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Convert exactly `input_frames_next()` frames taken from `frames`.
    /// A short iterator is padded with silence.
    pub fn process<I>(&mut self, frames: I) -> Result<Vec<AudioFrame>, CodecError>
    where
        I: IntoIterator<Item = AudioFrame>,
    {
        let needed = self.resampler.input_frames_next();
        for channel in self.input.iter_mut() {
            channel.clear();
        }
        for frame in frames.into_iter().take(needed) {
            self.input[0].push(frame.samples[0]);
            self.input[1].push(frame.samples[1]);
        }
        for channel in self.input.iter_mut() {
            channel.resize(needed, 0.0);
        }

        let output = self
            .resampler
            .process(&self.input, None)
            .map_err(|e| CodecError::Resampler(e.to_string()))?;

        Ok(output[0]
            .iter()
            .zip(output[1].iter())
            .map(|(&left, &right)| AudioFrame::new(left, right))
            .collect())
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    #[test]
    fn test_44100_to_48000_chunks() {
        let mut resampler = StereoResampler::new(44100, 48000, 480).unwrap();
        let needed = resampler.input_frames_next();
        // Roughly 441 frames of input per 480 frames of output
        assert!((400..=560).contains(&needed), "needed {}", needed);

        let out = resampler
            .process((0..needed).map(|_| AudioFrame::mono(0.0)))
            .unwrap();
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn test_tone_survives_conversion() {
        let mut resampler = StereoResampler::new(44100, 48000, 480).unwrap();
        let step = TAU * 1000.0 / 44100.0;
        let mut phase = 0.0f32;
        let mut peak = 0.0f32;

        for _ in 0..20 {
            let needed = resampler.input_frames_next();
            let input: Vec<_> = (0..needed)
                .map(|_| {
                    let s = phase.sin() * 0.5;
                    phase = (phase + step) % TAU;
                    AudioFrame::new(s, -s)
                })
                .collect();
            for frame in resampler.process(input).unwrap() {
                peak = peak.max(frame.samples[0].abs());
                assert!((frame.samples[0] + frame.samples[1]).abs() < 1e-3);
            }
        }

        assert!(peak > 0.4 && peak < 0.6, "peak {}", peak);
    }

    #[test]
    fn test_short_input_padded() {
        let mut resampler = StereoResampler::new(32000, 48000, 480).unwrap();
        let out = resampler.process(std::iter::empty()).unwrap();
        assert_eq!(out.len(), 480);
        assert!(out.iter().all(|f| f.samples == [0.0, 0.0]));
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(StereoResampler::new(0, 48000, 480).is_err());
        assert!(StereoResampler::new(44100, 48000, 0).is_err());
    }
}
