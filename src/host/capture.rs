//! Live capture into the streamer
//!
//! Runs a cpal input stream on a dedicated thread. The stream callback is
//! the producer: it splits the device's interleaved samples into planar
//! channels and hands them to [`AudioProducer::push`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

use crate::constants::MAX_AUDIO_CHANNELS;
use crate::error::AudioError;
use crate::host::device::find_input_device;
use crate::media::AudioView;
use crate::streamer::AudioProducer;

/// Capture counters
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks_pushed: AtomicU64,
    pub blocks_dropped: AtomicU64,
    pub frames_captured: AtomicU64,
}

/// Planar scratch space reused across callbacks
struct Deinterleaver {
    planes: [Vec<f32>; MAX_AUDIO_CHANNELS],
}

impl Deinterleaver {
    fn new() -> Self {
        Self {
            planes: [Vec::new(), Vec::new()],
        }
    }

    /// Split `data` (`device_channels` interleaved) into at most two
    /// planes; returns the number of frames
    fn split(&mut self, data: &[f32], device_channels: usize) -> usize {
        let device_channels = device_channels.max(1);
        let frames = data.len() / device_channels;
        let used = device_channels.min(MAX_AUDIO_CHANNELS);

        for (c, plane) in self.planes.iter_mut().enumerate().take(used) {
            plane.clear();
            plane.extend(data.chunks_exact(device_channels).map(|frame| frame[c]));
        }
        frames
    }
}

/// Captures one input device into an [`AudioProducer`]
pub struct DeviceCapture {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    errors: Receiver<AudioError>,
    stats: Arc<CaptureStats>,
}

impl DeviceCapture {
    /// Open `device` (default input if `None`) at `sample_rate` and start
    /// pushing into `producer`
    pub fn start(
        device: Option<&str>,
        sample_rate: u32,
        mut producer: AudioProducer,
    ) -> Result<Self, AudioError> {
        let device = find_input_device(device)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} delivers {:?}, expected f32",
                name,
                default_config.sample_format()
            )));
        }

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let device_channels = config.channels as usize;

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(CaptureStats::default());
        let (error_tx, errors) = bounded::<AudioError>(16);

        let running_for_thread = running.clone();
        let stats_for_callback = stats.clone();
        let thread = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut scratch = Deinterleaver::new();
                let stream_errors = error_tx.clone();

                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let frames = scratch.split(data, device_channels);
                        if frames == 0 {
                            return;
                        }
                        let used = device_channels.min(MAX_AUDIO_CHANNELS);
                        let planes: [&[f32]; MAX_AUDIO_CHANNELS] =
                            [&scratch.planes[0], &scratch.planes[1]];
                        let view = AudioView::new(&planes[..used], frames);

                        stats_for_callback
                            .frames_captured
                            .fetch_add(frames as u64, Ordering::Relaxed);
                        if producer.push(&view) {
                            stats_for_callback.blocks_pushed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            stats_for_callback.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = stream_errors.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to build capture stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    error!("Failed to start capture stream: {}", e);
                    let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    return;
                }

                while running_for_thread.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        info!("Capturing from {} at {} Hz", name, sample_rate);

        Ok(Self {
            running,
            thread: Some(thread),
            errors,
            stats,
        })
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Next stream error, if any
    pub fn try_error(&self) -> Option<AudioError> {
        self.errors.try_recv().ok()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_stereo() {
        let mut scratch = Deinterleaver::new();
        let frames = scratch.split(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2);

        assert_eq!(frames, 3);
        assert_eq!(scratch.planes[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(scratch.planes[1], vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_deinterleave_keeps_first_two_channels() {
        let mut scratch = Deinterleaver::new();
        let frames = scratch.split(&[1.0, 2.0, 9.0, 3.0, 4.0, 9.0], 3);

        assert_eq!(frames, 2);
        assert_eq!(scratch.planes[0], vec![1.0, 3.0]);
        assert_eq!(scratch.planes[1], vec![2.0, 4.0]);
    }

    #[test]
    fn test_deinterleave_mono() {
        let mut scratch = Deinterleaver::new();
        assert_eq!(scratch.split(&[0.5, 0.25], 1), 2);
        assert_eq!(scratch.planes[0], vec![0.5, 0.25]);
    }
}
