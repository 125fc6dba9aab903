//! Audio and video transfer descriptors
//!
//! `AudioView`/`VideoView` borrow the host's memory for the duration of a
//! `push_*` call. `AudioBuffer`/`VideoBuffer` own a deep copy and are the
//! values that travel through the transfer queues. They are move-only: the
//! producer allocates one, the send queue carries it to the consumer, the
//! consumer only ever borrows it and then moves it into the free queue, and
//! the producer drops it on its next call.

use crate::constants::{BYTES_PER_PIXEL, MAX_AUDIO_CHANNELS};

/// Stereo sample pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFrame {
    pub samples: [f32; 2],
}

impl AudioFrame {
    pub const SILENCE: AudioFrame = AudioFrame { samples: [0.0, 0.0] };

    pub fn new(left: f32, right: f32) -> Self {
        Self {
            samples: [left, right],
        }
    }

    /// Same sample on both channels
    pub fn mono(sample: f32) -> Self {
        Self::new(sample, sample)
    }
}

/// Borrowed planar audio block from the host
#[derive(Debug, Clone, Copy)]
pub struct AudioView<'a> {
    channels: &'a [&'a [f32]],
    frames: usize,
}

impl<'a> AudioView<'a> {
    /// `channels[c][f]` is sample `f` of channel `c`
    pub fn new(channels: &'a [&'a [f32]], frames: usize) -> Self {
        Self { channels, frames }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Shape check done by the producer before copying
    pub fn is_valid(&self) -> bool {
        let count = self.channels.len();
        count > 0
            && count <= MAX_AUDIO_CHANNELS
            && self.frames > 0
            && self.channels.iter().all(|c| c.len() >= self.frames)
    }
}

/// Owned planar audio block (channel-major)
#[derive(Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Box<[f32]>,
    channels: usize,
    frames: usize,
}

impl AudioBuffer {
    /// Deep copy of a view. The view must satisfy `is_valid`.
    pub fn from_view(view: &AudioView<'_>) -> Self {
        let frames = view.frames;
        let mut samples = Vec::with_capacity(view.channels.len() * frames);
        for channel in view.channels {
            samples.extend_from_slice(&channel[..frames]);
        }

        Self {
            samples: samples.into_boxed_slice(),
            channels: view.channels.len(),
            frames,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of one channel
    pub fn channel(&self, index: usize) -> &[f32] {
        let start = index * self.frames;
        &self.samples[start..start + self.frames]
    }

    /// Frame `index` as a stereo pair; mono input is duplicated
    pub fn frame(&self, index: usize) -> AudioFrame {
        let left = self.samples[index];
        if self.channels > 1 {
            AudioFrame::new(left, self.samples[self.frames + index])
        } else {
            AudioFrame::mono(left)
        }
    }

    /// De-interleave into stereo frames
    pub fn iter_frames(&self) -> impl Iterator<Item = AudioFrame> + '_ {
        (0..self.frames).map(move |i| self.frame(i))
    }
}

/// Borrowed packed RGBA image from the host
#[derive(Debug, Clone, Copy)]
pub struct VideoView<'a> {
    bytes: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> VideoView<'a> {
    pub fn new(bytes: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
        }
    }

    /// `width * height * 4`
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.bytes.len() >= self.byte_len()
    }
}

/// Owned packed RGBA image
#[derive(Debug, PartialEq)]
pub struct VideoBuffer {
    bytes: Box<[u8]>,
    width: u32,
    height: u32,
}

impl VideoBuffer {
    /// Full `width * height * 4` copy. The view must satisfy `is_valid`.
    pub fn from_view(view: &VideoView<'_>) -> Self {
        Self {
            bytes: view.bytes[..view.byte_len()].into(),
            width: view.width,
            height: view.height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_buffer_copies_planar() {
        let left = [0.1f32, 0.2, 0.3, 0.4];
        let right = [-0.1f32, -0.2, -0.3, -0.4];
        let channels: [&[f32]; 2] = [&left, &right];
        let view = AudioView::new(&channels, 3);
        assert!(view.is_valid());

        let buffer = AudioBuffer::from_view(&view);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.frame(2), AudioFrame::new(0.3, -0.3));
    }

    #[test]
    fn test_mono_frames_are_duplicated() {
        let mono = [0.5f32, 0.25];
        let channels: [&[f32]; 1] = [&mono];
        let buffer = AudioBuffer::from_view(&AudioView::new(&channels, 2));

        let frames: Vec<_> = buffer.iter_frames().collect();
        assert_eq!(frames, vec![AudioFrame::mono(0.5), AudioFrame::mono(0.25)]);
    }

    #[test]
    fn test_audio_view_validation() {
        let short = [0.0f32; 2];
        let channels: [&[f32]; 1] = [&short];
        assert!(!AudioView::new(&channels, 4).is_valid());

        let a = [0.0f32; 4];
        let three: [&[f32]; 3] = [&a, &a, &a];
        assert!(!AudioView::new(&three, 4).is_valid());

        let none: [&[f32]; 0] = [];
        assert!(!AudioView::new(&none, 4).is_valid());
    }

    #[test]
    fn test_video_buffer_copies_exact_size() {
        let bytes: Vec<u8> = (0..40).collect();
        let view = VideoView::new(&bytes, 3, 3);
        assert_eq!(view.byte_len(), 36);
        assert!(view.is_valid());

        let buffer = VideoBuffer::from_view(&view);
        assert_eq!(buffer.bytes().len(), 36);
        assert_eq!(buffer.bytes(), &bytes[..36]);
        assert_eq!((buffer.width(), buffer.height()), (3, 3));
    }

    #[test]
    fn test_video_view_too_short() {
        let bytes = vec![0u8; 10];
        assert!(!VideoView::new(&bytes, 2, 2).is_valid());
        assert!(!VideoView::new(&bytes, 0, 2).is_valid());
    }
}
