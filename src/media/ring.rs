//! Per-peer audio frame ring
//!
//! Smooths delivery between the fan-out tick, which hands over whole host
//! blocks, and the media engine's audio source, which pulls frames in its
//! own chunk size. Owned by one `ReceiverEntry` and only touched from the
//! consumer thread, so it needs no synchronisation.

use std::collections::VecDeque;

use crate::media::buffer::{AudioBuffer, AudioFrame};

/// Bounded circular buffer of stereo frames.
///
/// When full, the oldest frame is overwritten. Reading from an empty ring
/// yields silence.
pub struct FrameRing {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
    overflow_count: u64,
    underrun_count: u64,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
            overflow_count: 0,
            underrun_count: 0,
        }
    }

    /// Append a frame, evicting the oldest one if full
    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.overflow_count += 1;
        }
        self.frames.push_back(frame);
    }

    /// De-interleave a whole buffer into the ring
    pub fn extend_from_buffer(&mut self, buffer: &AudioBuffer) {
        for frame in buffer.iter_frames() {
            self.push(frame);
        }
    }

    /// Oldest frame, or silence if the ring is empty
    pub fn next_frame(&mut self) -> AudioFrame {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => {
                self.underrun_count += 1;
                AudioFrame::SILENCE
            }
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Frames evicted because the ring was full
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Silent frames handed out because the ring was empty
    pub fn underrun_count(&self) -> u64 {
        self.underrun_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::buffer::AudioView;

    #[test]
    fn test_ring_fifo() {
        let mut ring = FrameRing::new(4);
        ring.push(AudioFrame::mono(1.0));
        ring.push(AudioFrame::mono(2.0));

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.next_frame(), AudioFrame::mono(1.0));
        assert_eq!(ring.next_frame(), AudioFrame::mono(2.0));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_empty_ring_yields_silence() {
        let mut ring = FrameRing::new(4);
        assert_eq!(ring.next_frame(), AudioFrame::SILENCE);
        assert_eq!(ring.next_frame(), AudioFrame::SILENCE);
        assert_eq!(ring.underrun_count(), 2);
    }

    #[test]
    fn test_full_ring_overwrites_oldest() {
        let mut ring = FrameRing::new(3);
        for i in 0..5 {
            ring.push(AudioFrame::mono(i as f32));
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.overflow_count(), 2);
        assert_eq!(ring.next_frame(), AudioFrame::mono(2.0));
        assert_eq!(ring.next_frame(), AudioFrame::mono(3.0));
        assert_eq!(ring.next_frame(), AudioFrame::mono(4.0));
    }

    #[test]
    fn test_extend_from_stereo_buffer() {
        let left = [1.0f32, 2.0, 3.0];
        let right = [-1.0f32, -2.0, -3.0];
        let channels: [&[f32]; 2] = [&left, &right];
        let buffer = AudioBuffer::from_view(&AudioView::new(&channels, 3));

        let mut ring = FrameRing::new(16);
        ring.extend_from_buffer(&buffer);

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.next_frame(), AudioFrame::new(1.0, -1.0));
        assert_eq!(ring.next_frame(), AudioFrame::new(2.0, -2.0));
        assert_eq!(ring.next_frame(), AudioFrame::new(3.0, -3.0));
        assert_eq!(ring.underrun_count(), 0);
    }
}
