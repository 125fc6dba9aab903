//! H.264 encoder for RGBA frames (OpenH264)

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::{RgbaSliceU8, YUVBuffer};
use openh264::OpenH264API;

use crate::constants::BYTES_PER_PIXEL;
use crate::error::CodecError;

/// Encodes packed RGBA images into Annex-B H.264 access units
pub struct H264Encoder {
    encoder: Encoder,
    bitrate: u32,
    frame_rate: u32,
    frames_encoded: u64,
    /// Scratch image for frames cropped to even dimensions
    cropped: Vec<u8>,
}

impl H264Encoder {
    pub fn new(bitrate: u32, frame_rate: u32) -> Result<Self, CodecError> {
        let config = EncoderConfig::new()
            .set_bitrate_bps(bitrate)
            .max_frame_rate(frame_rate as f32);
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Ok(Self {
            encoder,
            bitrate,
            frame_rate,
            frames_encoded: 0,
            cropped: Vec::new(),
        })
    }

    /// Encode one frame. `rgba` must hold exactly `width * height * 4` bytes.
    ///
    /// 4:2:0 subsampling needs even dimensions, so an odd last column or row
    /// is cropped off. Returns an empty access unit when nothing is left.
    pub fn encode(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<Bytes, CodecError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if rgba.len() != expected {
            return Err(CodecError::InvalidFrameSize(rgba.len()));
        }

        let (even_width, even_height) = (width & !1, height & !1);
        if even_width == 0 || even_height == 0 {
            return Ok(Bytes::new());
        }

        let pixels = if (even_width, even_height) == (width, height) {
            rgba
        } else {
            self.crop(rgba, width, even_width, even_height);
            &self.cropped
        };

        let source = RgbaSliceU8::new(pixels, (even_width as usize, even_height as usize));
        let yuv = YUVBuffer::from_rgb_source(source);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        Ok(Bytes::from(bitstream.to_vec()))
    }

    /// Copy the top-left `even_width x even_height` region into `self.cropped`
    fn crop(&mut self, rgba: &[u8], width: u32, even_width: u32, even_height: u32) {
        let src_stride = width as usize * BYTES_PER_PIXEL;
        let dst_stride = even_width as usize * BYTES_PER_PIXEL;

        self.cropped.clear();
        for row in rgba.chunks_exact(src_stride).take(even_height as usize) {
            self.cropped.extend_from_slice(&row[..dst_stride]);
        }
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}
