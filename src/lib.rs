//! # WebRTC AV Streamer
//!
//! Fans raw audio and video frames produced by a real-time host thread out
//! to any number of browser peers over WebRTC, with SDP/ICE exchanged over
//! a WebSocket signaling channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── PRODUCER THREAD (host) ───────────────────────────┐
//! │   push_audio(view)                                push_video(view)            │
//! │     1. reclaim + free buffers from audio-free       1. same for video-free    │
//! │     2. deep copy into an owned AudioBuffer          2. copy w*h*4 bytes       │
//! │     3. push to audio-send (drop if full)            3. push to video-send     │
//! └──────────┬───────────────────────▲──────────────────────┬──────────▲──────────┘
//!            │ audio-send            │ audio-free           │          │
//!            │ (SPSC, bounded)       │ (SPSC, bounded)      │          │
//! ┌──────────▼───────────────────────┴──────────────────────▼──────────┴──────────┐
//! │                     CONSUMER THREAD (current-thread tokio runtime)            │
//! │                                                                               │
//! │  ┌──────────────┐  ServerEvent   ┌────────────────────────────────────────┐   │
//! │  │ axum server  │ ─────────────▶ │ Relay                                  │   │
//! │  │  GET /       │                │   tick (1 ms): pop ≤20 per queue,      │   │
//! │  │  WS  /ws     │ ◀───────────── │   hand to every ReceiverEntry,         │   │
//! │  └──────────────┘  Outbound      │   return buffer via the free queue     │   │
//! │                                  │                                        │   │
//! │  ┌──────────────┐  EngineEvent   │   live set: HashMap<PeerId, Entry>     │   │
//! │  │ MediaEngine  │ ─────────────▶ │     ReceiverEntry (state machine,      │   │
//! │  │  Pipeline    │ ◀───────────── │       counters, FrameRing, Pipeline)   │   │
//! │  └──────────────┘  samples/SDP   └────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Buffers are allocated and freed only on the producer thread; the consumer
//! thread borrows them read-only and hands them back through the free queue.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "capture")]
pub mod host;
pub mod media;
pub mod receiver;
pub mod relay;
pub mod signaling;
pub mod streamer;

pub use config::{AppConfig, EngineConfig, StreamerConfig};
pub use engine::{MediaEngine, Pipeline, RtcEngine};
pub use error::{Error, Result};
pub use media::{AudioView, VideoView};
pub use streamer::{AudioProducer, StatsSnapshot, Streamer, StreamerHandle, VideoProducer};

/// Application-wide constants
pub mod constants {
    /// Default signaling bind address
    pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

    /// Default HTTP/WebSocket port
    pub const DEFAULT_PORT: u16 = 57778;

    /// Default WebSocket signaling path
    pub const DEFAULT_WS_PATH: &str = "/ws";

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default host block size in frames
    pub const DEFAULT_FRAME_SIZE: usize = 480;

    /// Default nominal video frame rate
    pub const DEFAULT_VIDEO_FRAME_RATE: u32 = 60;

    /// Fan-out tick period
    pub const TICK_INTERVAL_MS: u64 = 1;

    /// Buffers drained per queue per tick
    pub const FANOUT_BATCH_SIZE: usize = 20;

    /// Audio transfer queue capacity (send and free each)
    pub const AUDIO_QUEUE_CAPACITY: usize = 64;

    /// Video transfer queue capacity (send and free each)
    pub const VIDEO_QUEUE_CAPACITY: usize = 16;

    /// Per-peer audio ring capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 128 * 4096;

    /// Max planar channels accepted by `push_audio`
    pub const MAX_AUDIO_CHANNELS: usize = 2;

    /// Packed video format: RGBA
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Default STUN server
    pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_OPUS_BITRATE: u32 = 128_000;

    /// Opus frame duration used by the WebRTC engine
    pub const DEFAULT_OPUS_FRAME_MS: f32 = 10.0;

    /// Opus track channel count
    pub const OPUS_CHANNELS: u16 = 2;

    /// RTP clock rate for Opus
    pub const OPUS_CLOCK_RATE: u32 = 48000;

    /// RTP clock rate for video
    pub const VIDEO_CLOCK_RATE: u32 = 90000;

    /// Default H.264 bitrate
    pub const DEFAULT_VIDEO_BITRATE: u32 = 2_400_000;

    /// Samples queued per track before the engine drops
    pub const DEFAULT_TRACK_BACKLOG: usize = 64;

    /// Demo video width (RGBA test pattern)
    pub const DEMO_VIDEO_WIDTH: u32 = 1280;

    /// Demo video height (RGBA test pattern)
    pub const DEMO_VIDEO_HEIGHT: u32 = 720;

    pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
}
