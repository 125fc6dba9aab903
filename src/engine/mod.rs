//! Media-engine seam
//!
//! The core never encodes, packetizes or transports media itself. For each
//! peer it asks a [`MediaEngine`] for a [`Pipeline`], pushes timestamped
//! samples into it and drives its SDP/ICE negotiation. The pipeline talks
//! back through an [`EventSink`]: events are queued onto the consumer
//! thread's event loop and dispatched from there, never re-entrantly.

#[cfg(test)]
pub(crate) mod mock;
pub mod rtc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::media::FrameRing;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::signaling::PeerId;

pub use rtc::RtcEngine;

/// Audio or video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Timing of one audio block; the frames themselves are in the peer's ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacket {
    /// Presentation timestamp in nanoseconds
    pub pts_ns: u64,
    pub duration_ns: u64,
    /// Frames appended to the ring for this packet
    pub frames: usize,
    pub sample_rate: u32,
}

/// One RGBA video frame with its timing
#[derive(Debug, Clone, Copy)]
pub struct VideoPacket<'a> {
    pub pts_ns: u64,
    pub duration_ns: u64,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

/// Notifications raised by a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The pipeline wants an SDP offer
    NegotiationNeeded,
    /// An offer requested with `create_offer` is ready
    OfferCreated(String),
    /// Offer creation or a description update failed
    NegotiationFailed(String),
    /// A local ICE candidate was gathered
    IceCandidate { sdp_mline_index: u32, candidate: String },
    /// The source for this kind wants more data
    NeedData(MediaKind),
    /// The source for this kind has enough data
    EnoughData(MediaKind),
    /// Unrecoverable pipeline failure
    Error(String),
}

/// Per-peer handle for raising [`EngineEvent`]s onto the event loop
#[derive(Clone)]
pub struct EventSink {
    peer: PeerId,
    tx: mpsc::UnboundedSender<(PeerId, EngineEvent)>,
}

impl EventSink {
    pub fn new(peer: PeerId, tx: mpsc::UnboundedSender<(PeerId, EngineEvent)>) -> Self {
        Self { peer, tx }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Queue an event; returns false once the event loop is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send((self.peer, event)).is_ok()
    }
}

/// Creates one pipeline per peer connection
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Build and start the pipeline for a new peer. A failure here closes
    /// the connection before any negotiation starts.
    async fn create_pipeline(
        &self,
        peer: PeerId,
        events: EventSink,
    ) -> Result<Box<dyn Pipeline>, EngineError>;
}

/// One peer's media pipeline.
///
/// Every method is called from the consumer thread and must return
/// promptly; asynchronous results come back as [`EngineEvent`]s.
pub trait Pipeline: Send {
    /// Deliver audio. The packet's frames have already been appended to
    /// `source`; the pipeline pulls as many as it can consume with
    /// `FrameRing::next_frame` and leaves the rest for the next call.
    fn push_audio(&mut self, packet: AudioPacket, source: &mut FrameRing)
        -> Result<(), EngineError>;

    /// Deliver one video frame
    fn push_video(&mut self, packet: VideoPacket<'_>) -> Result<(), EngineError>;

    /// Start generating an offer; the result arrives as `OfferCreated`
    fn create_offer(&mut self) -> Result<(), EngineError>;

    fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), EngineError>;

    fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), EngineError>;

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Tear the pipeline down. No events are acted on afterwards.
    fn shutdown(&mut self);
}
