//! Per-peer receiver state
//!
//! A [`ReceiverEntry`] ties one signaling connection to one media pipeline.
//! It runs the negotiation state machine, gates media on the engine's
//! need-data/enough-data feedback and stamps every buffer it forwards.
//!
//! ```text
//! Created --negotiation needed--> Negotiating --answer--> Connected
//!    \                                 |                      |
//!     +---------------------------> Closed <------------------+
//! ```
//!
//! Entries live on the consumer thread only; nothing here is shared.

use tracing::{debug, info};

use crate::config::StreamerConfig;
use crate::constants::NANOS_PER_SECOND;
use crate::engine::{AudioPacket, EngineEvent, MediaKind, Pipeline, VideoPacket};
use crate::error::{EngineError, Error, SignalingError};
use crate::media::{AudioBuffer, AudioFrame, FrameRing, VideoBuffer};
use crate::signaling::protocol::{IceCandidate, SdpType, SessionDescription, SignalMessage};
use crate::signaling::server::{Inbound, SignalingChannel};
use crate::signaling::PeerId;

/// Negotiation state of one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Created,
    Negotiating,
    Connected,
    Closed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Created => "created",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `samples * 1e9 / rate`, floored, without overflow
fn samples_to_ns(samples: u64, rate: u32) -> u64 {
    (samples as u128 * NANOS_PER_SECOND as u128 / rate as u128) as u64
}

/// One connected peer
pub struct ReceiverEntry {
    id: PeerId,
    state: PeerState,
    channel: SignalingChannel,
    pipeline: Option<Box<dyn Pipeline>>,
    ring: FrameRing,
    sample_rate: u32,
    frame_interval_ns: u64,
    /// Audio frames forwarded so far
    num_samples: u64,
    /// Video frames forwarded so far
    num_frames: u64,
    audio_feed: i64,
    video_feed: i64,
    offer_sent: bool,
}

impl ReceiverEntry {
    pub fn new(
        id: PeerId,
        channel: SignalingChannel,
        pipeline: Box<dyn Pipeline>,
        config: &StreamerConfig,
    ) -> Self {
        Self {
            id,
            state: PeerState::Created,
            channel,
            pipeline: Some(pipeline),
            ring: FrameRing::new(config.ring_capacity),
            sample_rate: config.sample_rate,
            frame_interval_ns: config.video_frame_interval_ns(),
            num_samples: 0,
            num_frames: 0,
            audio_feed: 0,
            video_feed: 0,
            offer_sent: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == PeerState::Closed
    }

    pub fn audio_feed(&self) -> i64 {
        self.audio_feed
    }

    pub fn video_feed(&self) -> i64 {
        self.video_feed
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    pub fn num_frames(&self) -> u64 {
        self.num_frames
    }

    /// Frames waiting in the audio ring
    pub fn queued_frames(&self) -> usize {
        self.ring.len()
    }

    fn pipeline(&mut self) -> Result<&mut Box<dyn Pipeline>, EngineError> {
        self.pipeline.as_mut().ok_or(EngineError::PipelineClosed)
    }

    /// Apply a pipeline event. An error means the peer must be closed.
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }

        match event {
            EngineEvent::NegotiationNeeded => {
                if self.state == PeerState::Created {
                    self.pipeline()?.create_offer()?;
                    self.state = PeerState::Negotiating;
                    debug!("Peer {} negotiating", self.id);
                }
            }
            EngineEvent::OfferCreated(sdp) => {
                if self.offer_sent || self.state != PeerState::Negotiating {
                    debug!("Peer {}: ignoring extra offer in state {}", self.id, self.state);
                    return Ok(());
                }
                let offer = SessionDescription::offer(sdp);
                self.pipeline()?.set_local_description(offer.clone())?;
                self.channel.send(&SignalMessage::Sdp(offer))?;
                self.offer_sent = true;
                info!("Sent offer to peer {}", self.id);
            }
            EngineEvent::IceCandidate {
                sdp_mline_index,
                candidate,
            } => {
                self.channel.send(&SignalMessage::Ice(IceCandidate {
                    sdp_mline_index,
                    candidate,
                }))?;
            }
            EngineEvent::NeedData(kind) => *self.feed_mut(kind) += 1,
            EngineEvent::EnoughData(kind) => *self.feed_mut(kind) -= 1,
            EngineEvent::NegotiationFailed(reason) => {
                return Err(EngineError::Negotiation(reason).into());
            }
            EngineEvent::Error(reason) => return Err(EngineError::Pipeline(reason).into()),
        }
        Ok(())
    }

    fn feed_mut(&mut self, kind: MediaKind) -> &mut i64 {
        match kind {
            MediaKind::Audio => &mut self.audio_feed,
            MediaKind::Video => &mut self.video_feed,
        }
    }

    /// Apply a frame from the client. An error is a protocol violation or
    /// pipeline failure; the peer must be closed.
    pub fn handle_message(&mut self, frame: Inbound) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }

        let text = match frame {
            Inbound::Text(text) => text,
            Inbound::Binary(_) => return Err(SignalingError::BinaryFrame.into()),
        };

        let message = SignalMessage::decode(&text)?;
        let kind = message.kind();
        debug!("Peer {} sent {} in state {}", self.id, kind, self.state.as_str());

        match message {
            SignalMessage::Sdp(desc) => self.handle_answer(desc),
            SignalMessage::Ice(candidate) => {
                if self.state == PeerState::Created {
                    return Err(SignalingError::UnexpectedMessage {
                        message: kind,
                        state: self.state.as_str(),
                    }
                    .into());
                }
                self.pipeline()?.add_ice_candidate(candidate)?;
                Ok(())
            }
        }
    }

    fn handle_answer(&mut self, desc: SessionDescription) -> Result<(), Error> {
        if desc.sdp_type != SdpType::Answer {
            return Err(SignalingError::UnexpectedSdpType {
                expected: SdpType::Answer.as_str(),
                got: desc.sdp_type.as_str(),
            }
            .into());
        }
        if self.state != PeerState::Negotiating || !self.offer_sent {
            return Err(SignalingError::UnexpectedMessage {
                message: "answer",
                state: self.state.as_str(),
            }
            .into());
        }

        desc.validate()?;
        self.pipeline()?.set_remote_description(desc)?;
        self.state = PeerState::Connected;
        info!("Peer {} connected", self.id);
        Ok(())
    }

    /// Forward one audio block. Returns `Ok` without touching anything
    /// while the engine has not asked for audio.
    pub fn push_data_audio(&mut self, buffer: &AudioBuffer) -> Result<(), EngineError> {
        if self.audio_feed <= 0 {
            return Ok(());
        }
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineClosed)?;

        let frames = buffer.frames();
        let packet = AudioPacket {
            pts_ns: samples_to_ns(self.num_samples, self.sample_rate),
            duration_ns: samples_to_ns(frames as u64, self.sample_rate),
            frames,
            sample_rate: self.sample_rate,
        };

        self.ring.extend_from_buffer(buffer);
        self.num_samples += frames as u64;
        pipeline.push_audio(packet, &mut self.ring)
    }

    /// Forward one video frame, stamped on the nominal frame grid
    pub fn push_data_video(&mut self, buffer: &VideoBuffer) -> Result<(), EngineError> {
        if self.video_feed <= 0 {
            return Ok(());
        }
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineClosed)?;

        let packet = VideoPacket {
            pts_ns: self.num_frames * self.frame_interval_ns,
            duration_ns: self.frame_interval_ns,
            width: buffer.width(),
            height: buffer.height(),
            data: buffer.bytes(),
        };

        self.num_frames += 1;
        pipeline.push_video(packet)
    }

    /// Oldest ring frame, or silence
    pub fn next_frame(&mut self) -> AudioFrame {
        self.ring.next_frame()
    }

    /// Tear down the pipeline, then release the connection
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = PeerState::Closed;
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        self.channel.close();
        self.ring.clear();
        debug!(
            "Peer {} closed after {} audio frames, {} video frames",
            self.id, self.num_samples, self.num_frames
        );
    }
}

impl Drop for ReceiverEntry {
    fn drop(&mut self) {
        self.close();
    }
}
