//! WebRTC media engine (webrtc-rs)
//!
//! One `RTCPeerConnection` per peer with send-only transceivers: an Opus
//! audio track always, and an H.264 video track when built with the `h264`
//! feature. Encoded samples are handed to per-track writer tasks through
//! bounded channels; a full channel drops the sample instead of blocking
//! the fan-out loop.
//!
//! SDP and ICE operations are queued onto a per-pipeline task and applied
//! in call order, so a remote description can never overtake the local one.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::codec::{OpusEncoder, StereoResampler, SUPPORTED_SAMPLE_RATES};
use crate::config::{EngineConfig, OpusConfig, StreamerConfig};
use crate::constants::{OPUS_CHANNELS, OPUS_CLOCK_RATE};
use crate::engine::{
    AudioPacket, EngineEvent, EventSink, MediaEngine, MediaKind, Pipeline, VideoPacket,
};
use crate::error::EngineError;
use crate::media::FrameRing;
use crate::signaling::protocol::{IceCandidate, SdpType, SessionDescription};
use crate::signaling::PeerId;

const STREAM_ID: &str = "webrtc-av-streamer";
const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";

/// webrtc-rs backed [`MediaEngine`]
pub struct RtcEngine {
    config: EngineConfig,
    opus: OpusConfig,
    /// Streamer rate to convert from when Opus cannot run at it
    resample_from: Option<u32>,
    video_frame_rate: u32,
}

impl RtcEngine {
    /// Build an engine for the streamer's audio format. Opus encodes at the
    /// streamer rate when it supports it; any other rate is resampled to
    /// 48 kHz first.
    pub fn new(config: EngineConfig, streamer: &StreamerConfig) -> Result<Self, EngineError> {
        let (opus, resample_from) = if SUPPORTED_SAMPLE_RATES.contains(&streamer.sample_rate) {
            (config.opus.clone().with_sample_rate(streamer.sample_rate), None)
        } else {
            (
                config.opus.clone().with_sample_rate(OPUS_CLOCK_RATE),
                Some(streamer.sample_rate),
            )
        };

        // Build the codec chain once so a bad configuration fails at startup
        let encoder = OpusEncoder::new(opus.clone())?;
        if let Some(rate) = resample_from {
            StereoResampler::new(rate, OPUS_CLOCK_RATE, encoder.frame_size())?;
            info!(
                "Resampling audio from {} Hz to {} Hz for Opus",
                rate, OPUS_CLOCK_RATE
            );
        }

        Ok(Self {
            config,
            opus,
            resample_from,
            video_frame_rate: streamer.video_frame_rate,
        })
    }

    /// Whether pipelines carry a video track
    pub fn has_video(&self) -> bool {
        cfg!(feature = "h264")
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| EngineError::PipelineInit(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs).map_err(|e| {
            EngineError::PipelineInit(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.config.stun_server.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: vec![self.config.stun_server.clone()],
                ..Default::default()
            }]
        };

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                EngineError::PipelineInit(format!("Failed to create peer connection: {}", e))
            })?;

        Ok(Arc::new(pc))
    }

    async fn add_send_track(
        pc: &Arc<RTCPeerConnection>,
        capability: RTCRtpCodecCapability,
        track_id: &str,
        backlog: usize,
    ) -> Result<TrackWriter, EngineError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            track_id.to_owned(),
            STREAM_ID.to_owned(),
        ));

        let transceiver = pc
            .add_transceiver_from_track(
                track.clone() as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| EngineError::PipelineInit(format!("Failed to add {} track: {}", track_id, e)))?;

        spawn_rtcp_drain(transceiver.sender().await);
        Ok(TrackWriter::spawn(track, backlog))
    }
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_pipeline(
        &self,
        peer: PeerId,
        events: EventSink,
    ) -> Result<Box<dyn Pipeline>, EngineError> {
        let encoder = OpusEncoder::new(self.opus.clone())?;
        let resampler = match self.resample_from {
            Some(rate) => Some(StereoResampler::new(rate, OPUS_CLOCK_RATE, encoder.frame_size())?),
            None => None,
        };
        let pc = self.new_peer_connection().await?;
        let has_video = self.has_video();

        register_handlers(&pc, &events, has_video);

        let audio = Self::add_send_track(
            &pc,
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                sdp_fmtp_line: OPUS_FMTP.to_owned(),
                rtcp_feedback: vec![],
            },
            "audio",
            self.config.track_backlog,
        )
        .await?;

        #[cfg(feature = "h264")]
        let video = Some(video::VideoSender::new(&pc, &self.config, self.video_frame_rate).await?);
        #[cfg(not(feature = "h264"))]
        let _ = self.video_frame_rate;

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ops(pc, ops_rx, events.clone()));

        // Tracks are in place; ask for the first offer
        events.emit(EngineEvent::NegotiationNeeded);
        info!("Created WebRTC pipeline for peer {}", peer);

        Ok(Box::new(RtcPipeline {
            peer,
            ops: ops_tx,
            encoder,
            resampler,
            audio,
            #[cfg(feature = "h264")]
            video,
            closed: false,
        }))
    }
}

fn register_handlers(pc: &Arc<RTCPeerConnection>, events: &EventSink, has_video: bool) {
    let sink = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        sink.emit(EngineEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    sink.emit(EngineEvent::IceCandidate {
                        sdp_mline_index: init.sdp_mline_index.unwrap_or(0) as u32,
                        candidate: init.candidate,
                    });
                }
                Err(e) => warn!("Peer {}: failed to serialize ICE candidate: {}", sink.peer(), e),
            }
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!("Peer {} connection state: {}", sink.peer(), state);
        match state {
            RTCPeerConnectionState::Connected => {
                sink.emit(EngineEvent::NeedData(MediaKind::Audio));
                if has_video {
                    sink.emit(EngineEvent::NeedData(MediaKind::Video));
                }
            }
            RTCPeerConnectionState::Disconnected => {
                sink.emit(EngineEvent::EnoughData(MediaKind::Audio));
                if has_video {
                    sink.emit(EngineEvent::EnoughData(MediaKind::Video));
                }
            }
            RTCPeerConnectionState::Failed => {
                sink.emit(EngineEvent::Error("peer connection failed".to_string()));
            }
            _ => {}
        }
        Box::pin(async {})
    }));
}

fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

enum Op {
    CreateOffer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddIce(IceCandidate),
    Close,
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
}

async fn run_ops(pc: Arc<RTCPeerConnection>, mut ops: mpsc::UnboundedReceiver<Op>, events: EventSink) {
    while let Some(op) = ops.recv().await {
        match op {
            Op::CreateOffer => match pc.create_offer(None).await {
                Ok(offer) => {
                    events.emit(EngineEvent::OfferCreated(offer.sdp));
                }
                Err(e) => {
                    events.emit(EngineEvent::NegotiationFailed(format!("create offer: {}", e)));
                }
            },
            Op::SetLocal(desc) => {
                let result = match to_rtc_description(desc) {
                    Ok(desc) => pc.set_local_description(desc).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    events.emit(EngineEvent::NegotiationFailed(format!(
                        "set local description: {}",
                        e
                    )));
                }
            }
            Op::SetRemote(desc) => {
                let result = match to_rtc_description(desc) {
                    Ok(desc) => pc.set_remote_description(desc).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    events.emit(EngineEvent::NegotiationFailed(format!(
                        "set remote description: {}",
                        e
                    )));
                }
            }
            Op::AddIce(candidate) => {
                let init = RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mline_index: u16::try_from(candidate.sdp_mline_index).ok(),
                    ..Default::default()
                };
                if let Err(e) = pc.add_ice_candidate(init).await {
                    warn!("Peer {}: ignoring ICE candidate: {}", events.peer(), e);
                }
            }
            Op::Close => break,
        }
    }

    if let Err(e) = pc.close().await {
        debug!("Peer {}: close failed: {}", events.peer(), e);
    }
}

/// Feeds one local track from a bounded queue
struct TrackWriter {
    tx: mpsc::Sender<Sample>,
    dropped: u64,
}

impl TrackWriter {
    fn spawn(track: Arc<TrackLocalStaticSample>, backlog: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Sample>(backlog.max(1));
        tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Track {} write failed: {}", track.id(), e);
                }
            }
        });
        Self { tx, dropped: 0 }
    }

    /// Queue a sample; a full queue drops it
    fn write(&mut self, data: bytes::Bytes, duration: Duration) -> Result<(), EngineError> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::PipelineClosed),
        }
    }
}

/// One peer's webrtc-rs pipeline
pub struct RtcPipeline {
    peer: PeerId,
    ops: mpsc::UnboundedSender<Op>,
    encoder: OpusEncoder,
    resampler: Option<StereoResampler>,
    audio: TrackWriter,
    #[cfg(feature = "h264")]
    video: Option<video::VideoSender>,
    closed: bool,
}

impl RtcPipeline {
    fn queue(&self, op: Op) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::PipelineClosed);
        }
        self.ops.send(op).map_err(|_| EngineError::PipelineClosed)
    }
}

impl Pipeline for RtcPipeline {
    fn push_audio(
        &mut self,
        _packet: AudioPacket,
        source: &mut FrameRing,
    ) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::PipelineClosed);
        }

        let duration = Duration::from_nanos(self.encoder.frame_duration_ns());
        match self.resampler.as_mut() {
            None => {
                let chunk = self.encoder.frame_size();
                while source.len() >= chunk {
                    let data = self
                        .encoder
                        .encode_frames((0..chunk).map(|_| source.next_frame()))?;
                    self.audio.write(data, duration)?;
                }
            }
            Some(resampler) => loop {
                let needed = resampler.input_frames_next();
                if source.len() < needed {
                    break;
                }
                let frames = resampler.process((0..needed).map(|_| source.next_frame()))?;
                let data = self.encoder.encode_frames(frames)?;
                self.audio.write(data, duration)?;
            },
        }
        Ok(())
    }

    #[cfg(feature = "h264")]
    fn push_video(&mut self, packet: VideoPacket<'_>) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::PipelineClosed);
        }
        match self.video.as_mut() {
            Some(video) => video.push(packet),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "h264"))]
    fn push_video(&mut self, _packet: VideoPacket<'_>) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::PipelineClosed);
        }
        Ok(())
    }

    fn create_offer(&mut self) -> Result<(), EngineError> {
        self.queue(Op::CreateOffer)
    }

    fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), EngineError> {
        self.queue(Op::SetLocal(desc))
    }

    fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), EngineError> {
        self.queue(Op::SetRemote(desc))
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.queue(Op::AddIce(candidate))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.ops.send(Op::Close);
        debug!(
            "Peer {} pipeline shut down ({} audio samples dropped by backlog)",
            self.peer, self.audio.dropped
        );
    }
}

impl Drop for RtcPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(feature = "h264")]
mod video {
    use super::*;
    use crate::codec::H264Encoder;
    use webrtc::api::media_engine::MIME_TYPE_H264;

    const H264_FMTP: &str =
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

    pub(super) struct VideoSender {
        encoder: H264Encoder,
        writer: TrackWriter,
    }

    impl VideoSender {
        pub(super) async fn new(
            pc: &Arc<RTCPeerConnection>,
            config: &EngineConfig,
            frame_rate: u32,
        ) -> Result<Self, EngineError> {
            let writer = RtcEngine::add_send_track(
                pc,
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: crate::constants::VIDEO_CLOCK_RATE,
                    channels: 0,
                    sdp_fmtp_line: H264_FMTP.to_owned(),
                    rtcp_feedback: vec![],
                },
                "video",
                config.track_backlog,
            )
            .await?;

            Ok(Self {
                encoder: H264Encoder::new(config.video_bitrate, frame_rate)?,
                writer,
            })
        }

        pub(super) fn push(&mut self, packet: VideoPacket<'_>) -> Result<(), EngineError> {
            let data = self
                .encoder
                .encode(packet.data, packet.width, packet.height)?;
            if data.is_empty() {
                return Ok(());
            }
            self.writer
                .write(data, Duration::from_nanos(packet.duration_ns))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_engine() -> RtcEngine {
        let engine_config = EngineConfig {
            stun_server: String::new(),
            ..Default::default()
        };
        RtcEngine::new(engine_config, &StreamerConfig::default()).unwrap()
    }

    #[test]
    fn test_pipeline_parts_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<OpusEncoder>();
        assert_send::<StereoResampler>();
        #[cfg(feature = "h264")]
        assert_send::<crate::codec::H264Encoder>();
        assert_send::<RtcPipeline>();
    }

    #[test]
    fn test_native_opus_rate_not_resampled() {
        let streamer = StreamerConfig {
            sample_rate: 24000,
            ..Default::default()
        };
        let engine = RtcEngine::new(EngineConfig::default(), &streamer).unwrap();
        assert_eq!(engine.opus.sample_rate, 24000);
        assert_eq!(engine.resample_from, None);
    }

    #[tokio::test]
    async fn test_44100_source_resampled_and_encoded() {
        let streamer = StreamerConfig {
            sample_rate: 44100,
            ..Default::default()
        };
        let engine_config = EngineConfig {
            stun_server: String::new(),
            ..Default::default()
        };
        let engine = RtcEngine::new(engine_config, &streamer).unwrap();
        assert_eq!(engine.opus.sample_rate, 48000);
        assert_eq!(engine.resample_from, Some(44100));

        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerId::new();
        let mut pipeline = engine
            .create_pipeline(peer, EventSink::new(peer, tx))
            .await
            .unwrap();

        let mut ring = FrameRing::new(8192);
        for _ in 0..4410 {
            ring.push(crate::media::AudioFrame::mono(0.1));
        }
        let packet = AudioPacket {
            pts_ns: 0,
            duration_ns: 100_000_000,
            frames: 4410,
            sample_rate: 44100,
        };

        pipeline.push_audio(packet, &mut ring).unwrap();
        // Whole resampler chunks consumed; less than one chunk left behind
        assert!(ring.len() < 600, "left {}", ring.len());
        assert!(ring.len() < 4410);
        assert_eq!(ring.underrun_count(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_produces_sendonly_offer() {
        let engine = test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = PeerId::new();

        let mut pipeline = engine
            .create_pipeline(peer, EventSink::new(peer, tx))
            .await
            .unwrap();
        pipeline.create_offer().unwrap();

        let sdp = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some((_, EngineEvent::OfferCreated(sdp))) => break sdp,
                    Some(_) => continue,
                    None => panic!("event channel closed"),
                }
            }
        })
        .await
        .unwrap();

        assert!(sdp.starts_with("v=0"));
        assert!(sdp.contains("m=audio"));
        assert!(sdp.to_lowercase().contains("opus/48000/2"));
        assert!(sdp.contains("a=sendonly"));

        pipeline.shutdown();
        assert!(matches!(
            pipeline.create_offer(),
            Err(EngineError::PipelineClosed)
        ));
    }

    #[tokio::test]
    async fn test_push_audio_consumes_whole_chunks() {
        let engine = test_engine();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = PeerId::new();
        let mut pipeline = engine
            .create_pipeline(peer, EventSink::new(peer, tx))
            .await
            .unwrap();

        let mut ring = FrameRing::new(4096);
        for _ in 0..1000 {
            ring.push(crate::media::AudioFrame::mono(0.1));
        }
        let packet = AudioPacket {
            pts_ns: 0,
            duration_ns: 0,
            frames: 1000,
            sample_rate: 48000,
        };

        pipeline.push_audio(packet, &mut ring).unwrap();
        // 480-frame Opus chunks: two consumed, remainder kept
        assert_eq!(ring.len(), 40);
        assert_eq!(ring.underrun_count(), 0);
    }
}
