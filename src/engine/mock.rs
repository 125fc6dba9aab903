//! Recording engine for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{AudioPacket, EventSink, MediaEngine, Pipeline, VideoPacket};
use crate::error::EngineError;
use crate::media::FrameRing;
use crate::signaling::protocol::{IceCandidate, SessionDescription};
use crate::signaling::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PushAudio { pts_ns: u64, duration_ns: u64, frames: usize },
    PushVideo { pts_ns: u64, duration_ns: u64, width: u32, height: u32 },
    CreateOffer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddIce(IceCandidate),
    Shutdown,
}

/// Shared, ordered record of every pipeline call
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(PeerId, Call)>>>);

impl CallLog {
    pub fn record(&self, peer: PeerId, call: Call) {
        self.0.lock().unwrap().push((peer, call));
    }

    pub fn calls(&self) -> Vec<(PeerId, Call)> {
        self.0.lock().unwrap().clone()
    }

    pub fn for_peer(&self, peer: PeerId) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(p, _)| *p == peer)
            .map(|(_, call)| call)
            .collect()
    }
}

pub struct MockPipeline {
    peer: PeerId,
    log: CallLog,
    reject_pushes: Arc<AtomicBool>,
    closed: bool,
}

impl MockPipeline {
    pub fn new(peer: PeerId, log: CallLog) -> Self {
        Self {
            peer,
            log,
            reject_pushes: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    /// Flag that makes every later push fail
    pub fn reject_handle(&self) -> Arc<AtomicBool> {
        self.reject_pushes.clone()
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.closed {
            Err(EngineError::PipelineClosed)
        } else {
            Ok(())
        }
    }
}

impl Pipeline for MockPipeline {
    fn push_audio(&mut self, packet: AudioPacket, source: &mut FrameRing) -> Result<(), EngineError> {
        self.check()?;
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(EngineError::Pipeline("mock rejected buffer".to_string()));
        }
        for _ in 0..packet.frames {
            source.next_frame();
        }
        self.log.record(
            self.peer,
            Call::PushAudio {
                pts_ns: packet.pts_ns,
                duration_ns: packet.duration_ns,
                frames: packet.frames,
            },
        );
        Ok(())
    }

    fn push_video(&mut self, packet: VideoPacket<'_>) -> Result<(), EngineError> {
        self.check()?;
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(EngineError::Pipeline("mock rejected buffer".to_string()));
        }
        self.log.record(
            self.peer,
            Call::PushVideo {
                pts_ns: packet.pts_ns,
                duration_ns: packet.duration_ns,
                width: packet.width,
                height: packet.height,
            },
        );
        Ok(())
    }

    fn create_offer(&mut self) -> Result<(), EngineError> {
        self.check()?;
        self.log.record(self.peer, Call::CreateOffer);
        Ok(())
    }

    fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check()?;
        self.log.record(self.peer, Call::SetLocal(desc));
        Ok(())
    }

    fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), EngineError> {
        self.check()?;
        self.log.record(self.peer, Call::SetRemote(desc));
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.check()?;
        self.log.record(self.peer, Call::AddIce(candidate));
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.record(self.peer, Call::Shutdown);
        }
    }
}

/// Engine handing out [`MockPipeline`]s
#[derive(Clone, Default)]
pub struct MockEngine {
    pub log: CallLog,
    pub fail_create: Arc<AtomicBool>,
    pub sinks: Arc<Mutex<Vec<EventSink>>>,
    rejects: Arc<Mutex<Vec<(PeerId, Arc<AtomicBool>)>>>,
}

impl MockEngine {
    pub fn sink(&self, peer: PeerId) -> Option<EventSink> {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.peer() == peer)
            .cloned()
    }

    /// Reject flag of the pipeline created for `peer`
    pub fn reject_handle(&self, peer: PeerId) -> Option<Arc<AtomicBool>> {
        self.rejects
            .lock()
            .unwrap()
            .iter()
            .find(|(p, _)| *p == peer)
            .map(|(_, flag)| flag.clone())
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_pipeline(
        &self,
        peer: PeerId,
        events: EventSink,
    ) -> Result<Box<dyn Pipeline>, EngineError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::PipelineInit("mock".to_string()));
        }
        self.sinks.lock().unwrap().push(events);
        let pipeline = MockPipeline::new(peer, self.log.clone());
        self.rejects
            .lock()
            .unwrap()
            .push((peer, pipeline.reject_handle()));
        Ok(Box::new(pipeline))
    }
}
