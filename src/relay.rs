//! Consumer-side fan-out loop
//!
//! The [`Relay`] owns everything that lives on the consumer thread: the
//! live set of [`ReceiverEntry`]s, the consuming ends of the send queues
//! and the producing ends of the free queues. A single `select!` loop
//! interleaves signaling events, pipeline events and the fan-out tick, so
//! no entry is ever touched from two places at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::StreamerConfig;
use crate::engine::{EngineEvent, EventSink, MediaEngine};
use crate::media::{AudioBuffer, TransferReceiver, TransferSender, VideoBuffer};
use crate::receiver::ReceiverEntry;
use crate::signaling::server::{ServerEvent, SignalingChannel};
use crate::signaling::PeerId;
use crate::streamer::StreamerStats;

/// How often queue and peer statistics are logged
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Consumer ends of the four transfer queues, plus the overflow channels
/// that carry parked buffers back to the producers at shutdown
pub struct RelayQueues {
    pub audio: TransferReceiver<AudioBuffer>,
    pub audio_free: TransferSender<AudioBuffer>,
    pub audio_overflow: crossbeam_channel::Sender<AudioBuffer>,
    pub video: TransferReceiver<VideoBuffer>,
    pub video_free: TransferSender<VideoBuffer>,
    pub video_overflow: crossbeam_channel::Sender<VideoBuffer>,
}

pub struct Relay {
    config: StreamerConfig,
    engine: Box<dyn MediaEngine>,
    receivers: HashMap<PeerId, ReceiverEntry>,
    queues: RelayQueues,
    /// Consumed buffers the free queue had no room for
    parked_audio: Vec<AudioBuffer>,
    parked_video: Vec<VideoBuffer>,
    engine_tx: mpsc::UnboundedSender<(PeerId, EngineEvent)>,
    engine_rx: mpsc::UnboundedReceiver<(PeerId, EngineEvent)>,
    ready: Arc<AtomicBool>,
    stats: Arc<StreamerStats>,
}

impl Relay {
    pub fn new(
        config: StreamerConfig,
        engine: Box<dyn MediaEngine>,
        queues: RelayQueues,
        ready: Arc<AtomicBool>,
        stats: Arc<StreamerStats>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        Self {
            config,
            engine,
            receivers: HashMap::new(),
            queues,
            parked_audio: Vec::new(),
            parked_video: Vec::new(),
            engine_tx,
            engine_rx,
            ready,
            stats,
        }
    }

    /// Number of live peers
    pub fn peer_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn receiver(&self, peer: &PeerId) -> Option<&ReceiverEntry> {
        self.receivers.get(peer)
    }

    /// Run until `shutdown` fires or its sender is dropped
    pub async fn run(
        mut self,
        mut server_events: mpsc::UnboundedReceiver<ServerEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = tokio::time::interval(STATS_LOG_INTERVAL);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Fan-out loop started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(event) = server_events.recv() => self.handle_server_event(event).await,
                Some((peer, event)) = self.engine_rx.recv() => self.handle_engine_event(peer, event),
                _ = tick.tick() => self.tick(),
                _ = report.tick() => self.log_stats(),
            }
        }

        self.close_all();
        info!("Fan-out loop stopped");
    }

    /// Handle a connection, message or disconnect from the endpoint
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { peer, channel } => self.accept(peer, channel).await,
            ServerEvent::Message { peer, frame } => {
                let Some(entry) = self.receivers.get_mut(&peer) else {
                    debug!("Dropping message for unknown peer {}", peer);
                    return;
                };
                if let Err(e) = entry.handle_message(frame) {
                    warn!("Closing peer {}: {}", peer, e);
                    self.remove(&peer);
                }
            }
            ServerEvent::Closed { peer } => {
                if self.remove(&peer) {
                    info!("Peer {} left", peer);
                }
            }
        }
    }

    async fn accept(&mut self, peer: PeerId, channel: SignalingChannel) {
        let sink = EventSink::new(peer, self.engine_tx.clone());
        match self.engine.create_pipeline(peer, sink).await {
            Ok(pipeline) => {
                let entry = ReceiverEntry::new(peer, channel, pipeline, &self.config);
                self.receivers.insert(peer, entry);
                self.stats.set_peers(self.receivers.len());
                info!("Accepted peer {} ({} live)", peer, self.receivers.len());
            }
            Err(e) => {
                warn!("Rejecting peer {}: {}", peer, e);
                channel.close();
            }
        }
    }

    /// Dispatch one pipeline event to its entry
    pub fn handle_engine_event(&mut self, peer: PeerId, event: EngineEvent) {
        let Some(entry) = self.receivers.get_mut(&peer) else {
            return;
        };
        if let Err(e) = entry.handle_engine_event(event) {
            warn!("Closing peer {}: {}", peer, e);
            self.remove(&peer);
        }
    }

    /// Dispatch every pipeline event queued so far
    pub fn dispatch_engine_events(&mut self) {
        while let Ok((peer, event)) = self.engine_rx.try_recv() {
            self.handle_engine_event(peer, event);
        }
    }

    fn remove(&mut self, peer: &PeerId) -> bool {
        match self.receivers.remove(peer) {
            Some(mut entry) => {
                entry.close();
                self.stats.set_peers(self.receivers.len());
                true
            }
            None => false,
        }
    }

    /// One fan-out pass: up to `batch_size` buffers per queue
    pub fn tick(&mut self) {
        self.ready.store(true, Ordering::Release);
        self.return_parked();

        let mut failed = Vec::new();

        for _ in 0..self.config.batch_size {
            let Some(buffer) = self.queues.audio.pop() else {
                break;
            };
            for (peer, entry) in self.receivers.iter_mut() {
                match entry.push_data_audio(&buffer) {
                    Ok(()) => {}
                    Err(e) => {
                        debug!("Audio push to peer {} failed: {}", peer, e);
                        failed.push(*peer);
                    }
                }
            }
            if let Err(buffer) = self.queues.audio_free.push(buffer) {
                self.parked_audio.push(buffer);
            }
            self.stats.record_audio_delivery();
        }

        for _ in 0..self.config.batch_size {
            let Some(buffer) = self.queues.video.pop() else {
                break;
            };
            for (peer, entry) in self.receivers.iter_mut() {
                match entry.push_data_video(&buffer) {
                    Ok(()) => {}
                    Err(e) => {
                        debug!("Video push to peer {} failed: {}", peer, e);
                        failed.push(*peer);
                    }
                }
            }
            if let Err(buffer) = self.queues.video_free.push(buffer) {
                self.parked_video.push(buffer);
            }
            self.stats.record_video_delivery();
        }

        failed.sort();
        failed.dedup();
        for peer in failed {
            warn!("Closing peer {}: pipeline rejected media", peer);
            self.remove(&peer);
        }
    }

    /// Retry handing back buffers the free queues could not take
    fn return_parked(&mut self) {
        while let Some(buffer) = self.parked_audio.pop() {
            if let Err(buffer) = self.queues.audio_free.push(buffer) {
                self.parked_audio.push(buffer);
                break;
            }
        }
        while let Some(buffer) = self.parked_video.pop() {
            if let Err(buffer) = self.queues.video_free.push(buffer) {
                self.parked_video.push(buffer);
                break;
            }
        }
    }

    /// Buffers waiting for room in a free queue
    pub fn parked_count(&self) -> usize {
        self.parked_audio.len() + self.parked_video.len()
    }

    fn log_stats(&self) {
        let stats = self.stats.snapshot();
        debug!(
            peers = self.receivers.len(),
            audio_backlog = self.queues.audio.len(),
            video_backlog = self.queues.video.len(),
            ring_backlog = self
                .receivers
                .values()
                .map(ReceiverEntry::queued_frames)
                .sum::<usize>(),
            audio_delivered = stats.audio_deliveries,
            video_delivered = stats.video_deliveries,
            audio_dropped = stats.audio_dropped,
            video_dropped = stats.video_dropped,
            "Fan-out statistics"
        );
    }

    /// Close every peer and hand every parked buffer back to the producers
    pub fn close_all(&mut self) {
        for (_, mut entry) in self.receivers.drain() {
            entry.close();
        }
        self.stats.set_peers(0);
        self.return_parked();
        self.hand_back_parked();
    }

    /// Move parked buffers onto the overflow channels so they are released
    /// by the producer, not here. Only fails once the producer is gone.
    fn hand_back_parked(&mut self) {
        let parked = self.parked_count();
        for buffer in self.parked_audio.drain(..) {
            if self.queues.audio_overflow.send(buffer).is_err() {
                break;
            }
        }
        for buffer in self.parked_video.drain(..) {
            if self.queues.video_overflow.send(buffer).is_err() {
                break;
            }
        }
        if parked > 0 {
            debug!("Handed {} parked buffers back to the producers", parked);
        }
    }
}
