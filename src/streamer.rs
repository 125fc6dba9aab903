//! Streamer: producer handles and the consumer thread
//!
//! [`Streamer::start`] binds the signaling socket, creates the four transfer
//! queues and spawns the consumer thread, which runs a current-thread tokio
//! runtime hosting the HTTP/WebSocket endpoint and the fan-out [`Relay`].
//! The producer side is a pair of move-only handles, [`AudioProducer`] and
//! [`VideoProducer`], whose `push` never blocks.
//!
//! Buffer lifecycle:
//!
//! ```text
//! producer: alloc + copy -> send queue -> consumer: fan-out (borrowed)
//!     ^                                                |
//!     +---- drop on next push <---- free queue <-------+
//! ```
//!
//! Buffers the free queue has no room for are parked on the consumer and
//! retried every tick. When the consumer stops, whatever is still parked
//! travels back over an unbounded overflow channel, so every buffer is
//! released by the producer.

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::config::{AppConfig, StreamerConfig};
use crate::engine::{MediaEngine, RtcEngine};
use crate::error::{Result, ServerError};
use crate::media::{
    transfer_queue, AudioBuffer, AudioView, TransferReceiver, TransferSender, VideoBuffer,
    VideoView,
};
use crate::relay::{Relay, RelayQueues};
use crate::signaling::server;

/// How long shutdown waits for the HTTP endpoint to wind down
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Counters shared between the producer and consumer threads
#[derive(Debug, Default)]
pub struct StreamerStats {
    audio_enqueued: AtomicU64,
    audio_dropped: AtomicU64,
    audio_reclaimed: AtomicU64,
    video_enqueued: AtomicU64,
    video_dropped: AtomicU64,
    video_reclaimed: AtomicU64,
    audio_deliveries: AtomicU64,
    video_deliveries: AtomicU64,
    peers: AtomicUsize,
}

impl StreamerStats {
    pub(crate) fn record_audio_delivery(&self) {
        self.audio_deliveries.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_video_delivery(&self) {
        self.video_deliveries.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn set_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_enqueued: self.audio_enqueued.load(Ordering::Relaxed),
            audio_dropped: self.audio_dropped.load(Ordering::Relaxed),
            audio_reclaimed: self.audio_reclaimed.load(Ordering::Relaxed),
            video_enqueued: self.video_enqueued.load(Ordering::Relaxed),
            video_dropped: self.video_dropped.load(Ordering::Relaxed),
            video_reclaimed: self.video_reclaimed.load(Ordering::Relaxed),
            audio_deliveries: self.audio_deliveries.load(Ordering::Acquire),
            video_deliveries: self.video_deliveries.load(Ordering::Acquire),
            peers: self.peers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Buffers accepted into the audio send queue
    pub audio_enqueued: u64,
    /// Audio pushes dropped (not ready, invalid shape or queue full)
    pub audio_dropped: u64,
    /// Audio buffers released after the round trip
    pub audio_reclaimed: u64,
    pub video_enqueued: u64,
    pub video_dropped: u64,
    pub video_reclaimed: u64,
    /// Audio buffers popped and fanned out by the consumer
    pub audio_deliveries: u64,
    pub video_deliveries: u64,
    /// Live peers
    pub peers: usize,
}

/// Producer handle for audio. Move it to the host's audio thread.
pub struct AudioProducer {
    send: TransferSender<AudioBuffer>,
    free: TransferReceiver<AudioBuffer>,
    overflow: crossbeam_channel::Receiver<AudioBuffer>,
    ready: Arc<AtomicBool>,
    stats: Arc<StreamerStats>,
}

impl AudioProducer {
    /// Copy a planar block into the send queue.
    ///
    /// Returns false if the block was dropped: the consumer is not running
    /// yet, the shape is invalid or the queue is full. Never blocks.
    pub fn push(&mut self, view: &AudioView<'_>) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            self.stats.audio_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.reclaim();

        if !view.is_valid() || self.send.is_full() {
            self.stats.audio_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.send.push(AudioBuffer::from_view(view)) {
            Ok(()) => {
                self.stats.audio_enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.audio_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Release buffers the consumer has finished with
    pub fn reclaim(&mut self) -> usize {
        let reclaimed = self.free.drain().count() + self.overflow.try_iter().count();
        if reclaimed > 0 {
            self.stats
                .audio_reclaimed
                .fetch_add(reclaimed as u64, Ordering::Relaxed);
        }
        reclaimed
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Producer handle for video. Move it to the host's video thread.
pub struct VideoProducer {
    send: TransferSender<VideoBuffer>,
    free: TransferReceiver<VideoBuffer>,
    overflow: crossbeam_channel::Receiver<VideoBuffer>,
    ready: Arc<AtomicBool>,
    stats: Arc<StreamerStats>,
}

impl VideoProducer {
    /// Copy a packed RGBA frame (`width * height * 4` bytes) into the send
    /// queue. Same drop rules as [`AudioProducer::push`].
    pub fn push(&mut self, view: &VideoView<'_>) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            self.stats.video_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.reclaim();

        if !view.is_valid() || self.send.is_full() {
            self.stats.video_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.send.push(VideoBuffer::from_view(view)) {
            Ok(()) => {
                self.stats.video_enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.video_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Release frames the consumer has finished with
    pub fn reclaim(&mut self) -> usize {
        let reclaimed = self.free.drain().count() + self.overflow.try_iter().count();
        if reclaimed > 0 {
            self.stats
                .video_reclaimed
                .fetch_add(reclaimed as u64, Ordering::Relaxed);
        }
        reclaimed
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Owns the consumer thread. Dropping it stops and joins the thread.
pub struct StreamerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    ready: Arc<AtomicBool>,
    stats: Arc<StreamerStats>,
    config: StreamerConfig,
}

impl StreamerHandle {
    /// Address the signaling endpoint is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the fan-out loop has started
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Stop the consumer thread and wait for it
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Consumer thread panicked");
            }
        }
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// A running streamer
pub struct Streamer {
    // Declared first so the consumer thread is joined before the producer
    // ends of the queues are dropped
    handle: StreamerHandle,
    audio: AudioProducer,
    video: VideoProducer,
}

impl Streamer {
    /// Bind the endpoint and start the consumer thread.
    ///
    /// Fails if the configuration is invalid, the port cannot be bound or
    /// the consumer thread cannot be started.
    pub fn start(config: StreamerConfig, engine: Box<dyn MediaEngine>) -> Result<Self> {
        config.validate()?;

        let listener = server::bind(&config)?;
        let local_addr = listener.local_addr()?;

        let (audio_send, audio) = transfer_queue(config.audio_queue_capacity);
        let (audio_free, audio_free_rx) = transfer_queue(config.audio_queue_capacity);
        let (video_send, video) = transfer_queue(config.video_queue_capacity);
        let (video_free, video_free_rx) = transfer_queue(config.video_queue_capacity);
        let (audio_overflow, audio_overflow_rx) = crossbeam_channel::unbounded();
        let (video_overflow, video_overflow_rx) = crossbeam_channel::unbounded();

        let ready = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StreamerStats::default());

        let relay = Relay::new(
            config.clone(),
            engine,
            RelayQueues {
                audio,
                audio_free,
                audio_overflow,
                video,
                video_free,
                video_overflow,
            },
            ready.clone(),
            stats.clone(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let thread_config = config.clone();

        let thread = std::thread::Builder::new()
            .name("streamer-consumer".to_string())
            .spawn(move || run_consumer(thread_config, listener, relay, shutdown_rx, started_tx))
            .map_err(ServerError::Spawn)?;

        match started_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e.into());
            }
            Err(_) => {
                let _ = thread.join();
                return Err(ServerError::StartupAborted.into());
            }
        }

        info!("Streamer started on {}", local_addr);

        Ok(Self {
            handle: StreamerHandle {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
                local_addr,
                ready: ready.clone(),
                stats: stats.clone(),
                config,
            },
            audio: AudioProducer {
                send: audio_send,
                free: audio_free_rx,
                overflow: audio_overflow_rx,
                ready: ready.clone(),
                stats: stats.clone(),
            },
            video: VideoProducer {
                send: video_send,
                free: video_free_rx,
                overflow: video_overflow_rx,
                ready,
                stats,
            },
        })
    }

    /// Start with the webrtc-rs engine described by `config`
    pub fn with_webrtc(config: AppConfig) -> Result<Self> {
        let engine = RtcEngine::new(config.engine, &config.streamer)?;
        Self::start(config.streamer, Box::new(engine))
    }

    pub fn push_audio(&mut self, view: &AudioView<'_>) -> bool {
        self.audio.push(view)
    }

    pub fn push_video(&mut self, view: &VideoView<'_>) -> bool {
        self.video.push(view)
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_ready()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.handle.stats()
    }

    pub fn config(&self) -> &StreamerConfig {
        self.handle.config()
    }

    /// Split into independently movable producer handles and the owner of
    /// the consumer thread
    pub fn split(self) -> (AudioProducer, VideoProducer, StreamerHandle) {
        (self.audio, self.video, self.handle)
    }

    pub fn stop(self) {
        self.handle.stop();
    }
}

fn run_consumer(
    config: StreamerConfig,
    listener: std::net::TcpListener,
    relay: Relay,
    shutdown: oneshot::Receiver<()>,
    started: crossbeam_channel::Sender<std::result::Result<(), ServerError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = started.send(Err(ServerError::Runtime(e)));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = started.send(Err(ServerError::Runtime(e)));
                return;
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let router = server::router(&config, events_tx);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(server::serve(listener, router, async move {
            let _ = stop_rx.await;
        }));

        let _ = started.send(Ok(()));
        relay.run(events_rx, shutdown).await;

        let _ = stop_tx.send(());
        match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("Signaling endpoint failed: {}", e),
            Ok(Err(e)) => error!("Signaling endpoint task failed: {}", e),
            Err(_) => info!("Signaling endpoint did not stop in time"),
        }
    });

    info!("Consumer thread stopped");
}
