//! Demo streamer
//!
//! Serves the built-in player and fans out a test tone plus an RGBA test
//! pattern to every browser that connects. With `--capture [device]` the
//! tone is replaced by a live input device.
//!
//! Usage: `streamer [config.toml] [--capture [device]] [--list-devices]`

use anyhow::Result;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webrtc_av_streamer::{
    config::AppConfig,
    constants::*,
    streamer::{AudioProducer, VideoProducer},
    AudioView, Streamer, VideoView,
};

const TONE_HZ: f32 = 440.0;
const TONE_GAIN: f32 = 0.2;

struct Args {
    config: Option<String>,
    capture: Option<Option<String>>,
    list_devices: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        capture: None,
        list_devices: false,
    };

    let mut iter = std::env::args().skip(1).peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list-devices" => args.list_devices = true,
            "--capture" => {
                let device = iter.next_if(|next| !next.starts_with("--"));
                args.capture = Some(device);
            }
            _ => args.config = Some(arg),
        }
    }
    args
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    let sample_rate = config.streamer.sample_rate;
    let frame_size = config.streamer.frame_size;
    let frame_rate = config.streamer.video_frame_rate;

    let streamer = Streamer::with_webrtc(config)?;
    tracing::info!("Open http://{} in a browser", streamer.local_addr());

    let (audio, video, handle) = streamer.split();
    let running = Arc::new(AtomicBool::new(true));

    // Either the capture adapter or the tone thread owns the audio producer
    #[cfg(feature = "capture")]
    let mut capture = None;
    let mut workers = Vec::new();

    match args.capture {
        #[cfg(feature = "capture")]
        Some(device) => {
            capture = Some(webrtc_av_streamer::host::DeviceCapture::start(
                device.as_deref(),
                sample_rate,
                audio,
            )?);
        }
        #[cfg(not(feature = "capture"))]
        Some(_) => {
            anyhow::bail!("built without the `capture` feature");
        }
        None => {
            let running = running.clone();
            workers.push(thread::Builder::new().name("tone".into()).spawn(move || {
                run_tone(audio, sample_rate, frame_size, &running)
            })?);
        }
    }

    {
        let running = running.clone();
        workers.push(thread::Builder::new().name("pattern".into()).spawn(move || {
            run_pattern(video, frame_rate, &running)
        })?);
    }

    tracing::info!("Streaming - press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = stats_interval.tick() => {
                let stats = handle.stats();
                tracing::debug!(
                    "Stats: {} peers, audio {}/{} enqueued/dropped, video {}/{}",
                    stats.peers,
                    stats.audio_enqueued,
                    stats.audio_dropped,
                    stats.video_enqueued,
                    stats.video_dropped
                );
                #[cfg(feature = "capture")]
                if let Some(e) = capture.as_ref().and_then(|c| c.try_error()) {
                    tracing::warn!("Capture error: {}", e);
                }
            }
        }
    }

    tracing::info!("Shutting down");
    running.store(false, Ordering::SeqCst);
    #[cfg(feature = "capture")]
    drop(capture);
    for worker in workers {
        let _ = worker.join();
    }
    handle.stop();

    Ok(())
}

/// Produce a stereo sine tone in `frame_size` blocks at real-time pace
fn run_tone(mut producer: AudioProducer, sample_rate: u32, frame_size: usize, running: &AtomicBool) {
    let block = Duration::from_secs_f64(frame_size as f64 / sample_rate as f64);
    let step = TAU * TONE_HZ / sample_rate as f32;

    let mut left = vec![0.0f32; frame_size];
    let mut right = vec![0.0f32; frame_size];
    let mut phase = 0.0f32;
    let start = Instant::now();
    let mut blocks: u32 = 0;

    while running.load(Ordering::Relaxed) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let sample = phase.sin() * TONE_GAIN;
            *l = sample;
            *r = sample;
            phase = (phase + step) % TAU;
        }

        let channels: [&[f32]; 2] = [&left, &right];
        producer.push(&AudioView::new(&channels, frame_size));

        blocks = blocks.wrapping_add(1);
        let due = start + block * blocks;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

/// Produce a moving RGBA gradient at `frame_rate`
fn run_pattern(mut producer: VideoProducer, frame_rate: u32, running: &AtomicBool) {
    let width = DEMO_VIDEO_WIDTH;
    let height = DEMO_VIDEO_HEIGHT;
    let interval = Duration::from_secs_f64(1.0 / frame_rate as f64);

    let mut pixels = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
    let start = Instant::now();
    let mut frame: u32 = 0;

    while running.load(Ordering::Relaxed) {
        let shift = (frame % 256) as u8;
        for (i, px) in pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            px[0] = ((x * 255 / width) as u8).wrapping_add(shift);
            px[1] = (y * 255 / height) as u8;
            px[2] = shift;
            px[3] = 255;
        }

        producer.push(&VideoView::new(&pixels, width, height));

        frame = frame.wrapping_add(1);
        let due = start + interval * frame;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
}

#[cfg(feature = "capture")]
fn print_devices() {
    println!("\n=== Available Input Devices ===");
    for device in webrtc_av_streamer::host::list_input_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(not(feature = "capture"))]
fn print_devices() {
    println!("Built without the `capture` feature");
}
