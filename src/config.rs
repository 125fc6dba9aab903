//! Configuration for the streamer and the WebRTC media engine
//!
//! Configuration is supplied once when a `Streamer` is constructed and is
//! immutable for its lifetime. It can be loaded from a TOML file; missing
//! fields fall back to the defaults in [`crate::constants`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub streamer: StreamerConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.streamer.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid configuration: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Write configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/webrtc-av-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "webrtc-av-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Streamer configuration: signaling endpoint, media shape and the
/// transfer-queue / fan-out tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Address the signaling server binds to
    pub bind_address: String,

    /// Listen port (0 picks an ephemeral port)
    pub port: u16,

    /// WebSocket signaling path
    pub path: String,

    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Audio frames per host block
    pub frame_size: usize,

    /// Nominal video frame rate, drives video presentation timestamps
    pub video_frame_rate: u32,

    /// Fan-out tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Max buffers drained per queue per tick
    pub batch_size: usize,

    /// Audio send/free queue capacity
    pub audio_queue_capacity: usize,

    /// Video send/free queue capacity
    pub video_queue_capacity: usize,

    /// Per-peer audio ring capacity in frames
    pub ring_capacity: usize,

    /// Optional HTML page served at `/` instead of the built-in player
    pub static_page: Option<PathBuf>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_WS_PATH.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            video_frame_rate: DEFAULT_VIDEO_FRAME_RATE,
            tick_interval_ms: TICK_INTERVAL_MS,
            batch_size: FANOUT_BATCH_SIZE,
            audio_queue_capacity: AUDIO_QUEUE_CAPACITY,
            video_queue_capacity: VIDEO_QUEUE_CAPACITY,
            ring_capacity: RING_BUFFER_CAPACITY,
            static_page: None,
        }
    }
}

/// Routes that serve the player page
const PAGE_ROUTES: [&str; 2] = ["/", "/index.html"];

impl StreamerConfig {
    /// Reject configurations the streamer cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool); 8] = [
            ("sample_rate", self.sample_rate > 0),
            ("frame_size", self.frame_size > 0),
            ("video_frame_rate", self.video_frame_rate > 0),
            ("tick_interval_ms", self.tick_interval_ms > 0),
            ("batch_size", self.batch_size > 0),
            ("audio_queue_capacity", self.audio_queue_capacity > 0),
            ("video_queue_capacity", self.video_queue_capacity > 0),
            ("ring_capacity", self.ring_capacity > 0),
        ];
        for (name, ok) in checks {
            if !ok {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }

        if !self.path.starts_with('/') {
            return Err(Error::Config(format!(
                "WebSocket path must start with '/': {}",
                self.path
            )));
        }
        if PAGE_ROUTES.contains(&self.path.as_str()) {
            return Err(Error::Config(format!(
                "WebSocket path {} collides with the player page",
                self.path
            )));
        }

        Ok(())
    }

    /// Nominal video frame interval in nanoseconds
    pub fn video_frame_interval_ns(&self) -> u64 {
        NANOS_PER_SECOND / self.video_frame_rate.max(1) as u64
    }

    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// WebRTC media engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// STUN server URL handed to every peer connection
    pub stun_server: String,

    /// Opus settings for the audio track
    pub opus: OpusConfig,

    /// Target H.264 bitrate in bits per second
    pub video_bitrate: u32,

    /// Per-track sample backlog before the engine starts dropping
    pub track_backlog: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stun_server: DEFAULT_STUN_SERVER.to_string(),
            opus: OpusConfig::low_delay(),
            video_bitrate: DEFAULT_VIDEO_BITRATE,
            track_backlog: DEFAULT_TRACK_BACKLOG,
        }
    }
}

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    Voip,
    Audio,
    LowDelay,
}

/// Opus signal hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusSignal {
    Auto,
    Voice,
    Music,
}

/// Opus bandwidth limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusBandwidth {
    Narrowband,
    Mediumband,
    Wideband,
    Superwideband,
    Fullband,
}

/// Opus encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per encoded frame
    pub frame_size: usize,
    pub bitrate: u32,
    pub vbr: bool,
    pub cvbr: bool,
    /// 0-10
    pub complexity: u8,
    pub fec: bool,
    pub packet_loss_perc: u8,
    pub dtx: bool,
    pub signal: OpusSignal,
    pub max_bandwidth: OpusBandwidth,
    pub application: OpusApplication,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self::low_delay()
    }
}

impl OpusConfig {
    /// Full-band, restricted low-delay music profile at 128 kbit/s
    pub fn low_delay() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: OPUS_CHANNELS,
            frame_size: Self::frame_size_from_ms(DEFAULT_SAMPLE_RATE, DEFAULT_OPUS_FRAME_MS),
            bitrate: DEFAULT_OPUS_BITRATE,
            vbr: true,
            cvbr: false,
            complexity: 8,
            fec: false,
            packet_loss_perc: 0,
            dtx: false,
            signal: OpusSignal::Music,
            max_bandwidth: OpusBandwidth::Fullband,
            application: OpusApplication::LowDelay,
        }
    }

    /// Same profile at another sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        let frame_ms = self.frame_duration_ms();
        self.sample_rate = sample_rate;
        self.frame_size = Self::frame_size_from_ms(sample_rate, frame_ms);
        self
    }

    /// Samples per channel for a frame duration
    pub fn frame_size_from_ms(sample_rate: u32, ms: f32) -> usize {
        (sample_rate as f32 * ms / 1000.0).round() as usize
    }

    /// Frame duration in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.path, "/ws");
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let config = StreamerConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        let config = StreamerConfig {
            path: "ws".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_page_routes() {
        for path in ["/", "/index.html"] {
            let config = StreamerConfig {
                path: path.to_string(),
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{}", path);
        }

        let config = StreamerConfig {
            path: "/signal".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_video_frame_interval() {
        let config = StreamerConfig::default();
        assert_eq!(config.video_frame_interval_ns(), 16_666_666);
    }

    #[test]
    fn test_opus_frame_size() {
        let opus = OpusConfig::low_delay();
        assert_eq!(opus.frame_size, 480);
        assert!((opus.frame_duration_ms() - 10.0).abs() < 0.01);

        let opus = opus.with_sample_rate(24000);
        assert_eq!(opus.frame_size, 240);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [streamer]
            port = 9000
            sample_rate = 44100

            [engine]
            stun_server = "stun:example.org:3478"
            "#,
        )
        .unwrap();

        assert_eq!(config.streamer.port, 9000);
        assert_eq!(config.streamer.sample_rate, 44100);
        assert_eq!(config.streamer.frame_size, DEFAULT_FRAME_SIZE);
        assert_eq!(config.engine.stun_server, "stun:example.org:3478");
        assert_eq!(config.engine.opus.bitrate, DEFAULT_OPUS_BITRATE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.streamer.port = 12345;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.streamer.port, 12345);
    }
}
