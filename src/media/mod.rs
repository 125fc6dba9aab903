//! Media buffers and the structures that move them between threads

pub mod buffer;
pub mod queue;
pub mod ring;

pub use buffer::{AudioBuffer, AudioFrame, AudioView, VideoBuffer, VideoView};
pub use queue::{transfer_queue, TransferReceiver, TransferSender};
pub use ring::FrameRing;
