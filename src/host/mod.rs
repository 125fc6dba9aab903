//! Host-side audio capture (cpal)
//!
//! Optional producer that feeds a live input device into the streamer.

pub mod capture;
pub mod device;

pub use capture::{CaptureStats, DeviceCapture};
pub use device::{find_input_device, list_input_devices, InputDeviceInfo};
