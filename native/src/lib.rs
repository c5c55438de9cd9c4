pub mod capture;

pub use capture::{LiveCapture, LiveCaptureConfig, PacketSource, ReplayCapture};
