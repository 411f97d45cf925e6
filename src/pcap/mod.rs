mod capture;

pub use capture::{CaptureError, CaptureEvent, CaptureLoader, CaptureSource, CapturedPacket};
