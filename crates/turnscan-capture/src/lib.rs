//! Capture side of turnscan.
//!
//! This crate drives the scanner hardware:
//! - [`TurntableLink`] speaks the single-byte turntable protocol over a [`SerialTransport`]
//! - [`BackgroundModel`] separates the object from a calibrated background
//! - [`FrameSampler`] turns one [`DepthShot`] into a filtered [`ShotCloud`](turnscan_core::ShotCloud)
//! - [`CaptureSession`] sequences sampling and turntable steps for a whole revolution

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
// Type names like CaptureState in session.rs are clearer than State
#![allow(clippy::module_name_repetitions)]

pub mod background;
pub mod camera;
pub mod link;
pub mod sampler;
pub mod session;
pub mod transport;

pub use background::{BackgroundMask, BackgroundModel, FOREGROUND_THRESHOLD};
pub use camera::{DepthCamera, DepthShot, ReplayCamera};
pub use link::{LinkEvent, LinkState, TurntableLink};
pub use sampler::FrameSampler;
pub use session::{CaptureSession, CaptureState};
pub use transport::{
    available_ports, MockTransport, SerialPortTransport, SerialTransport, DEFAULT_BAUD_RATE,
};
