//! Error types for turnscan.

use thiserror::Error;

/// The main error type for turnscan operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The serial link could not be opened, read or written.
    ///
    /// Connection errors are never retried; the caller reconnects explicitly.
    #[error("turntable connection error: {0}")]
    Connection(String),

    /// A command was issued while the turntable link is disconnected.
    #[error("turntable is not connected")]
    NotConnected,

    /// A command was issued while the motor is still moving.
    #[error("turntable is busy")]
    LinkBusy,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation is not allowed while a capture session is running.
    #[error("a capture session is already running")]
    SessionActive,

    /// A mesh pipeline run is already in flight.
    #[error("mesh pipeline is already running")]
    PipelineBusy,

    /// Surface reconstruction produced no surface.
    #[error("reconstruction failed: {0}")]
    Reconstruction(#[from] ReconstructionFailure),

    /// Writing an exported artifact failed.
    #[error("export error: {0}")]
    Export(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why surface reconstruction produced no surface.
///
/// The pipeline stays usable after either failure; a retry with different
/// parameters is allowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionFailure {
    /// The implicit function could not be fitted to the oriented points.
    #[error("implicit function fit failed: {0}")]
    ImplicitFit(String),

    /// The extracted triangulation has zero vertices.
    #[error("extracted surface is empty")]
    EmptySurface,
}

/// A specialized Result type for turnscan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
