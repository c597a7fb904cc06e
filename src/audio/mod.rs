//! Microphone capture and canonical-format conversion.

/// cpal capture pipeline
pub mod capture;

use thiserror::Error;

pub use capture::AudioCapture;

/// Sample rate all captured and recovered audio is normalized to
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// One microphone input session.
///
/// Implementations deliver converted chunks internally; callers only see the
/// assembled buffer at [`AudioInput::stop`].
pub trait AudioInput: Send + Sync {
    /// Begin capturing from the default input device.
    ///
    /// # Errors
    /// Returns [`CaptureError::FormatUnsupported`] if the device's native
    /// format cannot be converted to canonical mono/f32/16 kHz, or
    /// [`CaptureError::DeviceStartFailed`] if the device refuses to start.
    fn start(&self) -> Result<(), CaptureError>;

    /// Stop capturing and drain everything recorded since `start`.
    ///
    /// Safe to call redundantly or concurrently: only the first effective
    /// call returns data, later calls return an empty buffer.
    fn stop(&self) -> Vec<f32>;

    /// RMS amplitude of the most recent chunk, readable from any thread
    fn level(&self) -> f32;
}

/// Capture start failures
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No converter to canonical format exists for the device's native format
    #[error("unsupported input format: {0}")]
    FormatUnsupported(String),

    /// The audio device refused to start (busy, removed, no device)
    #[error("audio device failed to start: {0}")]
    DeviceStartFailed(String),
}
