//! Speech recognition seam and the whisper-backed production engine.

/// whisper-rs inference engine
pub mod engine;

pub use engine::{RecognizerError, WhisperRecognizer};

use async_trait::async_trait;

/// Batch speech-to-text engine.
///
/// `recognize` is total: failures and silence both resolve to `None` so the
/// caller never distinguishes "no speech" from "engine unavailable".
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe canonical-format samples. `None` means no usable text.
    async fn recognize(&self, samples: &[f32], sample_rate: u32) -> Option<String>;

    /// A model is loaded and inference is possible
    fn is_ready(&self) -> bool;
}
