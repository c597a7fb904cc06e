use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::SpeechRecognizer;
use crate::config::{Config, ModelConfig};

/// Errors raised while loading or running the speech model
#[derive(Debug, Error)]
pub enum RecognizerError {
    /// Model file missing or invalid
    #[error("failed to load speech model from {path}: {source}")]
    ModelLoad {
        /// Path to the model file
        path: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Inference state could not be created
    #[error("failed to create inference state")]
    StateCreation,

    /// Inference failed
    #[error("inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}

/// Loaded whisper model with fixed inference settings.
struct WhisperEngine {
    ctx: Mutex<WhisperContext>,
    threads: i32,
    beam_size: i32,
    language: Option<String>,
}

impl WhisperEngine {
    const fn sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    fn load(model_path: &Path, config: &ModelConfig) -> Result<Self, RecognizerError> {
        let model_load = |source: anyhow::Error| RecognizerError::ModelLoad {
            path: model_path.display().to_string(),
            source,
        };

        if config.threads == 0 {
            return Err(model_load(anyhow::anyhow!("threads must be > 0")));
        }
        if config.beam_size == 0 {
            return Err(model_load(anyhow::anyhow!("beam_size must be > 0")));
        }

        let threads = i32::try_from(config.threads)
            .map_err(|_| model_load(anyhow::anyhow!("threads value too large")))?;
        let beam_size = i32::try_from(config.beam_size)
            .map_err(|_| model_load(anyhow::anyhow!("beam_size value too large")))?;

        let path_str = model_path
            .to_str()
            .ok_or_else(|| model_load(anyhow::anyhow!("model path contains invalid UTF-8")))?;

        tracing::info!(
            path = %model_path.display(),
            threads,
            beam_size,
            language = ?config.language,
            "loading speech model"
        );

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| model_load(anyhow::anyhow!("{e:?}")))?;

        tracing::info!("speech model loaded");

        Ok(Self {
            ctx: Mutex::new(ctx),
            threads,
            beam_size,
            language: config.language.clone(),
        })
    }

    /// Transcribe canonical 16 kHz mono samples to raw text.
    fn transcribe(&self, samples: &[f32]) -> Result<String, RecognizerError> {
        let _span = tracing::debug_span!("transcription", samples = samples.len()).entered();

        let mut state = self
            .ctx
            .lock()
            .map_err(|e| anyhow::anyhow!("model lock poisoned: {e}"))?
            .create_state()
            .map_err(|_| RecognizerError::StateCreation)?;

        let mut params = FullParams::new(Self::sampling_strategy(self.beam_size));
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref());
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .map_err(|e| anyhow::anyhow!("whisper inference failed: {e:?}"))?;
        let inference_duration = start.elapsed();

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }
        let text = text.trim().to_owned();

        tracing::info!(
            text_len = text.len(),
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        Ok(text)
    }
}

// SAFETY: the WhisperContext is only reached through the mutex, so no two
// threads touch it concurrently. whisper-rs contexts are safe to use from
// any single thread at a time.
#[allow(unsafe_code)]
unsafe impl Send for WhisperEngine {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperEngine {}

/// Production [`SpeechRecognizer`] around a lazily loaded whisper model.
///
/// Created empty so the rest of the pipeline can be wired immediately;
/// [`WhisperRecognizer::load_model`] fills it in from a background thread.
pub struct WhisperRecognizer {
    engine: RwLock<Option<Arc<WhisperEngine>>>,
}

impl WhisperRecognizer {
    /// New recognizer with no model loaded
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine: RwLock::new(None),
        }
    }

    /// Load the model described by `config`, replacing any previous one.
    ///
    /// # Errors
    /// Returns error if the model path cannot be resolved or the model fails
    /// to load; the recognizer stays in its previous state.
    pub fn load_model(&self, config: &ModelConfig) -> Result<(), RecognizerError> {
        let path = Config::expand_path(&config.path).map_err(|e| RecognizerError::ModelLoad {
            path: config.path.clone(),
            source: e,
        })?;

        let engine = WhisperEngine::load(&path, config)?;

        if let Ok(mut guard) = self.engine.write() {
            *guard = Some(Arc::new(engine));
        }
        Ok(())
    }

    fn current_engine(&self) -> Option<Arc<WhisperEngine>> {
        self.engine.read().ok().and_then(|guard| guard.clone())
    }
}

impl Default for WhisperRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn recognize(&self, samples: &[f32], sample_rate: u32) -> Option<String> {
        let Some(engine) = self.current_engine() else {
            tracing::warn!("recognize called before model finished loading");
            return None;
        };
        if samples.is_empty() {
            tracing::debug!("recognize called with empty samples");
            return None;
        }

        tracing::debug!(samples = samples.len(), sample_rate, "starting recognition");

        let owned = samples.to_vec();
        let result = tokio::task::spawn_blocking(move || engine.transcribe(&owned)).await;

        let text = match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "recognition failed");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "recognition task panicked");
                return None;
            }
        };

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn is_ready(&self) -> bool {
        self.engine.read().map(|e| e.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn model_config(path: &str) -> ModelConfig {
        ModelConfig {
            path: path.to_owned(),
            threads: 4,
            beam_size: 5,
            language: None,
        }
    }

    #[test]
    fn test_sampling_strategy_greedy_at_one() {
        assert!(matches!(
            WhisperEngine::sampling_strategy(1),
            SamplingStrategy::Greedy { best_of: 1 }
        ));
    }

    #[test]
    fn test_sampling_strategy_beam_search_above_one() {
        assert!(matches!(
            WhisperEngine::sampling_strategy(5),
            SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience
            } if patience == -1.0
        ));
    }

    #[test]
    fn test_load_nonexistent_model_fails() {
        let result = WhisperEngine::load(
            Path::new("/tmp/voicekey_nonexistent_model.bin"),
            &model_config("/tmp/voicekey_nonexistent_model.bin"),
        );
        assert!(matches!(result, Err(RecognizerError::ModelLoad { .. })));
    }

    #[test]
    fn test_load_rejects_zero_threads() {
        let mut config = model_config("/tmp/dummy.bin");
        config.threads = 0;
        let result = WhisperEngine::load(Path::new("/tmp/dummy.bin"), &config);
        assert!(matches!(result, Err(RecognizerError::ModelLoad { .. })));
    }

    #[test]
    fn test_load_rejects_zero_beam_size() {
        let mut config = model_config("/tmp/dummy.bin");
        config.beam_size = 0;
        let result = WhisperEngine::load(Path::new("/tmp/dummy.bin"), &config);
        assert!(matches!(result, Err(RecognizerError::ModelLoad { .. })));
    }

    #[test]
    fn test_recognizer_not_ready_before_load() {
        assert!(!WhisperRecognizer::new().is_ready());
    }

    #[tokio::test]
    async fn test_recognize_without_model_returns_none() {
        let recognizer = WhisperRecognizer::new();
        let result = recognizer.recognize(&[0.0; 16000], 16000).await;
        assert!(result.is_none());
    }

    #[test]
    fn test_recognizer_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<WhisperRecognizer>();
        assert_sync::<WhisperRecognizer>();
    }
}
