//! Optional punctuation post-processing for recognized text.

/// Punctuation restorer applied to raw recognition output.
#[cfg_attr(test, mockall::automock)]
pub trait PunctuationProvider: Send + Sync {
    /// A model is loaded and ready to punctuate
    fn is_ready(&self) -> bool;

    /// Punctuated form of `text`; implementations return the input unchanged
    /// when not ready
    fn add_punctuation(&self, text: &str) -> String;
}

/// Identity punctuation provider used when no punctuation model is
/// configured.
pub struct NoopPunctuation;

impl PunctuationProvider for NoopPunctuation {
    fn is_ready(&self) -> bool {
        false
    }

    fn add_punctuation(&self, text: &str) -> String {
        text.to_owned()
    }
}
