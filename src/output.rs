//! Emitting recognized text at the system cursor.

use tracing::info;

/// CGEvent supports roughly 20 UTF-16 code units per keyboard event, so
/// longer texts are posted in slices.
#[cfg(target_os = "macos")]
const EVENT_CHUNK_UTF16: usize = 20;

/// Destination for recognized text, called once per successful recognition.
/// Implementations must not touch the clipboard.
#[cfg_attr(test, mockall::automock)]
pub trait TextOutput: Send + Sync {
    /// Type `text` at the current cursor position
    fn insert_text(&self, text: &str);
}

/// Generate preview of text for logging (pure, testable)
///
/// Truncates text >50 chars with "..." suffix. Respects UTF-8 char boundaries.
#[must_use]
pub fn text_preview(text: &str) -> String {
    if text.len() > 50 {
        let mut end = 47.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            return "...".to_owned();
        }
        format!("{}...", &text[..end])
    } else {
        text.to_owned()
    }
}

/// Text insertion errors
#[derive(Debug, thiserror::Error)]
pub enum TextInsertionError {
    /// Failed to create the event source
    #[error("failed to create CGEvent source")]
    EventSourceCreation,

    /// Failed to create a keyboard event
    #[error("failed to create keyboard CGEvent")]
    EventCreation,

    /// Text is empty
    #[error("text is empty")]
    EmptyText,
}

/// Inserts text at the cursor by simulating keyboard events.
///
/// Posts Unicode keyboard events directly; the clipboard is never read or
/// written. Some apps (secure input fields) silently drop simulated events.
///
/// # Errors
/// Returns error if event creation fails (usually a revoked Accessibility
/// permission) or `text` is empty.
#[cfg(target_os = "macos")]
pub fn insert_text(text: &str) -> Result<(), TextInsertionError> {
    use core_graphics::event::{CGEvent, CGEventTapLocation};
    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

    if text.is_empty() {
        tracing::error!("attempted to insert empty text");
        return Err(TextInsertionError::EmptyText);
    }

    let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|()| TextInsertionError::EventSourceCreation)?;

    let utf16: Vec<u16> = text.encode_utf16().collect();

    for chunk in utf16.chunks(EVENT_CHUNK_UTF16) {
        let key_down = CGEvent::new_keyboard_event(source.clone(), 0, true)
            .map_err(|()| TextInsertionError::EventCreation)?;
        // SAFETY contract of the underlying call: the slice must be valid
        // UTF-16, which encode_utf16 on &str always produces.
        key_down.set_string_from_utf16_unchecked(chunk);
        key_down.post(CGEventTapLocation::HID);

        let key_up = CGEvent::new_keyboard_event(source.clone(), 0, false)
            .map_err(|()| TextInsertionError::EventCreation)?;
        key_up.post(CGEventTapLocation::HID);
    }

    info!(
        text_len = text.len(),
        utf16_len = utf16.len(),
        text_preview = %text_preview(text),
        "text posted at cursor"
    );

    Ok(())
}

/// [`TextOutput`] posting CGEvents; insertion failures are logged, never
/// propagated.
#[cfg(target_os = "macos")]
pub struct CgEventOutput;

#[cfg(target_os = "macos")]
impl TextOutput for CgEventOutput {
    fn insert_text(&self, text: &str) {
        if let Err(e) = insert_text(text) {
            tracing::error!(error = %e, text_len = text.len(), "text insertion failed");
        }
    }
}

/// [`TextOutput`] that only logs, used on platforms without an insertion
/// backend.
pub struct LoggingTextOutput;

impl TextOutput for LoggingTextOutput {
    fn insert_text(&self, text: &str) {
        info!(text_preview = %text_preview(text), "recognized text (no insertion backend)");
    }
}
