//! The recording lifecycle state machine.
//!
//! All state lives on one task: hardware events, recognition completions,
//! and the model-load signal arrive on a single queue and are processed one
//! at a time, so transitions never race no matter which thread produced the
//! event.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::audio::{AudioInput, CANONICAL_SAMPLE_RATE};
use crate::backup::AudioBackup;
use crate::history::HistoryStore;
use crate::input::evaluator::LogicalAction;
use crate::output::TextOutput;
use crate::permissions::PermissionChecker;
use crate::punctuation::PunctuationProvider;
use crate::transcription::SpeechRecognizer;

const RECENT_RESULTS_CAP: usize = 3;

/// Lifecycle state of the dictation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Speech model still loading
    #[default]
    Loading,
    /// Ready for a hotkey press
    Idle,
    /// Microphone active
    Recording,
    /// Waiting on the recognition engine
    Recognizing,
    /// Emitting text at the cursor
    Outputting,
}

impl RecordingState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Loading => 0,
            Self::Idle => 1,
            Self::Recording => 2,
            Self::Recognizing => 3,
            Self::Outputting => 4,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Recording,
            3 => Self::Recognizing,
            4 => Self::Outputting,
            _ => Self::Loading,
        }
    }
}

/// Lock-free mirror of the current state, readable from the real-time key
/// tap callback.
pub struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: RecordingState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    fn store(&self, state: RecordingState) {
        self.0.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Current state
    #[must_use]
    pub fn load(&self) -> RecordingState {
        RecordingState::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// Where a recognition request originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionOrigin {
    /// A recording that just finished
    Live,
    /// Samples recovered from a crash backup
    Recovered,
}

/// Everything the controller reacts to
#[derive(Debug)]
pub enum ControllerEvent {
    /// Background model load finished (successfully or not)
    ModelLoadComplete,
    /// Classified key event from the interceptor
    Hotkey(LogicalAction),
    /// Recognition engine resolved
    RecognitionDone {
        /// Recognized text; `None` or empty means no speech
        text: Option<String>,
        /// Live recording or crash recovery
        origin: RecognitionOrigin,
    },
}

/// Published view of the controller for UI/output consumers
#[derive(Debug, Clone, Default)]
pub struct ControllerSnapshot {
    /// Current lifecycle state
    pub state: RecordingState,
    /// User-visible error from the last attempt, if any
    pub error_message: Option<String>,
    /// Most recent recognized text
    pub last_result: Option<String>,
    /// Up to three most recent texts, newest first
    pub recent_results: Vec<String>,
}

/// Collaborators injected at startup
pub struct ControllerDeps {
    /// Microphone session
    pub audio: Arc<dyn AudioInput>,
    /// Write-ahead recording backup
    pub backup: Arc<dyn AudioBackup>,
    /// Speech-to-text engine
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// Accessibility permission probe
    pub permissions: Arc<dyn PermissionChecker>,
    /// Punctuation post-processor
    pub punctuation: Arc<dyn PunctuationProvider>,
    /// Dictation history sink
    pub history: Arc<dyn HistoryStore>,
    /// Cursor text emitter
    pub output: Arc<dyn TextOutput>,
}

/// Handle for feeding events to and observing a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    /// Event queue feeding the controller task
    pub events: mpsc::UnboundedSender<ControllerEvent>,
    /// Published state snapshots
    pub state: watch::Receiver<ControllerSnapshot>,
    /// Lock-free state mirror for real-time callbacks
    pub state_cell: Arc<StateCell>,
}

/// Owner of [`RecordingState`] and driver of the capture/backup/recognition
/// pipeline.
pub struct RecordingController {
    state: RecordingState,
    error_message: Option<String>,
    last_result: Option<String>,
    recent_results: Vec<String>,
    deps: ControllerDeps,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    state_tx: watch::Sender<ControllerSnapshot>,
    state_cell: Arc<StateCell>,
}

impl RecordingController {
    /// Build a controller in `Loading` state plus the handle used to drive
    /// and observe it.
    #[must_use]
    pub fn new(deps: ControllerDeps) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ControllerSnapshot::default());
        let state_cell = Arc::new(StateCell::new(RecordingState::Loading));

        let handle = ControllerHandle {
            events: events_tx.clone(),
            state: state_rx,
            state_cell: Arc::clone(&state_cell),
        };

        let controller = Self {
            state: RecordingState::Loading,
            error_message: None,
            last_result: None,
            recent_results: Vec::new(),
            deps,
            events_tx,
            events_rx,
            state_tx,
            state_cell,
        };

        (controller, handle)
    }

    /// Process events until every sender is dropped.
    pub async fn run(mut self) {
        info!("controller running");
        while let Some(event) = self.events_rx.recv().await {
            self.handle_event(event);
        }
        info!("controller stopped");
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::ModelLoadComplete => self.on_model_load_complete(),
            ControllerEvent::Hotkey(LogicalAction::HotkeyDown) => self.handle_hotkey_toggle(),
            ControllerEvent::Hotkey(LogicalAction::CancelRecording) => self.cancel_recording(),
            ControllerEvent::Hotkey(action) => {
                debug!(?action, "ignoring non-toggle action");
            }
            ControllerEvent::RecognitionDone { text, origin } => {
                self.on_recognition_done(text, origin);
            }
        }
    }

    // Toggle semantics: first press starts recording, second press stops and
    // recognizes. Presses in any other state are ignored.
    fn handle_hotkey_toggle(&mut self) {
        debug!(state = ?self.state, "hotkey toggle");

        if self.error_message.take().is_some() {
            self.publish();
        }

        match self.state {
            RecordingState::Idle => self.start_recording_from_idle(),
            RecordingState::Recording => self.stop_recording_and_recognize(),
            RecordingState::Loading => {
                if !self.deps.recognizer.is_ready() {
                    self.set_error("speech model is still loading, try again shortly");
                }
            }
            RecordingState::Recognizing | RecordingState::Outputting => {
                debug!(state = ?self.state, "toggle ignored");
            }
        }
    }

    fn start_recording_from_idle(&mut self) {
        if !self.deps.permissions.is_accessibility_granted() {
            self.set_error(
                "accessibility permission required - enable it in System Settings and try again",
            );
            return;
        }

        match self.deps.audio.start() {
            Ok(()) => {
                // Best-effort: a failed backup never blocks recording
                if let Err(e) = self.deps.backup.start() {
                    warn!(error = %e, "backup unavailable for this recording");
                }
                self.set_state(RecordingState::Recording);
            }
            Err(e) => {
                warn!(error = %e, "could not start recording");
                self.set_error(&format!("could not start recording: {e}"));
            }
        }
    }

    fn cancel_recording(&mut self) {
        if self.state != RecordingState::Recording {
            debug!(state = ?self.state, "cancel ignored");
            return;
        }

        let _ = self.deps.audio.stop();
        self.deps.backup.discard();
        self.set_state(RecordingState::Idle);
        info!("recording cancelled");
    }

    fn stop_recording_and_recognize(&mut self) {
        let samples = self.deps.audio.stop();
        info!(samples = samples.len(), "recording stopped, recognizing");

        self.set_state(RecordingState::Recognizing);
        self.spawn_recognition(samples, RecognitionOrigin::Live);
    }

    fn spawn_recognition(&self, samples: Vec<f32>, origin: RecognitionOrigin) {
        let recognizer = Arc::clone(&self.deps.recognizer);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let text = recognizer.recognize(&samples, CANONICAL_SAMPLE_RATE).await;
            let _ = events_tx.send(ControllerEvent::RecognitionDone { text, origin });
        });
    }

    fn on_recognition_done(&mut self, text: Option<String>, origin: RecognitionOrigin) {
        if self.state != RecordingState::Recognizing {
            warn!(state = ?self.state, "recognition resolved in unexpected state");
        }

        let Some(text) = text.filter(|t| !t.is_empty()) else {
            info!("no speech recognized");
            self.deps.backup.discard();
            self.set_state(RecordingState::Idle);
            return;
        };

        let final_text = self.deps.punctuation.add_punctuation(&text);
        info!(text_len = final_text.len(), "recognition succeeded");

        self.last_result = Some(final_text.clone());
        self.push_recent(final_text.clone());
        self.deps.history.insert(&final_text);
        self.deps.output.insert_text(&final_text);

        match origin {
            RecognitionOrigin::Live => self.deps.backup.finalize_and_delete(),
            RecognitionOrigin::Recovered => self.deps.backup.discard(),
        }

        self.set_state(RecordingState::Idle);
    }

    fn on_model_load_complete(&mut self) {
        info!("model load complete");
        self.set_state(RecordingState::Idle);
        self.check_for_recovery();
    }

    // Runs once per launch: a leftover backup file means the previous
    // session died mid-recording, so its samples go straight to recognition
    // without ever opening the microphone.
    fn check_for_recovery(&mut self) {
        if !self.deps.backup.has_pending() {
            return;
        }
        info!("pending recording backup found, attempting recovery");

        match self.deps.backup.recover() {
            Some(samples) if !samples.is_empty() => {
                self.set_state(RecordingState::Recognizing);
                self.spawn_recognition(samples, RecognitionOrigin::Recovered);
            }
            _ => {
                info!("backup empty or corrupt, discarding");
                self.deps.backup.discard();
            }
        }
    }

    fn push_recent(&mut self, text: String) {
        self.recent_results.insert(0, text);
        self.recent_results.truncate(RECENT_RESULTS_CAP);
    }

    fn set_state(&mut self, state: RecordingState) {
        debug!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.state_cell.store(state);
        self.publish();
    }

    fn set_error(&mut self, message: &str) {
        self.error_message = Some(message.to_owned());
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(ControllerSnapshot {
            state: self.state,
            error_message: self.error_message.clone(),
            last_result: self.last_result.clone(),
            recent_results: self.recent_results.clone(),
        });
    }
}
