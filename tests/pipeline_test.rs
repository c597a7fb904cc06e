//! End-to-end state machine scenarios over the full controller task.
//!
//! Drives the controller exactly as production does: events in through the
//! handle, state observed through the published snapshots, with in-memory
//! collaborators standing in for the microphone, recognizer, and cursor.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

use voicekey::audio::{AudioInput, CaptureError};
use voicekey::backup::{AudioBackup, BackupError};
use voicekey::controller::{
    ControllerDeps, ControllerEvent, ControllerHandle, RecordingController, RecordingState,
};
use voicekey::history::HistoryStore;
use voicekey::input::evaluator::LogicalAction;
use voicekey::output::TextOutput;
use voicekey::permissions::PermissionChecker;
use voicekey::punctuation::NoopPunctuation;
use voicekey::transcription::SpeechRecognizer;

struct FakeAudio {
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    samples: Vec<f32>,
}

impl FakeAudio {
    fn with_samples(samples: Vec<f32>) -> Self {
        Self {
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            samples,
        }
    }
}

impl AudioInput for FakeAudio {
    fn start(&self) -> Result<(), CaptureError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Vec<f32> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.samples.clone()
    }

    fn level(&self) -> f32 {
        0.0
    }
}

#[derive(Default)]
struct FakeBackup {
    pending: bool,
    recovered: Option<Vec<f32>>,
    start_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    discard_calls: AtomicUsize,
}

impl AudioBackup for FakeBackup {
    fn has_pending(&self) -> bool {
        self.pending
    }
    fn start(&self) -> Result<(), BackupError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn append(&self, _samples: &[f32]) {}
    fn finalize_and_delete(&self) {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn recover(&self) -> Option<Vec<f32>> {
        self.recovered.clone()
    }
    fn discard(&self) {
        self.discard_calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct GatedRecognizer {
    result: Mutex<Option<String>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_sample_count: AtomicUsize,
}

impl GatedRecognizer {
    fn returning(result: Option<&str>) -> Self {
        Self {
            result: Mutex::new(result.map(str::to_owned)),
            gate: None,
            calls: AtomicUsize::new(0),
            last_sample_count: AtomicUsize::new(0),
        }
    }

    fn gated(result: Option<&str>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::returning(result)
        }
    }

    fn set_result(&self, result: Option<&str>) {
        *self.result.lock().unwrap() = result.map(str::to_owned);
    }
}

#[async_trait]
impl SpeechRecognizer for GatedRecognizer {
    async fn recognize(&self, samples: &[f32], sample_rate: u32) -> Option<String> {
        assert_eq!(sample_rate, 16000);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_sample_count.store(samples.len(), Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result.lock().unwrap().clone()
    }

    fn is_ready(&self) -> bool {
        true
    }
}

struct Granted;

impl PermissionChecker for Granted {
    fn is_accessibility_granted(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct CollectingOutput {
    texts: Mutex<Vec<String>>,
}

impl TextOutput for CollectingOutput {
    fn insert_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_owned());
    }
}

#[derive(Default)]
struct CollectingHistory {
    texts: Mutex<Vec<String>>,
}

impl HistoryStore for CollectingHistory {
    fn insert(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_owned());
    }
}

struct Pipeline {
    audio: Arc<FakeAudio>,
    backup: Arc<FakeBackup>,
    recognizer: Arc<GatedRecognizer>,
    output: Arc<CollectingOutput>,
    history: Arc<CollectingHistory>,
    handle: ControllerHandle,
}

fn spawn_pipeline(audio: FakeAudio, backup: FakeBackup, recognizer: GatedRecognizer) -> Pipeline {
    let audio = Arc::new(audio);
    let backup = Arc::new(backup);
    let recognizer = Arc::new(recognizer);
    let output = Arc::new(CollectingOutput::default());
    let history = Arc::new(CollectingHistory::default());

    let deps = ControllerDeps {
        audio: Arc::clone(&audio) as Arc<dyn AudioInput>,
        backup: Arc::clone(&backup) as Arc<dyn AudioBackup>,
        recognizer: Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
        permissions: Arc::new(Granted),
        punctuation: Arc::new(NoopPunctuation),
        history: Arc::clone(&history) as Arc<dyn HistoryStore>,
        output: Arc::clone(&output) as Arc<dyn TextOutput>,
    };

    let (controller, handle) = RecordingController::new(deps);
    tokio::spawn(controller.run());

    Pipeline {
        audio,
        backup,
        recognizer,
        output,
        history,
        handle,
    }
}

async fn wait_for_state(pipeline: &Pipeline, target: RecordingState) {
    let mut state_rx = pipeline.handle.state.clone();
    timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|snapshot| snapshot.state == target),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"))
    .unwrap();
}

fn press_hotkey(pipeline: &Pipeline) {
    pipeline
        .handle
        .events
        .send(ControllerEvent::Hotkey(LogicalAction::HotkeyDown))
        .unwrap();
}

fn press_cancel(pipeline: &Pipeline) {
    pipeline
        .handle
        .events
        .send(ControllerEvent::Hotkey(LogicalAction::CancelRecording))
        .unwrap();
}

fn finish_loading(pipeline: &Pipeline) {
    pipeline
        .handle
        .events
        .send(ControllerEvent::ModelLoadComplete)
        .unwrap();
}

// Scenario A: hotkey from Idle starts exactly one capture session
#[tokio::test]
async fn test_hotkey_from_idle_starts_recording() {
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(vec![0.1; 160]),
        FakeBackup::default(),
        GatedRecognizer::returning(Some("hello")),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;

    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;

    assert_eq!(pipeline.audio.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.backup.start_calls.load(Ordering::SeqCst), 1);
}

// Scenario B: full dictation round trip ending back in Idle with the text
// emitted and the backup finalized
#[tokio::test]
async fn test_recognition_emits_text_and_finalizes_backup() {
    let gate = Arc::new(Notify::new());
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(vec![0.1; 16000]),
        FakeBackup::default(),
        GatedRecognizer::gated(Some("你好世界"), Arc::clone(&gate)),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;

    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recognizing).await;

    gate.notify_one();
    wait_for_state(&pipeline, RecordingState::Idle).await;

    let snapshot = pipeline.handle.state.borrow().clone();
    assert_eq!(snapshot.last_result.as_deref(), Some("你好世界"));
    assert_eq!(snapshot.recent_results, vec!["你好世界".to_owned()]);
    assert_eq!(
        *pipeline.output.texts.lock().unwrap(),
        vec!["你好世界".to_owned()]
    );
    assert_eq!(
        *pipeline.history.texts.lock().unwrap(),
        vec!["你好世界".to_owned()]
    );
    assert_eq!(pipeline.backup.finalize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.backup.discard_calls.load(Ordering::SeqCst), 0);
}

// Scenario C: empty recognition emits nothing and leaves the previous
// result in place
#[tokio::test]
async fn test_empty_recognition_emits_nothing() {
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(vec![0.1; 16000]),
        FakeBackup::default(),
        GatedRecognizer::returning(Some("first")),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;

    // One successful round to establish a previous result
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;
    press_hotkey(&pipeline);
    let mut state_rx = pipeline.handle.state.clone();
    timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| s.last_result.is_some() && s.state == RecordingState::Idle),
    )
    .await
    .unwrap()
    .unwrap();

    // Second round comes back empty
    pipeline.recognizer.set_result(None);
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;

    let snapshot = pipeline.handle.state.borrow().clone();
    assert_eq!(snapshot.last_result.as_deref(), Some("first"));
    assert_eq!(*pipeline.output.texts.lock().unwrap(), vec!["first".to_owned()]);
    assert_eq!(pipeline.backup.discard_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.backup.finalize_calls.load(Ordering::SeqCst), 1);
}

// Scenario D: a pending backup at startup is recognized without ever
// touching the microphone, then deleted
#[tokio::test]
async fn test_startup_recovery_bypasses_capture() {
    let gate = Arc::new(Notify::new());
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(Vec::new()),
        FakeBackup {
            pending: true,
            recovered: Some(vec![0.5; 16000]),
            ..FakeBackup::default()
        },
        GatedRecognizer::gated(Some("recovered speech"), Arc::clone(&gate)),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recognizing).await;

    gate.notify_one();
    wait_for_state(&pipeline, RecordingState::Idle).await;

    assert_eq!(pipeline.audio.start_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.recognizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        pipeline.recognizer.last_sample_count.load(Ordering::SeqCst),
        16000
    );
    assert_eq!(
        *pipeline.output.texts.lock().unwrap(),
        vec!["recovered speech".to_owned()]
    );
    assert_eq!(pipeline.backup.discard_calls.load(Ordering::SeqCst), 1);
}

// Hotkey and Escape are ignored while recognition is in flight; the events
// are consumed without starting a new capture
#[tokio::test]
async fn test_events_during_recognition_are_ignored() {
    let gate = Arc::new(Notify::new());
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(vec![0.1; 16000]),
        FakeBackup::default(),
        GatedRecognizer::gated(Some("held"), Arc::clone(&gate)),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recognizing).await;

    // These land on the queue ahead of the recognition completion
    press_hotkey(&pipeline);
    press_cancel(&pipeline);

    gate.notify_one();
    wait_for_state(&pipeline, RecordingState::Idle).await;

    assert_eq!(pipeline.audio.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.audio.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*pipeline.output.texts.lock().unwrap(), vec!["held".to_owned()]);
}

// Escape during recording throws the audio away
#[tokio::test]
async fn test_cancel_during_recording_discards_everything() {
    let pipeline = spawn_pipeline(
        FakeAudio::with_samples(vec![0.1; 16000]),
        FakeBackup::default(),
        GatedRecognizer::returning(Some("should never appear")),
    );

    finish_loading(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;
    press_hotkey(&pipeline);
    wait_for_state(&pipeline, RecordingState::Recording).await;

    press_cancel(&pipeline);
    wait_for_state(&pipeline, RecordingState::Idle).await;

    assert_eq!(pipeline.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(pipeline.output.texts.lock().unwrap().is_empty());
    assert_eq!(pipeline.backup.discard_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.backup.finalize_calls.load(Ordering::SeqCst), 0);
}
