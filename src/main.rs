use anyhow::Result;
use std::sync::Arc;

use voicekey::audio::{AudioCapture, AudioInput};
use voicekey::backup::{AudioBackup, BackupLog};
use voicekey::config::{Config, TomlConfigStore};
use voicekey::controller::{ControllerDeps, ControllerEvent, RecordingController};
use voicekey::history::SqliteHistory;
use voicekey::output::TextOutput;
use voicekey::permissions::SystemPermissionChecker;
use voicekey::punctuation::NoopPunctuation;
use voicekey::telemetry;
use voicekey::transcription::{SpeechRecognizer, WhisperRecognizer};

#[cfg(target_os = "macos")]
fn text_output() -> Arc<dyn TextOutput> {
    Arc::new(voicekey::output::CgEventOutput)
}

#[cfg(not(target_os = "macos"))]
fn text_output() -> Arc<dyn TextOutput> {
    Arc::new(voicekey::output::LoggingTextOutput)
}

#[tokio::main]
async fn main() -> Result<()> {
    let store = Arc::new(TomlConfigStore::open(Config::default_path()?)?);
    let config = store.snapshot();

    telemetry::init(&config.telemetry)?;
    tracing::info!("voicekey starting");
    println!("✓ Config loaded from ~/.voicekey.toml");

    let history_path = Config::expand_path(&config.history.db_path)?;
    let history = Arc::new(SqliteHistory::open(&history_path));
    println!("✓ History store ready");

    let backup_dir = Config::expand_path(&config.backup.dir)?;
    let backup: Arc<dyn AudioBackup> = Arc::new(BackupLog::new(backup_dir));
    let audio: Arc<dyn AudioInput> = Arc::new(AudioCapture::new(Arc::clone(&backup)));

    let recognizer = Arc::new(WhisperRecognizer::new());

    let deps = ControllerDeps {
        audio,
        backup,
        recognizer: Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
        permissions: Arc::new(SystemPermissionChecker),
        punctuation: Arc::new(NoopPunctuation),
        history,
        output: text_output(),
    };

    let (controller, handle) = RecordingController::new(deps);
    tokio::spawn(controller.run());
    println!("✓ Controller running");

    // Load the speech model off the runtime threads; the controller leaves
    // Loading either way (a failed load just means empty recognitions)
    {
        let recognizer = Arc::clone(&recognizer);
        let model_config = config.model.clone();
        let events = handle.events.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = recognizer.load_model(&model_config) {
                tracing::error!(error = %e, "speech model failed to load");
            }
            let _ = events.send(ControllerEvent::ModelLoadComplete);
        });
    }

    // Downstream consumer of published state (panel/menu UI would sit here)
    {
        let mut state_rx = handle.state.clone();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let snapshot = state_rx.borrow_and_update().clone();
                tracing::info!(state = ?snapshot.state, "state changed");
                if let Some(error) = snapshot.error_message {
                    tracing::warn!(%error, "user-visible error");
                }
            }
        });
    }

    #[cfg(target_os = "macos")]
    let mut interceptor = {
        use voicekey::config::ConfigStore;
        use voicekey::controller::RecordingState;
        use voicekey::input::evaluator::LogicalAction;
        use voicekey::input::tap::{InterceptorCallbacks, KeyEventInterceptor};

        let events_down = handle.events.clone();
        let events_cancel = handle.events.clone();
        let state_cell = Arc::clone(&handle.state_cell);

        let callbacks = InterceptorCallbacks {
            on_hotkey_pressed: Box::new(move || {
                let _ = events_down.send(ControllerEvent::Hotkey(LogicalAction::HotkeyDown));
            }),
            on_cancel_pressed: Box::new(move || {
                let _ =
                    events_cancel.send(ControllerEvent::Hotkey(LogicalAction::CancelRecording));
            }),
            should_intercept_cancel: Box::new(move || {
                state_cell.load() == RecordingState::Recording
            }),
        };

        let mut interceptor =
            KeyEventInterceptor::new(Arc::clone(&store) as Arc<dyn ConfigStore>, callbacks);
        if interceptor.start() {
            println!("✓ Global hotkey active: {}", config.hotkey.display_name());
        } else {
            println!("✗ Key interception unavailable - grant Accessibility permission");
        }
        interceptor
    };

    #[cfg(not(target_os = "macos"))]
    tracing::warn!("global key interception requires macOS; running without a hotkey");

    println!(
        "\nvoicekey is running. Press {} to dictate, Esc to cancel.",
        config.hotkey.display_name()
    );
    println!("Press Ctrl+C to exit.\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    println!("\nShutting down...");

    #[cfg(target_os = "macos")]
    interceptor.stop();

    Ok(())
}
