//! Crash-safe write-ahead mirror of the in-progress recording.
//!
//! While a recording is active, every captured chunk is appended to a WAV
//! file on disk. A clean stop deletes the file; a crash leaves it behind so
//! the next launch can recover and transcribe the audio.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::CANONICAL_SAMPLE_RATE;

const BACKUP_FILE_NAME: &str = "voicekey_recording_backup.wav";

/// Write-ahead backup of one in-progress recording.
///
/// All methods are best-effort: failures are logged and never propagate into
/// the recording path, except [`AudioBackup::start`] which reports whether a
/// backup file could be created at all.
pub trait AudioBackup: Send + Sync {
    /// A backup file exists on disk (crash indicator at startup)
    fn has_pending(&self) -> bool;

    /// Delete any stale backup and open a fresh file for appending
    ///
    /// # Errors
    /// Returns error if the backup file cannot be created.
    fn start(&self) -> Result<(), BackupError>;

    /// Append converted samples; no-op when not started or `samples` is empty
    fn append(&self, samples: &[f32]);

    /// Rewrite header sizes, close, and delete after a completed recording
    fn finalize_and_delete(&self);

    /// Read back a pending backup. `None` means absent, corrupt, or empty;
    /// the caller is expected to [`AudioBackup::discard`] afterwards.
    fn recover(&self) -> Option<Vec<f32>>;

    /// Close and delete unconditionally (user cancel)
    fn discard(&self);
}

/// Backup file errors
#[derive(Debug, Error)]
pub enum BackupError {
    /// Backup directory could not be prepared
    #[error("failed to prepare backup directory: {0}")]
    Dir(#[from] std::io::Error),

    /// Backup file could not be created
    #[error("failed to create backup file: {0}")]
    Create(#[from] hound::Error),
}

/// WAV-file-backed [`AudioBackup`].
///
/// The file is mono 32-bit float at the canonical rate. The WAV header is
/// refreshed after every appended chunk, so the file on disk stays decodable
/// no matter where the process dies; at most the final unflushed chunk is
/// lost.
pub struct BackupLog {
    path: PathBuf,
    writer: Mutex<Option<WavWriter<BufWriter<File>>>>,
}

impl BackupLog {
    /// Create a backup log rooted in `dir`. No file is touched until
    /// [`AudioBackup::start`].
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(BACKUP_FILE_NAME),
            writer: Mutex::new(None),
        }
    }

    /// Location of the backup file
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn spec() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: CANONICAL_SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        }
    }

    fn close_writer(&self) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(writer) = guard.take() {
                if let Err(e) = writer.finalize() {
                    warn!(error = %e, "failed to finalize backup writer");
                }
            }
        }
    }

    fn delete_file(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "backup file deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to delete backup file"),
        }
    }
}

impl AudioBackup for BackupLog {
    fn has_pending(&self) -> bool {
        self.path.exists()
    }

    fn start(&self) -> Result<(), BackupError> {
        // One backup at a time: always clear the previous file first
        self.close_writer();
        self.delete_file();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let writer = WavWriter::create(&self.path, Self::spec())?;

        if let Ok(mut guard) = self.writer.lock() {
            *guard = Some(writer);
        }

        info!(path = %self.path.display(), "backup recording started");
        Ok(())
    }

    fn append(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        let Some(writer) = guard.as_mut() else {
            return;
        };

        for &sample in samples {
            if let Err(e) = writer.write_sample(sample) {
                warn!(error = %e, "backup append failed");
                return;
            }
        }

        // Keep the header current so a crash after this point still leaves a
        // decodable file
        if let Err(e) = writer.flush() {
            warn!(error = %e, "backup flush failed");
        }
    }

    fn finalize_and_delete(&self) {
        self.close_writer();
        self.delete_file();
        debug!("backup finalized and deleted");
    }

    fn recover(&self) -> Option<Vec<f32>> {
        if !self.has_pending() {
            return None;
        }
        self.close_writer();

        let mut reader = match WavReader::open(&self.path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(error = %e, "backup file unreadable");
                return None;
            }
        };

        if reader.spec() != Self::spec() {
            warn!(spec = ?reader.spec(), "backup file has unexpected format");
            return None;
        }

        let samples: Vec<f32> = reader.samples::<f32>().map_while(Result::ok).collect();

        if samples.is_empty() {
            debug!("backup file contains no samples");
            return None;
        }

        info!(samples = samples.len(), "recovered samples from backup");
        Some(samples)
    }

    fn discard(&self) {
        self.close_writer();
        self.delete_file();
    }
}
