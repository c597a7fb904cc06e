use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{AudioInput, CaptureError, CANONICAL_SAMPLE_RATE};
use crate::backup::AudioBackup;

/// cpal stream wrapper movable across threads.
struct SendStream(cpal::Stream);

// SAFETY: the stream is only created, started, and stopped while holding the
// owning mutex in AudioCapture; no stream calls happen concurrently.
#[allow(unsafe_code)]
unsafe impl Send for SendStream {}

/// Stateless converter from a device's interleaved frames to canonical
/// mono/f32/16 kHz chunks.
#[derive(Debug, Clone, Copy)]
struct ChunkConverter {
    input_rate: u32,
    channels: u16,
}

impl ChunkConverter {
    const fn new(input_rate: u32, channels: u16) -> Self {
        Self {
            input_rate,
            channels,
        }
    }

    /// Downmix to mono by channel average, then resample with linear
    /// interpolation. Output length is
    /// `input_frames * CANONICAL_SAMPLE_RATE / input_rate`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn convert(&self, interleaved: &[f32]) -> Vec<f32> {
        if interleaved.is_empty() || self.input_rate == 0 || self.channels == 0 {
            return Vec::new();
        }

        let mono: Vec<f32> = if self.channels == 1 {
            interleaved.to_vec()
        } else {
            let channels_f64 = f64::from(self.channels);
            interleaved
                .chunks(self.channels as usize)
                .map(|frame| {
                    let sum: f64 = frame.iter().map(|&s| f64::from(s)).sum();
                    (sum / channels_f64) as f32
                })
                .collect()
        };

        if self.input_rate == CANONICAL_SAMPLE_RATE {
            return mono;
        }

        let ratio = f64::from(self.input_rate) / f64::from(CANONICAL_SAMPLE_RATE);
        let output_len = ((mono.len() as f64) / ratio).ceil() as usize;

        let mut resampled = Vec::with_capacity(output_len);
        for i in 0..output_len {
            let src_pos = (i as f64) * ratio;
            let src_floor = (src_pos.floor() as usize).min(mono.len() - 1);
            let src_ceil = (src_floor + 1).min(mono.len() - 1);
            let fract = src_pos - src_pos.floor();

            let s1 = f64::from(mono[src_floor]);
            let s2 = f64::from(mono[src_ceil]);
            resampled.push(s1.mul_add(1.0 - fract, s2 * fract) as f32);
        }

        resampled
    }
}

/// RMS amplitude of a chunk
#[allow(clippy::cast_precision_loss)]
fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_of_squares / samples.len() as f32).sqrt()
}

/// Hand one converted chunk to the shared buffer, the backup sink, and the
/// level meter. The buffer lock is held only for the copy.
fn deliver_chunk(
    chunk: &[f32],
    buffer: &Mutex<Vec<f32>>,
    backup: &dyn AudioBackup,
    level_bits: &AtomicU32,
) {
    if chunk.is_empty() {
        return;
    }

    let rms = rms_level(chunk);

    if let Ok(mut samples) = buffer.lock() {
        samples.extend_from_slice(chunk);
    }

    backup.append(chunk);
    level_bits.store(rms.to_bits(), Ordering::Relaxed);
}

/// Microphone capture session backed by cpal.
///
/// A fresh input stream is built on every [`AudioInput::start`], so device
/// changes between recordings are picked up, and each converted chunk is
/// mirrored to the injected backup sink before the level meter updates.
pub struct AudioCapture {
    backup: Arc<dyn AudioBackup>,
    stream: Mutex<Option<SendStream>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    level_bits: Arc<AtomicU32>,
    recording: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Create an idle capture session mirroring chunks into `backup`.
    #[must_use]
    pub fn new(backup: Arc<dyn AudioBackup>) -> Self {
        Self {
            backup,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            level_bits: Arc::new(AtomicU32::new(0)),
            recording: Arc::new(AtomicBool::new(false)),
        }
    }

    fn build_stream(&self) -> Result<SendStream, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceStartFailed("no input device available".into()))?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_owned());

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::DeviceStartFailed(e.to_string()))?;

        let device_sample_rate = supported.sample_rate().0;
        let device_channels = supported.channels();

        info!(
            device = %device_name,
            sample_rate = device_sample_rate,
            channels = device_channels,
            format = ?supported.sample_format(),
            "input device configured"
        );

        if supported.sample_format() != SampleFormat::F32 {
            return Err(CaptureError::FormatUnsupported(format!(
                "device delivers {:?}, expected f32",
                supported.sample_format()
            )));
        }
        if device_sample_rate == 0 || device_channels == 0 {
            return Err(CaptureError::FormatUnsupported(format!(
                "device reports {device_sample_rate} Hz, {device_channels} channels"
            )));
        }

        let converter = ChunkConverter::new(device_sample_rate, device_channels);
        let recording = Arc::clone(&self.recording);
        let buffer = Arc::clone(&self.buffer);
        let backup = Arc::clone(&self.backup);
        let level_bits = Arc::clone(&self.level_bits);

        let stream = device
            .build_input_stream(
                &supported.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !recording.load(Ordering::Relaxed) {
                        return;
                    }
                    let chunk = converter.convert(data);
                    deliver_chunk(&chunk, &buffer, backup.as_ref(), &level_bits);
                },
                move |err| {
                    warn!(error = %err, "audio stream error");
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::StreamConfigNotSupported => {
                    CaptureError::FormatUnsupported(e.to_string())
                }
                other => CaptureError::DeviceStartFailed(other.to_string()),
            })?;

        Ok(SendStream(stream))
    }
}

impl AudioInput for AudioCapture {
    fn start(&self) -> Result<(), CaptureError> {
        let Ok(mut guard) = self.stream.lock() else {
            return Err(CaptureError::DeviceStartFailed("stream lock poisoned".into()));
        };
        if guard.is_some() {
            debug!("capture already running");
            return Ok(());
        }

        let stream = self.build_stream()?;

        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.clear();
        }
        // Flag flips before the stream runs so no chunk is missed
        self.recording.store(true, Ordering::Relaxed);

        if let Err(e) = stream.0.play() {
            self.recording.store(false, Ordering::Relaxed);
            return Err(CaptureError::DeviceStartFailed(e.to_string()));
        }

        *guard = Some(stream);
        info!("recording started");
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn stop(&self) -> Vec<f32> {
        self.recording.store(false, Ordering::Relaxed);

        let active = self.stream.lock().ok().and_then(|mut guard| guard.take());
        let was_running = active.is_some();
        if let Some(stream) = active {
            if let Err(e) = stream.0.pause() {
                warn!(error = %e, "failed to pause input stream");
            }
            drop(stream);
        }

        let samples = self
            .buffer
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default();

        self.level_bits.store(0, Ordering::Relaxed);

        if was_running {
            let duration_s = samples.len() as f32 / CANONICAL_SAMPLE_RATE as f32;
            let max_amplitude = samples.iter().fold(0.0_f32, |max, s| max.max(s.abs()));
            info!(
                samples = samples.len(),
                duration_s,
                max_amplitude,
                "recording stopped"
            );
        } else {
            debug!("stop called while not recording");
        }

        samples
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}
