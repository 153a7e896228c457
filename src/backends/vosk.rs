//! Offline incremental recognition with Vosk (Kaldi).
//!
//! Unlike the batch engines, Vosk reports a partial hypothesis on every
//! chunk and commits text at the utterance boundaries it detects itself.

use super::{Capabilities, DebugInfo, Fragment, SpeechToText};
use crate::config_loader::expand_home;
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use vosk::{DecodingState, Model, Recognizer};

const ENGINE: &str = "vosk";

pub struct VoskBackend {
    model: Arc<Model>,
    model_path: PathBuf,
    sample_rate: u32,
    recognizer: Option<Arc<Mutex<Recognizer>>>,
    /// Odd trailing byte of the previous chunk, completed by the next one.
    carry: Option<u8>,
}

impl VoskBackend {
    pub fn new(model_path: &str, sample_rate: u32) -> Result<Self> {
        let model_path = expand_home(model_path);
        if !model_path.is_dir() {
            return Err(SpeechError::unavailable(
                ENGINE,
                format!("model directory not found at {}", model_path.display()),
            ));
        }

        vosk::set_log_level(vosk::LogLevel::Error);
        let model = Model::new(model_path.to_string_lossy()).ok_or_else(|| {
            SpeechError::unavailable(
                ENGINE,
                format!("failed to load model from {}", model_path.display()),
            )
        })?;
        log::info!("vosk: model loaded from {}", model_path.display());

        Ok(Self {
            model: Arc::new(model),
            model_path,
            sample_rate,
            recognizer: None,
            carry: None,
        })
    }

    fn new_recognizer(model: &Model, sample_rate: u32) -> Result<Recognizer> {
        Recognizer::new(model, sample_rate as f32).ok_or_else(|| {
            SpeechError::Transcription(format!("cannot create recognizer at {} Hz", sample_rate))
        })
    }

    /// Reassembles 16-bit samples across chunk boundaries.
    fn samples(&mut self, chunk: &[u8]) -> Vec<i16> {
        let mut bytes = Vec::with_capacity(chunk.len() + 1);
        bytes.extend(self.carry.take());
        bytes.extend_from_slice(chunk);
        if bytes.len() % 2 == 1 {
            self.carry = bytes.pop();
        }
        pcm_samples(&bytes)
    }
}

fn pcm_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Strips a WAV container if present; bare bytes are taken as PCM16 LE.
fn recording_samples(audio: &[u8], expected_rate: u32) -> Result<Vec<i16>> {
    if !audio.starts_with(b"RIFF") {
        return Ok(pcm_samples(audio));
    }
    let reader = hound::WavReader::new(Cursor::new(audio))
        .map_err(|e| SpeechError::Transcription(format!("invalid WAV: {}", e)))?;
    if reader.spec().sample_rate != expected_rate {
        log::warn!(
            "vosk: recording is {} Hz but the recognizer expects {} Hz, accuracy may suffer",
            reader.spec().sample_rate,
            expected_rate
        );
    }
    reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SpeechError::Transcription(format!("unreadable WAV samples: {}", e)))
}

fn final_text(recognizer: &mut Recognizer) -> String {
    recognizer
        .final_result()
        .single()
        .map(|r| r.text.trim().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl SpeechToText for VoskBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn transcribe(&self, audio: &[u8], _language: Option<&str>) -> Result<String> {
        // The model is single-language; the hint is not used.
        let samples = recording_samples(audio, self.sample_rate)?;
        let model = Arc::clone(&self.model);
        let rate = self.sample_rate;

        tokio::task::spawn_blocking(move || {
            let mut recognizer = Self::new_recognizer(&model, rate)?;
            recognizer
                .accept_waveform(&samples)
                .map_err(|e| SpeechError::Transcription(format!("{:?}", e)))?;
            Ok(final_text(&mut recognizer))
        })
        .await
        .map_err(|e| SpeechError::Transcription(format!("vosk task failed: {}", e)))?
    }

    async fn start_stream(&mut self) -> Result<()> {
        let recognizer = Self::new_recognizer(&self.model, self.sample_rate)?;
        self.recognizer = Some(Arc::new(Mutex::new(recognizer)));
        self.carry = None;
        Ok(())
    }

    async fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>> {
        let recognizer = self
            .recognizer
            .clone()
            .ok_or_else(|| SpeechError::StreamingChunk("vosk: stream not started".into()))?;
        let samples = self.samples(chunk);
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        tokio::task::spawn_blocking(move || {
            let mut recognizer = recognizer
                .lock()
                .map_err(|_| SpeechError::StreamingChunk("vosk recognizer poisoned".into()))?;
            let state = recognizer
                .accept_waveform(&samples)
                .map_err(|e| SpeechError::StreamingChunk(format!("{:?}", e)))?;

            let fragment = match state {
                DecodingState::Finalized => recognizer
                    .result()
                    .single()
                    .map(|r| r.text.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .map(Fragment::committed),
                DecodingState::Running => {
                    let partial = recognizer.partial_result().partial.trim().to_string();
                    (!partial.is_empty()).then(|| Fragment::partial(partial))
                }
                DecodingState::Failed => {
                    return Err(SpeechError::StreamingChunk("vosk decoding failed".into()))
                }
            };
            Ok(fragment.into_iter().collect())
        })
        .await
        .map_err(|e| SpeechError::StreamingChunk(format!("vosk task failed: {}", e)))?
    }

    async fn end_stream(&mut self) -> Result<String> {
        self.carry = None;
        let Some(recognizer) = self.recognizer.take() else {
            return Ok(String::new());
        };

        tokio::task::spawn_blocking(move || {
            recognizer
                .lock()
                .map(|mut r| final_text(&mut r))
                .map_err(|_| SpeechError::Transcription("vosk recognizer poisoned".into()))
        })
        .await
        .map_err(|e| SpeechError::Transcription(format!("vosk task failed: {}", e)))?
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            debug_info: true,
            set_speed: false,
        }
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::from([
            ("service_type", "Vosk (local)".to_string()),
            ("model", self.model_path.display().to_string()),
            ("sample_rate", self.sample_rate.to_string()),
            ("streaming", self.recognizer.is_some().to_string()),
        ])
    }
}
