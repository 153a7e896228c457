//! Local Whisper transcription through whisper.cpp (whisper-rs bindings).
//!
//! Whisper only works on complete utterances, so it is a batch engine;
//! streaming goes through [`crate::buffering::Buffered`] with an overlapping
//! window.

use super::{BatchTranscriber, DebugInfo};
use crate::config_loader::expand_home;
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

const ENGINE: &str = "whisper";
const WHISPER_RATE: u32 = 16_000;

pub struct WhisperBackend {
    ctx: Arc<Mutex<WhisperContext>>,
    model_path: PathBuf,
    language: String,
    /// Rate assumed for raw PCM input without a WAV header.
    sample_rate: u32,
}

impl WhisperBackend {
    /// Loads the ggml model eagerly so a bad path fails at resolution time.
    pub fn new(model_path: &str, language: &str, sample_rate: u32) -> Result<Self> {
        let model_path = expand_home(model_path);
        if !model_path.is_file() {
            return Err(SpeechError::unavailable(
                ENGINE,
                format!("model not found at {}", model_path.display()),
            ));
        }

        log::info!("whisper: loading model from {}", model_path.display());
        let path_str = model_path.to_string_lossy().into_owned();
        let ctx = WhisperContext::new_with_params(&path_str, WhisperContextParameters::default())
            .map_err(|e| SpeechError::unavailable(ENGINE, format!("failed to load model: {:?}", e)))?;

        Ok(Self {
            ctx: Arc::new(Mutex::new(ctx)),
            model_path,
            language: language.to_string(),
            sample_rate,
        })
    }
}

#[async_trait]
impl BatchTranscriber for WhisperBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String> {
        let samples = decode_audio(audio, self.sample_rate)?;
        if samples.is_empty() {
            return Ok(String::new());
        }

        let ctx = Arc::clone(&self.ctx);
        let language = language
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.language)
            .to_string();

        tokio::task::spawn_blocking(move || run_inference(&ctx, &samples, &language))
            .await
            .map_err(|e| SpeechError::Transcription(format!("whisper task failed: {}", e)))?
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::from([
            ("service_type", "Whisper (local)".to_string()),
            ("model", self.model_path.display().to_string()),
            ("language", self.language.clone()),
            ("sample_rate", self.sample_rate.to_string()),
        ])
    }
}

fn run_inference(ctx: &Mutex<WhisperContext>, samples: &[f32], language: &str) -> Result<String> {
    let start = std::time::Instant::now();
    let ctx = ctx
        .lock()
        .map_err(|_| SpeechError::Transcription("whisper context lock poisoned".into()))?;
    let mut state = ctx
        .create_state()
        .map_err(|e| SpeechError::Transcription(format!("failed to create state: {:?}", e)))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    // Whisper wants the bare family code ("pt", not "pt-BR"); "auto" detects.
    let family = language.split(['-', '_']).next().unwrap_or_default();
    if !family.is_empty() && family != "auto" {
        params.set_language(Some(family));
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_single_segment(true);

    state
        .full(params, samples)
        .map_err(|e| SpeechError::Transcription(format!("inference failed: {:?}", e)))?;

    let mut text = String::new();
    for segment in state.as_iter() {
        if let Ok(segment_text) = segment.to_str() {
            text.push_str(segment_text);
            text.push(' ');
        }
    }

    let text = text.trim().to_string();
    log::debug!("whisper: '{}' in {:?}", text, start.elapsed());
    Ok(text)
}

/// Accepts either a RIFF/WAV recording or bare 16-bit LE mono PCM at
/// `raw_rate`, and returns mono f32 samples at 16 kHz.
fn decode_audio(audio: &[u8], raw_rate: u32) -> Result<Vec<f32>> {
    let (samples, rate) = if audio.starts_with(b"RIFF") {
        read_wav(audio)?
    } else {
        let samples = audio
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect();
        (samples, raw_rate)
    };

    if rate != WHISPER_RATE {
        Ok(resample(&samples, rate, WHISPER_RATE))
    } else {
        Ok(samples)
    }
}

fn read_wav(audio: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(audio))
        .map_err(|e| SpeechError::Transcription(format!("invalid WAV: {}", e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample)?;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };
    Ok((mono, spec.sample_rate))
}

/// Linear interpolation resampling.
fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == 0 || input.is_empty() {
        return Vec::new();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;

    (0..output_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src as usize;
            let frac = (src - idx as f64) as f32;
            match (input.get(idx), input.get(idx + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                (Some(a), None) => *a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Full-scale value for signed integer samples of the given width.
fn int_scale(bits_per_sample: u16) -> Result<f32> {
    match bits_per_sample.checked_sub(1) {
        Some(shift) if shift < 32 => Ok((1u64 << shift) as f32),
        _ => Err(SpeechError::Transcription(format!(
            "unsupported WAV sample width: {} bits",
            bits_per_sample
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_resample_doubles_length() {
        let output = resample(&[1.0, 2.0, 3.0, 4.0], 8000, 16000);
        assert_eq!(output.len(), 8);
        assert_eq!(output[0], 1.0);
        assert!((output[1] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_raw_pcm_is_scaled() {
        let mut raw = Vec::new();
        for s in [0i16, i16::MAX, i16::MIN + 1] {
            raw.extend_from_slice(&s.to_le_bytes());
        }
        let samples = decode_audio(&raw, 16_000).unwrap();
        assert_eq!(samples, vec![0.0, 1.0, -1.0]);
    }

    #[test]
    fn test_stereo_wav_is_downmixed() {
        let wav = wav_bytes(16_000, 2, &[100, 300, -200, 200]);
        let samples = decode_audio(&wav, 8_000).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 200.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[1], 0.0);
    }

    #[test]
    fn test_bad_sample_width_is_rejected() {
        assert_eq!(int_scale(16).unwrap(), 32_768.0);
        assert_eq!(int_scale(8).unwrap(), 128.0);
        assert!(matches!(int_scale(0), Err(SpeechError::Transcription(_))));
        assert!(matches!(int_scale(40), Err(SpeechError::Transcription(_))));
    }

    #[test]
    fn test_missing_model_is_unavailable() {
        let err = WhisperBackend::new("/nonexistent/ggml-tiny.bin", "pt", 16_000)
            .err()
            .unwrap();
        assert!(matches!(err, SpeechError::EngineUnavailable { engine: "whisper", .. }));
    }
}
