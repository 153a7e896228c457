//! Azure OpenAI transcription deployment (Whisper hosted in Azure).
//!
//! Batch-only: streaming goes through [`crate::buffering::Buffered`].
//! Streams carry bare PCM16 mono, which the service rejects, so anything
//! without a RIFF header is wrapped before upload.

use super::{BatchTranscriber, DebugInfo};
use crate::config_loader::DEFAULT_SAMPLE_RATE;
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use std::io::Cursor;

const ENGINE: &str = "azure_openai_stt";

pub struct AzureOpenAiSttBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    deployment: String,
    api_version: String,
    sample_rate: u32,
}

impl AzureOpenAiSttBackend {
    pub fn new(api_key: &str, endpoint: &str, deployment: &str, api_version: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment: deployment.to_string(),
            api_version: api_version.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Rate assumed for raw PCM input.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/audio/transcriptions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl BatchTranscriber for AzureOpenAiSttBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String> {
        let file_part = reqwest::multipart::Part::bytes(as_wav(audio, self.sample_rate)?)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Transcription(format!("MIME error: {}", e)))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.deployment.clone())
            .text("response_format", "json");
        if let Some(lang) = language.filter(|l| !l.is_empty()) {
            form = form.text("language", lang.to_string());
        }

        let resp = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                SpeechError::Transcription(format!("Azure OpenAI request failed: {}", e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Transcription(format!(
                "Azure OpenAI returned {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            SpeechError::Transcription(format!("Azure OpenAI response parse error: {}", e))
        })?;

        Ok(body["text"].as_str().unwrap_or_default().to_string())
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::from([
            ("service_type", "Azure OpenAI STT".to_string()),
            ("model", self.deployment.clone()),
            ("endpoint", self.endpoint.clone()),
            ("api_version", self.api_version.clone()),
            ("sample_rate", self.sample_rate.to_string()),
        ])
    }
}

fn as_wav(audio: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    if audio.starts_with(b"RIFF") {
        return Ok(audio.to_vec());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| SpeechError::Transcription(format!("WAV encode error: {}", e));

    let mut cursor = Cursor::new(Vec::with_capacity(audio.len() + 44));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    // a trailing odd byte is half a sample and is dropped
    for sample in audio.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}
