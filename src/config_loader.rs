use crate::backends::azure_tts;
use crate::error::Result;
use crate::registry::{EngineParams, TtsEngineId};
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_STT_API_VERSION: &str = "2024-06-01";
pub const DEFAULT_TTS_API_VERSION: &str = "2025-03-01-preview";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:10310";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    // STT
    pub stt_engine: String, // "vosk", "whisper" or "azure_openai_stt"
    pub stt_model_path: String,
    pub stt_language: String,
    pub stt_sample_rate: u32,
    pub whisper_model_path: String,
    // Pseudo-streaming for batch engines
    pub stream_threshold_bytes: usize,
    #[serde(default)]
    pub stream_overlap_bytes: Option<usize>, // None = engine default
    // TTS
    pub tts_engine: String, // "pyttsx3", "gtts", "azure_tts" or "azure_openai_tts"
    pub tts_language: String,
    pub tts_voice: String, // "" = engine default
    pub tts_speed: f32,
    pub espeak_binary: String,
    // Azure Speech
    pub azure_speech_key: String,
    pub azure_speech_region: String,
    // Azure OpenAI
    pub azure_openai_api_key: String,
    pub azure_openai_endpoint: String,
    pub azure_openai_stt_deployment: String,
    pub azure_openai_stt_api_version: String,
    pub azure_openai_tts_deployment: String,
    pub azure_openai_tts_model: String,
    pub azure_openai_tts_voice: String,
    pub azure_openai_tts_api_version: String,
    // Streaming transport
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stt_engine: "vosk".to_string(),
            stt_model_path: "models/vosk-model-small".to_string(),
            stt_language: "pt".to_string(),
            stt_sample_rate: DEFAULT_SAMPLE_RATE,
            whisper_model_path: "~/.cache/whisper/ggml-tiny.bin".to_string(),
            stream_threshold_bytes: crate::buffering::DEFAULT_THRESHOLD_BYTES,
            stream_overlap_bytes: None,
            tts_engine: "azure_tts".to_string(),
            tts_language: "pt-br".to_string(),
            tts_voice: String::new(),
            tts_speed: 1.0,
            espeak_binary: "espeak-ng".to_string(),
            azure_speech_key: String::new(),
            azure_speech_region: String::new(),
            azure_openai_api_key: String::new(),
            azure_openai_endpoint: String::new(),
            azure_openai_stt_deployment: "whisper".to_string(),
            azure_openai_stt_api_version: DEFAULT_STT_API_VERSION.to_string(),
            azure_openai_tts_deployment: "tts".to_string(),
            azure_openai_tts_model: "tts-1".to_string(),
            azure_openai_tts_voice: "nova".to_string(),
            azure_openai_tts_api_version: DEFAULT_TTS_API_VERSION.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// Per-request knobs layered over the loaded settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub language: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

impl Settings {
    /// `Speech.*` in the working directory, then
    /// `~/.config/speechd-hub/Speech.*`, then `SPEECH_*` variables.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let mut builder = defaults(Config::builder())?
            .add_source(File::with_name("Speech").required(false));
        if let Some(user_file) = user_config_file() {
            builder = builder.add_source(File::with_name(&user_file.to_string_lossy()).required(false));
        }
        finish(builder)
    }

    /// Like [`Settings::load`] but with one explicit, mandatory file.
    pub fn load_from(path: &Path) -> std::result::Result<Self, ConfigError> {
        let builder = defaults(Config::builder())?.add_source(File::from(path).required(true));
        finish(builder)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_speed(self.tts_speed)?;
        if self.stt_sample_rate == 0 {
            return Err(ConfigError::Message(
                "stt_sample_rate must be greater than 0".to_string(),
            ));
        }
        if self.stream_threshold_bytes == 0 {
            return Err(ConfigError::Message(
                "stream_threshold_bytes must be greater than 0".to_string(),
            ));
        }
        if let Some(overlap) = self.stream_overlap_bytes {
            if overlap >= self.stream_threshold_bytes {
                return Err(ConfigError::Message(format!(
                    "stream_overlap_bytes ({}) must be smaller than stream_threshold_bytes ({})",
                    overlap, self.stream_threshold_bytes
                )));
            }
        }
        Ok(())
    }

    /// Everything the selected STT engine may need, with request overrides
    /// applied. Blank credentials are left out so the registry can report
    /// them as missing.
    pub fn stt_params(&self, overrides: &RequestOverrides) -> EngineParams {
        let language = overrides
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.stt_language.clone());

        let mut params = EngineParams::new()
            .with("stt_language", language)
            .with("stt_model_path", &self.stt_model_path)
            .with("stt_sample_rate", self.stt_sample_rate.to_string())
            .with("whisper_model_path", &self.whisper_model_path)
            .with("stream_threshold_bytes", self.stream_threshold_bytes.to_string())
            .with("azure_openai_api_key", &self.azure_openai_api_key)
            .with("azure_openai_endpoint", &self.azure_openai_endpoint)
            .with("azure_openai_stt_deployment", &self.azure_openai_stt_deployment)
            .with("azure_openai_stt_api_version", &self.azure_openai_stt_api_version);
        if let Some(overlap) = self.stream_overlap_bytes {
            params.set("stream_overlap_bytes", overlap.to_string());
        }
        params
    }

    /// TTS parameters for the configured engine. The voice is always
    /// filled in: request, then settings, then the engine's default.
    pub fn tts_params(&self, overrides: &RequestOverrides) -> Result<EngineParams> {
        let engine: TtsEngineId = self.tts_engine.parse()?;
        let language = overrides
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.tts_language.clone());
        let speed = match overrides.speed {
            Some(speed) => {
                validate_speed(speed)?;
                speed
            }
            None => self.tts_speed,
        };
        let voice = [overrides.voice.as_deref(), Some(self.tts_voice.as_str())]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_voice(engine, &language));

        Ok(EngineParams::new()
            .with("tts_language", language)
            .with("tts_voice", voice)
            .with("tts_speed", speed.to_string())
            .with("espeak_binary", &self.espeak_binary)
            .with("azure_speech_key", &self.azure_speech_key)
            .with("azure_speech_region", &self.azure_speech_region)
            .with("azure_openai_api_key", &self.azure_openai_api_key)
            .with("azure_openai_endpoint", &self.azure_openai_endpoint)
            .with("azure_openai_tts_deployment", &self.azure_openai_tts_deployment)
            .with("azure_openai_tts_model", &self.azure_openai_tts_model)
            .with("azure_openai_tts_api_version", &self.azure_openai_tts_api_version))
    }

    fn default_voice(&self, engine: TtsEngineId, language: &str) -> String {
        match engine {
            TtsEngineId::AzureTts => azure_tts::DEFAULT_VOICE.to_string(),
            TtsEngineId::AzureOpenAiTts => self.azure_openai_tts_voice.clone(),
            TtsEngineId::Gtts => format!("{}-normal", language.to_lowercase()),
            // espeak voice ids are language codes
            TtsEngineId::Pyttsx3 => language.to_lowercase(),
        }
    }
}

fn defaults(
    builder: ConfigBuilder<config::builder::DefaultState>,
) -> std::result::Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let d = Settings::default();
    builder
        .set_default("stt_engine", d.stt_engine)?
        .set_default("stt_model_path", d.stt_model_path)?
        .set_default("stt_language", d.stt_language)?
        .set_default("stt_sample_rate", d.stt_sample_rate as i64)?
        .set_default("whisper_model_path", d.whisper_model_path)?
        .set_default("stream_threshold_bytes", d.stream_threshold_bytes as i64)?
        .set_default("tts_engine", d.tts_engine)?
        .set_default("tts_language", d.tts_language)?
        .set_default("tts_voice", d.tts_voice)?
        .set_default("tts_speed", d.tts_speed as f64)?
        .set_default("espeak_binary", d.espeak_binary)?
        .set_default("azure_speech_key", d.azure_speech_key)?
        .set_default("azure_speech_region", d.azure_speech_region)?
        .set_default("azure_openai_api_key", d.azure_openai_api_key)?
        .set_default("azure_openai_endpoint", d.azure_openai_endpoint)?
        .set_default("azure_openai_stt_deployment", d.azure_openai_stt_deployment)?
        .set_default("azure_openai_stt_api_version", d.azure_openai_stt_api_version)?
        .set_default("azure_openai_tts_deployment", d.azure_openai_tts_deployment)?
        .set_default("azure_openai_tts_model", d.azure_openai_tts_model)?
        .set_default("azure_openai_tts_voice", d.azure_openai_tts_voice)?
        .set_default("azure_openai_tts_api_version", d.azure_openai_tts_api_version)?
        .set_default("listen_addr", d.listen_addr)
}

fn finish(
    builder: ConfigBuilder<config::builder::DefaultState>,
) -> std::result::Result<Settings, ConfigError> {
    // e.g. SPEECH_TTS_ENGINE=gtts
    let settings: Settings = builder
        .add_source(Environment::with_prefix("SPEECH"))
        .build()?
        .try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

fn validate_speed(speed: f32) -> std::result::Result<(), ConfigError> {
    if speed > 0.0 && speed <= 4.0 {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "Invalid tts_speed: {}. Must be in (0, 4]",
            speed
        )))
    }
}

fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("speechd-hub").join("Speech"))
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
