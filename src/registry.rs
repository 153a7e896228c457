//! Maps engine identifiers to concrete engines.
//!
//! Resolution checks run cheapest first: an unknown identifier is rejected
//! without touching anything, missing credentials are reported before any
//! client is built, and only then are local models or binaries probed.

use crate::backends::azure_openai_stt::AzureOpenAiSttBackend;
use crate::backends::azure_openai_tts::AzureOpenAiTtsBackend;
use crate::backends::azure_tts::AzureTtsBackend;
use crate::backends::espeak::EspeakBackend;
use crate::backends::gtts::GttsBackend;
use crate::backends::{apply_voice_settings, SpeechToText, TextToSpeech};
use crate::buffering::{BufferPolicy, Buffered, DEFAULT_THRESHOLD_BYTES};
use crate::config_loader::{DEFAULT_SAMPLE_RATE, DEFAULT_STT_API_VERSION, DEFAULT_TTS_API_VERSION};
use crate::error::{EngineKind, Result, SpeechError};
use config::ConfigError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SttEngineId {
    Vosk,
    Whisper,
    AzureOpenAiStt,
}

impl SttEngineId {
    pub const ALL: [SttEngineId; 3] = [Self::Vosk, Self::Whisper, Self::AzureOpenAiStt];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vosk => "vosk",
            Self::Whisper => "whisper",
            Self::AzureOpenAiStt => "azure_openai_stt",
        }
    }

    /// Bytes kept between streaming cycles when nothing is configured.
    pub fn default_overlap(&self) -> usize {
        match self {
            Self::Whisper => DEFAULT_THRESHOLD_BYTES / 2,
            Self::Vosk | Self::AzureOpenAiStt => 0,
        }
    }
}

impl FromStr for SttEngineId {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vosk" => Ok(Self::Vosk),
            "whisper" => Ok(Self::Whisper),
            "azure_openai_stt" | "azure_openai" => Ok(Self::AzureOpenAiStt),
            _ => Err(SpeechError::UnsupportedEngine {
                kind: EngineKind::Stt,
                id: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SttEngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtsEngineId {
    Pyttsx3,
    Gtts,
    AzureTts,
    AzureOpenAiTts,
}

impl TtsEngineId {
    pub const ALL: [TtsEngineId; 4] = [
        Self::Pyttsx3,
        Self::Gtts,
        Self::AzureTts,
        Self::AzureOpenAiTts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pyttsx3 => "pyttsx3",
            Self::Gtts => "gtts",
            Self::AzureTts => "azure_tts",
            Self::AzureOpenAiTts => "azure_openai_tts",
        }
    }
}

impl FromStr for TtsEngineId {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pyttsx3" | "espeak" => Ok(Self::Pyttsx3),
            "gtts" => Ok(Self::Gtts),
            "azure_tts" | "azure" => Ok(Self::AzureTts),
            "azure_openai_tts" | "azure_openai" => Ok(Self::AzureOpenAiTts),
            _ => Err(SpeechError::UnsupportedEngine {
                kind: EngineKind::Tts,
                id: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for TtsEngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named engine parameters, keyed like the configuration file.
/// Blank values are never stored, so "absent" and "empty" are the same.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineParams(BTreeMap<String, String>);

impl EngineParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.trim().is_empty() {
            self.0.remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a value, falling back to `default` when it is absent.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                SpeechError::Config(ConfigError::Message(format!(
                    "invalid value for {}: '{}'",
                    key, raw
                )))
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Every key in `fields` that has no value.
    fn missing(&self, fields: &[&'static str]) -> Vec<&'static str> {
        fields
            .iter()
            .copied()
            .filter(|f| self.get(f).is_none())
            .collect()
    }

    fn require(&self, engine: &'static str, fields: &[&'static str]) -> Result<()> {
        let missing = self.missing(fields);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SpeechError::MissingCredentials {
                engine,
                fields: missing,
            })
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EngineParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// A resolved engine of either kind.
pub enum Engine {
    Stt(Box<dyn SpeechToText>),
    Tts(Box<dyn TextToSpeech>),
}

impl Engine {
    pub fn id(&self) -> &'static str {
        match self {
            Engine::Stt(e) => e.id(),
            Engine::Tts(e) => e.id(),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Stt(_) => EngineKind::Stt,
            Engine::Tts(_) => EngineKind::Tts,
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Engine::{:?}({})", self.kind(), self.id())
    }
}

pub fn resolve(kind: EngineKind, id: &str, params: &EngineParams) -> Result<Engine> {
    match kind {
        EngineKind::Stt => resolve_stt(id, params).map(Engine::Stt),
        EngineKind::Tts => resolve_tts(id, params).map(Engine::Tts),
    }
}

/// Build a fresh STT engine. Batch engines come back already wrapped in
/// their streaming buffer.
pub fn resolve_stt(id: &str, params: &EngineParams) -> Result<Box<dyn SpeechToText>> {
    let engine: SttEngineId = id.parse()?;
    log::debug!("resolving STT engine {}", engine);

    match engine {
        SttEngineId::AzureOpenAiStt => {
            const ENGINE: &str = "azure_openai_stt";
            params.require(ENGINE, &["azure_openai_api_key", "azure_openai_endpoint"])?;
            let backend = AzureOpenAiSttBackend::new(
                params.get_or("azure_openai_api_key", ""),
                params.get_or("azure_openai_endpoint", ""),
                params.get_or("azure_openai_stt_deployment", "whisper"),
                params.get_or("azure_openai_stt_api_version", DEFAULT_STT_API_VERSION),
            )
            .with_sample_rate(params.parse_or("stt_sample_rate", DEFAULT_SAMPLE_RATE)?);
            let policy = buffer_policy(engine, params)?;
            Ok(Box::new(
                Buffered::new(backend, policy).with_language(params.get_or("stt_language", "")),
            ))
        }
        SttEngineId::Whisper => build_whisper(engine, params),
        SttEngineId::Vosk => build_vosk(params),
    }
}

fn buffer_policy(engine: SttEngineId, params: &EngineParams) -> Result<BufferPolicy> {
    let threshold = params.parse_or("stream_threshold_bytes", DEFAULT_THRESHOLD_BYTES)?;
    let overlap = params.parse_or("stream_overlap_bytes", engine.default_overlap())?;
    Ok(BufferPolicy::overlap(threshold, overlap))
}

#[cfg(feature = "whisper")]
fn build_whisper(engine: SttEngineId, params: &EngineParams) -> Result<Box<dyn SpeechToText>> {
    use crate::backends::whisper::WhisperBackend;

    let language = params.get_or("stt_language", "");
    let backend = WhisperBackend::new(
        params.get_or("whisper_model_path", "~/.cache/whisper/ggml-tiny.bin"),
        language,
        params.parse_or("stt_sample_rate", DEFAULT_SAMPLE_RATE)?,
    )?;
    let policy = buffer_policy(engine, params)?;
    Ok(Box::new(Buffered::new(backend, policy).with_language(language)))
}

#[cfg(not(feature = "whisper"))]
fn build_whisper(engine: SttEngineId, params: &EngineParams) -> Result<Box<dyn SpeechToText>> {
    buffer_policy(engine, params)?;
    Err(SpeechError::unavailable(
        "whisper",
        "not installed (built without the `whisper` feature)",
    ))
}

#[cfg(feature = "vosk")]
fn build_vosk(params: &EngineParams) -> Result<Box<dyn SpeechToText>> {
    use crate::backends::vosk::VoskBackend;

    let backend = VoskBackend::new(
        params.get_or("stt_model_path", "models/vosk-model-small"),
        params.parse_or("stt_sample_rate", DEFAULT_SAMPLE_RATE)?,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "vosk"))]
fn build_vosk(params: &EngineParams) -> Result<Box<dyn SpeechToText>> {
    params.parse_or("stt_sample_rate", DEFAULT_SAMPLE_RATE)?;
    Err(SpeechError::unavailable(
        "vosk",
        "not installed (built without the `vosk` feature)",
    ))
}

/// Build a fresh TTS engine with `tts_voice` and `tts_speed` applied.
pub fn resolve_tts(id: &str, params: &EngineParams) -> Result<Box<dyn TextToSpeech>> {
    let engine: TtsEngineId = id.parse()?;
    log::debug!("resolving TTS engine {}", engine);

    let language = params.get_or("tts_language", "pt-br");
    let speed: f32 = params.parse_or("tts_speed", 1.0)?;

    let mut tts: Box<dyn TextToSpeech> = match engine {
        TtsEngineId::AzureTts => {
            params.require("azure_tts", &["azure_speech_key", "azure_speech_region"])?;
            Box::new(AzureTtsBackend::new(
                params.get_or("azure_speech_key", ""),
                params.get_or("azure_speech_region", ""),
                language,
            ))
        }
        TtsEngineId::AzureOpenAiTts => {
            params.require(
                "azure_openai_tts",
                &["azure_openai_api_key", "azure_openai_endpoint"],
            )?;
            Box::new(
                AzureOpenAiTtsBackend::new(
                    params.get_or("azure_openai_api_key", ""),
                    params.get_or("azure_openai_endpoint", ""),
                )
                .with_deployment(params.get_or("azure_openai_tts_deployment", "tts"))
                .with_model(params.get_or("azure_openai_tts_model", "tts-1"))
                .with_api_version(
                    params.get_or("azure_openai_tts_api_version", DEFAULT_TTS_API_VERSION),
                )
                .with_language(language),
            )
        }
        TtsEngineId::Gtts => Box::new(GttsBackend::new(language)),
        TtsEngineId::Pyttsx3 => Box::new(EspeakBackend::new(
            params.get_or("espeak_binary", "espeak-ng"),
            language,
        )?),
    };

    apply_voice_settings(tts.as_mut(), params.get_or("tts_voice", ""), speed);
    log::info!(
        "TTS engine {} ready (voice '{}')",
        tts.id(),
        tts.current_voice()
    );
    Ok(tts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_engine_is_unsupported() {
        let err = resolve(EngineKind::Stt, "unknown_engine", &EngineParams::new()).unwrap_err();
        assert!(matches!(
            &err,
            SpeechError::UnsupportedEngine { kind: EngineKind::Stt, id } if id == "unknown_engine"
        ));

        let err = resolve(EngineKind::Tts, "festival", &EngineParams::new()).unwrap_err();
        assert!(matches!(err, SpeechError::UnsupportedEngine { kind: EngineKind::Tts, .. }));
    }

    #[test]
    fn test_identifiers_and_aliases() {
        for id in SttEngineId::ALL {
            assert_eq!(id.as_str().parse::<SttEngineId>().unwrap(), id);
        }
        for id in TtsEngineId::ALL {
            assert_eq!(id.to_string().parse::<TtsEngineId>().unwrap(), id);
        }
        assert_eq!("azure_openai".parse::<SttEngineId>().unwrap(), SttEngineId::AzureOpenAiStt);
        assert_eq!("azure".parse::<TtsEngineId>().unwrap(), TtsEngineId::AzureTts);
        assert_eq!("ESPEAK".parse::<TtsEngineId>().unwrap(), TtsEngineId::Pyttsx3);
        assert_eq!(
            "azure_openai".parse::<TtsEngineId>().unwrap(),
            TtsEngineId::AzureOpenAiTts
        );
    }

    #[test]
    fn test_missing_credentials_names_every_field() {
        let err = resolve_tts("azure_tts", &EngineParams::new()).err().unwrap();
        match err {
            SpeechError::MissingCredentials { engine, fields } => {
                assert_eq!(engine, "azure_tts");
                assert_eq!(fields, vec!["azure_speech_key", "azure_speech_region"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let params = EngineParams::new().with("azure_openai_endpoint", "https://x");
        let err = resolve_stt("azure_openai_stt", &params).err().unwrap();
        assert!(matches!(
            err,
            SpeechError::MissingCredentials { ref fields, .. } if fields == &vec!["azure_openai_api_key"]
        ));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let params: EngineParams = [("azure_speech_key", "  "), ("azure_speech_region", "eastus")]
            .into_iter()
            .collect();
        assert_eq!(params.get("azure_speech_key"), None);
        let err = resolve_tts("azure", &params).err().unwrap();
        assert!(matches!(
            err,
            SpeechError::MissingCredentials { ref fields, .. } if fields == &vec!["azure_speech_key"]
        ));
    }

    #[test]
    fn test_cloud_engines_resolve_with_settings() {
        let params = EngineParams::new()
            .with("azure_speech_key", "k")
            .with("azure_speech_region", "brazilsouth")
            .with("tts_voice", "pt-BR-AntonioNeural")
            .with("tts_speed", "1.2");
        let tts = resolve_tts("azure_tts", &params).unwrap();
        assert_eq!(tts.current_voice(), "pt-BR-AntonioNeural");
        assert_eq!(tts.debug_info()["speed"], "1.2");

        let tts = resolve_tts("gtts", &EngineParams::new().with("tts_voice", "xx")).unwrap();
        assert_eq!(tts.current_voice(), "pt-br-normal");
    }

    #[test]
    fn test_cloud_stt_gets_buffer_policy() {
        let params = EngineParams::new()
            .with("azure_openai_api_key", "k")
            .with("azure_openai_endpoint", "https://x.openai.azure.com")
            .with("stream_threshold_bytes", "64000");
        let stt = resolve_stt("azure_openai_stt", &params).unwrap();
        let info = stt.debug_info();
        assert_eq!(info["stream_threshold"], "64000");
        assert_eq!(info["stream_overlap"], "0");
        assert_eq!(info["audio_buffer_size"], "0");
    }

    #[test]
    fn test_bad_numeric_param_is_config_error() {
        let params = EngineParams::new()
            .with("azure_openai_api_key", "k")
            .with("azure_openai_endpoint", "https://x")
            .with("stream_threshold_bytes", "lots");
        assert!(matches!(
            resolve_stt("azure_openai_stt", &params).err().unwrap(),
            SpeechError::Config(_)
        ));
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn test_whisper_without_feature_is_unavailable() {
        let err = resolve_stt("whisper", &EngineParams::new()).err().unwrap();
        assert!(matches!(err, SpeechError::EngineUnavailable { engine: "whisper", .. }));
    }

    #[cfg(not(feature = "vosk"))]
    #[test]
    fn test_vosk_without_feature_is_unavailable() {
        let err = resolve(EngineKind::Stt, "vosk", &EngineParams::new()).unwrap_err();
        assert!(matches!(err, SpeechError::EngineUnavailable { engine: "vosk", .. }));
    }

    #[test]
    fn test_missing_espeak_binary_is_unavailable() {
        let params = EngineParams::new().with("espeak_binary", "/nonexistent/espeak-ng");
        let err = resolve_tts("pyttsx3", &params).err().unwrap();
        assert!(matches!(err, SpeechError::EngineUnavailable { engine: "pyttsx3", .. }));
    }
}
