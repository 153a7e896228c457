use std::fmt;
use thiserror::Error;

/// Which capability an engine identifier was resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Stt,
    Tts,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Stt => f.write_str("STT"),
            EngineKind::Tts => f.write_str("TTS"),
        }
    }
}

/// Every failure the engines, registry and sessions can report.
///
/// Resolution errors (`UnsupportedEngine`, `MissingCredentials`,
/// `EngineUnavailable`) are fatal to the request that triggered them.
/// `StreamingChunk` is only ever logged and counted by a session.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("{kind} engine '{id}' is not supported")]
    UnsupportedEngine { kind: EngineKind, id: String },

    #[error("engine '{engine}' is missing required configuration: {}", .fields.join(", "))]
    MissingCredentials {
        engine: &'static str,
        fields: Vec<&'static str>,
    },

    #[error("engine '{engine}' is unavailable: {reason}")]
    EngineUnavailable { engine: &'static str, reason: String },

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("streaming chunk rejected: {0}")]
    StreamingChunk(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    pub fn unavailable(engine: &'static str, reason: impl Into<String>) -> Self {
        SpeechError::EngineUnavailable {
            engine,
            reason: reason.into(),
        }
    }

    /// True for errors raised while resolving or constructing an engine.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SpeechError::UnsupportedEngine { .. }
                | SpeechError::MissingCredentials { .. }
                | SpeechError::EngineUnavailable { .. }
                | SpeechError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;
