pub mod azure_openai_stt;
pub mod azure_openai_tts;
pub mod azure_tts;
pub mod espeak;
pub mod gtts;
#[cfg(feature = "vosk")]
pub mod vosk;
#[cfg(feature = "whisper")]
pub mod whisper;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Key/value snapshot of an engine's identity and state, for observability.
pub type DebugInfo = BTreeMap<&'static str, String>;

/// Represents a text-to-speech voice
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: String,
}

impl Voice {
    pub fn new(id: &str, name: &str, language: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            language: language.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    /// In-progress hypothesis; replaces the previous partial.
    Partial,
    /// Stable text from one recognition cycle.
    Committed,
    /// Terminal text flushed when the stream ends.
    Final,
}

/// A unit of text produced while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub text: String,
}

impl Fragment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Partial,
            text: text.into(),
        }
    }

    pub fn committed(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Committed,
            text: text.into(),
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Final,
            text: text.into(),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.kind == FragmentKind::Partial
    }
}

/// Optional operations an engine supports. Callers probe this before
/// relying on `debug_info` or `set_speed` doing anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub debug_info: bool,
    pub set_speed: bool,
}

/// Contract every speech-to-text engine satisfies, streaming or not.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "vosk")
    fn id(&self) -> &'static str;

    /// Transcribe one complete, self-contained recording.
    /// Silence yields an empty string.
    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String>;

    /// Reset streaming state. Must be called before `process_chunk`.
    async fn start_stream(&mut self) -> Result<()>;

    /// Feed one chunk; returns the fragments it produced, possibly none.
    async fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>>;

    /// Flush whatever is buffered and return the last transcript segment.
    async fn end_stream(&mut self) -> Result<String>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::new()
    }
}

/// Engines that can only transcribe a whole buffer. They get streaming
/// through [`crate::buffering::Buffered`].
#[async_trait]
pub trait BatchTranscriber: Send + Sync {
    fn id(&self) -> &'static str;

    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String>;

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::new()
    }
}

/// Trait that all speech synthesis backends must implement.
/// This allows us to plug in different engines (eSpeak, gTTS, Azure, ...)
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "gtts")
    fn id(&self) -> &'static str;

    /// Returns the encoded audio for `text` using the current voice.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Synthesize straight into `path` and return it.
    async fn save_to_file(&self, text: &str, path: &Path) -> Result<PathBuf> {
        let audio = self.synthesize(text).await?;
        tokio::fs::write(path, audio).await?;
        Ok(path.to_path_buf())
    }

    /// Returns the supported voices, in catalog order
    fn list_voices(&self) -> Vec<Voice>;

    /// Unknown ids leave the current voice in place.
    fn set_voice(&mut self, voice_id: &str);

    fn current_voice(&self) -> String;

    fn set_speed(&mut self, _factor: f32) {}

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::new()
    }
}

/// Apply a requested voice and speed, honouring what the engine supports.
pub fn apply_voice_settings(engine: &mut dyn TextToSpeech, voice: &str, speed: f32) {
    if !voice.is_empty() {
        engine.set_voice(voice);
    }
    if (speed - 1.0).abs() > f32::EPSILON {
        if engine.capabilities().set_speed {
            engine.set_speed(speed);
        } else {
            log::debug!("{}: ignoring speed {} (unsupported)", engine.id(), speed);
        }
    }
}

/// Pick `requested` if the catalog knows it, otherwise keep `current`.
pub(crate) fn select_voice(engine: &str, voices: &[Voice], current: &str, requested: &str) -> String {
    if requested.is_empty() {
        return current.to_string();
    }
    if voices.iter().any(|v| v.id == requested) {
        requested.to_string()
    } else {
        log::warn!(
            "{}: voice '{}' not found, keeping '{}'",
            engine,
            requested,
            current
        );
        current.to_string()
    }
}
