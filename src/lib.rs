//! Pluggable speech-to-text and text-to-speech engines behind one API.
//!
//! Engines are picked by identifier through [`registry`], configured from
//! [`config_loader::Settings`], and streamed through a
//! [`session::StreamingSession`]. Batch-only recognizers get streaming via
//! [`buffering::Buffered`].

pub mod backends;
pub mod buffering;
pub mod config_loader;
pub mod error;
pub mod registry;
pub mod scratch;
pub mod session;
pub mod transport;

pub use backends::{Fragment, FragmentKind, SpeechToText, TextToSpeech, Voice};
pub use config_loader::{RequestOverrides, Settings};
pub use error::{EngineKind, Result, SpeechError};
pub use registry::{resolve, resolve_stt, resolve_tts, Engine, EngineParams};
pub use session::{SessionReport, SessionState, StreamingSession};
