//! Google Translate text-to-speech (the service behind gTTS).
//!
//! There are no real voices: a voice id is a synthetic `{language}-{pace}`
//! pair such as `pt-br-slow`.

use super::{select_voice, Capabilities, DebugInfo, TextToSpeech, Voice};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

const ENGINE: &str = "gtts";
const RPC_ID: &str = "jQ1olc";
const RPC_PATH: &str = "/_/TranslateWebserverUi/data/batchexecute";
const MAX_PIECE_CHARS: usize = 100;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Clone)]
struct Pace {
    voice: Voice,
    lang: String,
    slow: bool,
}

pub struct GttsBackend {
    client: reqwest::Client,
    base_url: String,
    tld: &'static str,
    catalog: Vec<Pace>,
    voice: String,
}

impl GttsBackend {
    pub fn new(language: &str) -> Self {
        let language = language.to_lowercase();
        let tld = if language.starts_with("pt") { "com.br" } else { "com" };

        let mut catalog = vec![
            pace("pt-br", "pt-br", true),
            pace("pt-br", "pt-br", false),
            pace("en-us", "en", true),
            pace("en-us", "en", false),
        ];
        let normal = format!("{}-normal", language);
        if !catalog.iter().any(|p| p.voice.id == normal) {
            catalog.push(pace(&language, &language, true));
            catalog.push(pace(&language, &language, false));
        }

        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://translate.google.{}", tld),
            tld,
            voice: normal,
            catalog,
        }
    }

    /// Point requests at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn current(&self) -> &Pace {
        self.catalog
            .iter()
            .find(|p| p.voice.id == self.voice)
            .unwrap_or(&self.catalog[0])
    }

    async fn synthesize_piece(&self, piece: &str, pace: &Pace) -> Result<Vec<u8>> {
        let speed = if pace.slow { Value::Bool(true) } else { Value::Null };
        let parameter = json!([piece, pace.lang, speed, "null"]).to_string();
        let rpc = json!([[[RPC_ID, parameter, Value::Null, "generic"]]]).to_string();

        let resp = self
            .client
            .post(format!("{}{}", self.base_url, RPC_PATH))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .form(&[("f.req", rpc)])
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("gTTS request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "gTTS returned {}: {}",
                status, body
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("gTTS response read error: {}", e)))?;
        decode_audio(&body)
    }
}

fn pace(id_lang: &str, lang: &str, slow: bool) -> Pace {
    let id = format!("{}-{}", id_lang, if slow { "slow" } else { "normal" });
    Pace {
        voice: Voice {
            name: id.clone(),
            id,
            language: lang.to_string(),
        },
        lang: lang.to_string(),
        slow,
    }
}

fn audio_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"jQ1olc","\[\\"(.*)\\"]"#))
        .as_ref()
        .map_err(|e| SpeechError::Synthesis(format!("gTTS response pattern: {}", e)))
}

/// Pulls the base64 MP3 payload out of a batchexecute response.
fn decode_audio(body: &str) -> Result<Vec<u8>> {
    let pattern = audio_pattern()?;
    let encoded = body
        .lines()
        .filter(|line| line.contains(RPC_ID))
        .find_map(|line| pattern.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| SpeechError::Synthesis("no audio in gTTS response".into()))?;

    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| SpeechError::Synthesis(format!("invalid gTTS audio payload: {}", e)))
}

/// Splits text into pieces of at most `MAX_PIECE_CHARS`, on whitespace where
/// possible.
fn split_text(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed <= MAX_PIECE_CHARS {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        let chars: Vec<char> = word.chars().collect();
        let mut slices = chars.chunks(MAX_PIECE_CHARS).peekable();
        while let Some(slice) = slices.next() {
            let s: String = slice.iter().collect();
            if slices.peek().is_some() {
                pieces.push(s);
            } else {
                current = s;
            }
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[async_trait]
impl TextToSpeech for GttsBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let pieces = split_text(text);
        if pieces.is_empty() {
            return Err(SpeechError::Synthesis("nothing to synthesize".into()));
        }

        let pace = self.current().clone();
        let mut audio = Vec::new();
        for piece in &pieces {
            // MP3 frames concatenate cleanly
            audio.extend(self.synthesize_piece(piece, &pace).await?);
        }
        log::debug!("gtts: {} pieces, {} bytes", pieces.len(), audio.len());
        Ok(audio)
    }

    fn list_voices(&self) -> Vec<Voice> {
        self.catalog.iter().map(|p| p.voice.clone()).collect()
    }

    fn set_voice(&mut self, voice_id: &str) {
        let voices = self.list_voices();
        self.voice = select_voice(ENGINE, &voices, &self.voice, voice_id);
    }

    fn current_voice(&self) -> String {
        self.voice.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            debug_info: true,
            set_speed: false,
        }
    }

    fn debug_info(&self) -> DebugInfo {
        let pace = self.current();
        DebugInfo::from([
            ("service_type", "Google TTS (gTTS)".to_string()),
            ("model", "gTTS".to_string()),
            ("voice", self.voice.clone()),
            ("language", pace.lang.clone()),
            ("tld", self.tld.to_string()),
            ("slow_mode", pace.slow.to_string()),
        ])
    }
}
