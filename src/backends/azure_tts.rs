//! Azure Speech neural voices over the `cognitiveservices/v1` REST endpoint.

use super::{select_voice, Capabilities, DebugInfo, TextToSpeech, Voice};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;

const ENGINE: &str = "azure_tts";
pub const DEFAULT_VOICE: &str = "pt-BR-FranciscaNeural";
const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// Curated Brazilian Portuguese neural voices, in catalog order.
const VOICES: [&str; 12] = [
    "pt-BR-FranciscaNeural",
    "pt-BR-AntonioNeural",
    "pt-BR-BrendaNeural",
    "pt-BR-DonatoNeural",
    "pt-BR-ElzaNeural",
    "pt-BR-FabioNeural",
    "pt-BR-GiovannaNeural",
    "pt-BR-HumbertoNeural",
    "pt-BR-JulioNeural",
    "pt-BR-LeticiaNeural",
    "pt-BR-NicolauNeural",
    "pt-BR-YaraNeural",
];

pub struct AzureTtsBackend {
    client: reqwest::Client,
    subscription_key: String,
    region: String,
    base_url: String,
    language: String,
    voice: String,
    speed: f32,
}

impl AzureTtsBackend {
    pub fn new(subscription_key: &str, region: &str, language: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            subscription_key: subscription_key.to_string(),
            region: region.to_string(),
            base_url: format!("https://{}.tts.speech.microsoft.com", region),
            language: language.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            speed: 1.0,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// SSML document for `text`; prosody is only added off the default rate.
    pub fn ssml(&self, text: &str) -> String {
        let text = escape_xml(text);
        let body = if (self.speed - 1.0).abs() > f32::EPSILON {
            format!("<prosody rate='{}'>{}</prosody>", self.speed, text)
        } else {
            text
        };
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'>\
             <voice name='{}'>{}</voice></speak>",
            self.language, self.voice, body
        )
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl TextToSpeech for AzureTtsBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(format!("{}/cognitiveservices/v1", self.base_url))
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header(reqwest::header::CONTENT_TYPE, "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header(reqwest::header::USER_AGENT, "speechd-hub")
            .body(self.ssml(text))
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("Azure Speech request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "Azure Speech returned {}: {}",
                status, body
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("Azure Speech read error: {}", e)))?;
        Ok(audio.to_vec())
    }

    fn list_voices(&self) -> Vec<Voice> {
        VOICES
            .iter()
            .map(|id| Voice::new(id, id.trim_start_matches("pt-BR-"), "pt-BR"))
            .collect()
    }

    fn set_voice(&mut self, voice_id: &str) {
        let voices = self.list_voices();
        self.voice = select_voice(ENGINE, &voices, &self.voice, voice_id);
    }

    fn current_voice(&self) -> String {
        self.voice.clone()
    }

    fn set_speed(&mut self, factor: f32) {
        if factor > 0.0 {
            self.speed = factor;
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            debug_info: true,
            set_speed: true,
        }
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo::from([
            ("service_type", "Azure TTS".to_string()),
            ("model", "Azure Speech Services".to_string()),
            ("voice", self.voice.clone()),
            ("language", self.language.clone()),
            ("region", self.region.clone()),
            ("speed", self.speed.to_string()),
        ])
    }
}
