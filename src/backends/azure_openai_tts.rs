use super::{select_voice, Capabilities, DebugInfo, TextToSpeech, Voice};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use serde_json::json;

const ENGINE: &str = "azure_openai_tts";
pub const DEFAULT_VOICE: &str = "nova";
const VOICES: [&str; 6] = ["nova", "alloy", "echo", "fable", "onyx", "shimmer"];

/// Azure OpenAI `audio/speech` deployment with the fixed OpenAI voice set.
pub struct AzureOpenAiTtsBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    deployment: String,
    api_version: String,
    model: String,
    language: String,
    voice: String,
    speed: f32,
}

impl AzureOpenAiTtsBackend {
    pub fn new(api_key: &str, endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment: "tts".to_string(),
            api_version: "2025-03-01-preview".to_string(),
            model: "tts-1".to_string(),
            language: "pt-BR".to_string(),
            voice: DEFAULT_VOICE.to_string(),
            speed: 1.0,
        }
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Override the TTS model (default: "tts-1").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/audio/speech?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl TextToSpeech for AzureOpenAiTtsBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let mut body = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        if (self.speed - 1.0).abs() > f32::EPSILON {
            body["speed"] = json!(self.speed);
        }

        let resp = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                SpeechError::Synthesis(format!("Azure OpenAI TTS request failed: {}", e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            return Err(SpeechError::Synthesis(format!(
                "Azure OpenAI TTS returned {}: {}",
                status, err_body
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("TTS response read error: {}", e)))?;
        Ok(audio.to_vec())
    }

    fn list_voices(&self) -> Vec<Voice> {
        VOICES
            .iter()
            .map(|v| Voice::new(v, v, &self.language))
            .collect()
    }

    fn set_voice(&mut self, voice_id: &str) {
        let voices = self.list_voices();
        self.voice = select_voice(ENGINE, &voices, &self.voice, voice_id);
    }

    fn current_voice(&self) -> String {
        self.voice.clone()
    }

    /// The API accepts 0.25–4.0.
    fn set_speed(&mut self, factor: f32) {
        if factor > 0.0 {
            self.speed = factor.clamp(0.25, 4.0);
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
            ("service_type", "Azure OpenAI TTS".to_string()),
            ("model", self.model.clone()),
            ("voice", self.voice.clone()),
            ("language", self.language.clone()),
            ("endpoint", self.endpoint.clone()),
            ("speed", self.speed.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_catalog_order_and_fallback() {
        let mut backend = AzureOpenAiTtsBackend::new("k", "https://example.openai.azure.com/");
        let ids: Vec<String> = backend.list_voices().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["nova", "alloy", "echo", "fable", "onyx", "shimmer"]);

        backend.set_voice("onyx");
        assert_eq!(backend.current_voice(), "onyx");
        backend.set_voice("baritone");
        assert_eq!(backend.current_voice(), "onyx");
        assert_eq!(backend.debug_info()["endpoint"], "https://example.openai.azure.com");
    }

    #[test]
    fn test_speed_is_clamped() {
        let mut backend = AzureOpenAiTtsBackend::new("k", "https://e");
        backend.set_speed(9.0);
        assert_eq!(backend.debug_info()["speed"], "4");
        backend.set_speed(0.0);
        assert_eq!(backend.debug_info()["speed"], "4");
    }

    #[tokio::test]
    async fn test_synthesize_posts_to_deployment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/tts-hd/audio/speech")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                "2025-03-01-preview".into(),
            ))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(json!({
                "model": "tts-1-hd",
                "input": "olá",
                "voice": "shimmer",
                "speed": 1.25,
            })))
            .with_status(200)
            .with_body("mp3bytes")
            .create_async()
            .await;

        let mut backend = AzureOpenAiTtsBackend::new("secret", &server.url())
            .with_deployment("tts-hd")
            .with_model("tts-1-hd");
        backend.set_voice("shimmer");
        backend.set_speed(1.25);

        assert_eq!(backend.synthesize("olá").await.unwrap(), b"mp3bytes");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_default_speed_is_not_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/tts/audio/speech")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({
                "model": "tts-1",
                "input": "oi",
                "voice": "nova",
            })))
            .with_status(200)
            .with_body("x")
            .create_async()
            .await;

        let backend = AzureOpenAiTtsBackend::new("k", &server.url());
        backend.synthesize("oi").await.unwrap();
        mock.assert_async().await;
    }
}
