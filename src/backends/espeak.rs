use super::{select_voice, Capabilities, DebugInfo, TextToSpeech, Voice};
use crate::error::{Result, SpeechError};
use crate::scratch;
use async_trait::async_trait;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

const ENGINE: &str = "pyttsx3";
const BASE_WPM: f32 = 150.0;
const VOICES_TIMEOUT: Duration = Duration::from_secs(5);
const SYNTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Local OS synthesizer driven through the `espeak-ng` binary.
///
/// The voice list is read once at construction; voices installed later are
/// not picked up until the engine is rebuilt.
pub struct EspeakBackend {
    binary: String,
    voices: Vec<Voice>,
    voice: String,
    speed: f32,
}

impl EspeakBackend {
    pub fn new(binary: &str, language: &str) -> Result<Self> {
        let output = run_with_timeout(
            Command::new(binary).arg("--voices"),
            VOICES_TIMEOUT,
        )
        .map_err(|e| SpeechError::unavailable(ENGINE, format!("cannot run {}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(SpeechError::unavailable(
                ENGINE,
                format!(
                    "{} --voices failed: {}",
                    binary,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let voices = parse_voices(&String::from_utf8_lossy(&output.stdout));
        Self::with_voices(binary, language, voices)
    }

    /// Build from an already known voice list.
    pub fn with_voices(binary: &str, language: &str, voices: Vec<Voice>) -> Result<Self> {
        let voice = default_voice(&voices, language).ok_or_else(|| {
            SpeechError::unavailable(ENGINE, format!("{} reports no voices", binary))
        })?;
        log::info!("{}: {} voices, default '{}'", ENGINE, voices.len(), voice);

        Ok(Self {
            binary: binary.to_string(),
            voices,
            voice,
            speed: 1.0,
        })
    }

    fn words_per_minute(&self) -> u32 {
        (BASE_WPM * self.speed).round().clamp(80.0, 450.0) as u32
    }

    fn command(&self, text: &str, wav_path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.words_per_minute().to_string())
            .arg("-w")
            .arg(wav_path)
            .arg(text);
        cmd
    }

    async fn render(&self, text: &str, wav_path: PathBuf) -> Result<PathBuf> {
        let mut cmd = self.command(text, &wav_path);
        let output = tokio::task::spawn_blocking(move || run_with_timeout(&mut cmd, SYNTH_TIMEOUT))
            .await
            .map_err(|e| SpeechError::Synthesis(format!("espeak task failed: {}", e)))?
            .map_err(|e| SpeechError::Synthesis(e.to_string()))?;

        if output.status.success() {
            Ok(wav_path)
        } else {
            Err(SpeechError::Synthesis(format!(
                "espeak error: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl TextToSpeech for EspeakBackend {
    fn id(&self) -> &'static str {
        ENGINE
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        // espeak's --stdout WAV carries a bogus length header; a file does not.
        let scratch = scratch::reserve(".wav")?;
        let path = self.render(text, scratch.path().to_path_buf()).await?;
        let audio = tokio::fs::read(&path).await?;
        Ok(audio)
    }

    async fn save_to_file(&self, text: &str, path: &Path) -> Result<PathBuf> {
        self.render(text, path.to_path_buf()).await
    }

    fn list_voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn set_voice(&mut self, voice_id: &str) {
        self.voice = select_voice(ENGINE, &self.voices, &self.voice, voice_id);
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
            ("service_type", "eSpeak NG (local)".to_string()),
            ("binary", self.binary.clone()),
            ("voice", self.voice.clone()),
            ("rate_wpm", self.words_per_minute().to_string()),
            ("speed", self.speed.to_string()),
        ])
    }
}

/// Runs a command, killing it if it outlives `timeout`.
pub(crate) fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<Output> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    match child.wait_timeout(timeout)? {
        Some(_) => child.wait_with_output(),
        None => {
            // Timeout occurred, kill the process
            let _ = child.kill();
            let _ = child.wait();
            Err(Error::new(
                ErrorKind::TimedOut,
                format!("backend timed out after {}s", timeout.as_secs()),
            ))
        }
    }
}

/// Parses the table printed by `espeak-ng --voices`.
fn parse_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some(Voice {
                id: cols[1].to_string(),
                name: cols[3].replace('_', " "),
                language: cols[1].to_string(),
            })
        })
        .collect()
}

fn default_voice(voices: &[Voice], language: &str) -> Option<String> {
    let language = language.to_lowercase();
    let family = language.split('-').next().unwrap_or_default();
    voices
        .iter()
        .find(|v| v.id.eq_ignore_ascii_case(&language))
        .or_else(|| voices.iter().find(|v| !family.is_empty() && v.id.starts_with(family)))
        .or_else(|| voices.first())
        .map(|v| v.id.clone())
}
