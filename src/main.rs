//! speechd-hub - speech engine command line
//!
//! One-shot transcription and synthesis, file-driven streaming sessions,
//! and the TCP streaming server.

use clap::{Parser, Subcommand};
use speechd_hub::backends::FragmentKind;
use speechd_hub::registry::{self, SttEngineId, TtsEngineId};
use speechd_hub::transport::{self, EngineFactory};
use speechd_hub::{RequestOverrides, Settings, StreamingSession};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Speech-to-text and text-to-speech over pluggable engines
#[derive(Parser)]
#[command(name = "speechd-hub")]
#[command(author = "StarTuz")]
#[command(version)]
#[command(about = "Pluggable STT/TTS engines with streaming sessions", long_about = None)]
struct Cli {
    /// Settings file (defaults: ./Speech.*, ~/.config/speechd-hub/Speech.*)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe a complete recording
    Transcribe {
        /// WAV file or raw 16-bit PCM
        file: PathBuf,
        /// STT engine (overrides stt_engine)
        #[arg(short, long)]
        engine: Option<String>,
        /// Language hint
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Replay a recording chunk by chunk through a streaming session
    Stream {
        file: PathBuf,
        #[arg(short, long)]
        engine: Option<String>,
        #[arg(short, long)]
        language: Option<String>,
        /// Bytes per chunk
        #[arg(long, default_value = "4000")]
        chunk_bytes: usize,
    },

    /// Synthesize text into an audio file
    Synthesize {
        text: String,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// TTS engine (overrides tts_engine)
        #[arg(short, long)]
        engine: Option<String>,
        #[arg(short, long)]
        voice: Option<String>,
        #[arg(short, long)]
        speed: Option<f32>,
        #[arg(short, long)]
        language: Option<String>,
    },

    /// List the voices of a TTS engine
    Voices {
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Show engine identifiers and debug info of the configured engines
    Info,

    /// Run the TCP streaming server
    Serve {
        /// Address to bind (overrides listen_addr)
        #[arg(long)]
        listen: Option<String>,
        #[arg(short, long)]
        engine: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Transcribe {
            file,
            engine,
            language,
        } => {
            if let Some(engine) = engine {
                settings.stt_engine = engine;
            }
            let overrides = RequestOverrides {
                language,
                ..Default::default()
            };
            let params = settings.stt_params(&overrides);
            let stt = registry::resolve_stt(&settings.stt_engine, &params)?;
            let audio = tokio::fs::read(&file).await?;
            let text = stt
                .transcribe(&audio, params.get("stt_language"))
                .await?;
            println!("{}", text);
        }

        Commands::Stream {
            file,
            engine,
            language,
            chunk_bytes,
        } => {
            if let Some(engine) = engine {
                settings.stt_engine = engine;
            }
            let overrides = RequestOverrides {
                language,
                ..Default::default()
            };
            let stt = registry::resolve_stt(&settings.stt_engine, &settings.stt_params(&overrides))?;
            stream_file(StreamingSession::new(stt), &file, chunk_bytes.max(1)).await?;
        }

        Commands::Synthesize {
            text,
            output,
            engine,
            voice,
            speed,
            language,
        } => {
            if let Some(engine) = engine {
                settings.tts_engine = engine;
            }
            let overrides = RequestOverrides {
                language,
                voice,
                speed,
            };
            let params = settings.tts_params(&overrides)?;
            let tts = registry::resolve_tts(&settings.tts_engine, &params)?;
            let path = tts.save_to_file(&text, &output).await?;
            println!(
                "Wrote {} ({} voice {})",
                path.display(),
                tts.id(),
                tts.current_voice()
            );
        }

        Commands::Voices { engine } => {
            if let Some(engine) = engine {
                settings.tts_engine = engine;
            }
            let params = settings.tts_params(&RequestOverrides::default())?;
            let tts = registry::resolve_tts(&settings.tts_engine, &params)?;
            let current = tts.current_voice();
            for voice in tts.list_voices() {
                let marker = if voice.id == current { "*" } else { " " };
                println!("{} {:<28} {:<24} {}", marker, voice.id, voice.name, voice.language);
            }
        }

        Commands::Info => print_info(&settings),

        Commands::Serve { listen, engine } => {
            if let Some(engine) = engine {
                settings.stt_engine = engine;
            }
            let addr = listen.unwrap_or_else(|| settings.listen_addr.clone());

            // Fail fast on a bad engine before accepting anyone.
            let engine_id = settings.stt_engine.clone();
            let params = settings.stt_params(&RequestOverrides::default());
            drop(registry::resolve_stt(&engine_id, &params)?);

            let factory: EngineFactory =
                Arc::new(move || registry::resolve_stt(&engine_id, &params));
            transport::serve(&addr, factory).await?;
        }
    }

    Ok(())
}

async fn stream_file(
    session: StreamingSession,
    file: &Path,
    chunk_bytes: usize,
) -> Result<(), Box<dyn Error>> {
    let audio = pcm_bytes(&tokio::fs::read(file).await?)?;
    let (chunk_tx, chunk_rx) = mpsc::channel(8);
    let (fragment_tx, mut fragment_rx) = mpsc::channel(32);

    let session_task = tokio::spawn(session.drive(chunk_rx, fragment_tx));
    let feeder = tokio::spawn(async move {
        for chunk in audio.chunks(chunk_bytes) {
            if chunk_tx.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }
    });

    while let Some(fragment) = fragment_rx.recv().await {
        let label = match fragment.kind {
            FragmentKind::Partial => "partial",
            FragmentKind::Committed => "commit ",
            FragmentKind::Final => "final  ",
        };
        println!("[{}] {}", label, fragment.text);
    }

    feeder.await?;
    let report = session_task.await??;
    println!(
        "{} chunks, {} fragments, {} dropped",
        report.chunks_received, report.fragments_emitted, report.dropped_chunks
    );
    Ok(())
}

/// Streams carry bare PCM, so a WAV container is unwrapped first.
fn pcm_bytes(file: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
    if !file.starts_with(b"RIFF") {
        return Ok(file.to_vec());
    }
    let reader = hound::WavReader::new(std::io::Cursor::new(file))?;
    let mut pcm = Vec::with_capacity(file.len());
    for sample in reader.into_samples::<i16>() {
        pcm.extend_from_slice(&sample?.to_le_bytes());
    }
    Ok(pcm)
}

fn print_info(settings: &Settings) {
    let stt: Vec<&str> = SttEngineId::ALL.iter().map(|e| e.as_str()).collect();
    let tts: Vec<&str> = TtsEngineId::ALL.iter().map(|e| e.as_str()).collect();
    println!("STT engines: {}", stt.join(", "));
    println!("TTS engines: {}", tts.join(", "));

    println!("\nSTT: {}", settings.stt_engine);
    match registry::resolve_stt(&settings.stt_engine, &settings.stt_params(&RequestOverrides::default())) {
        Ok(engine) => {
            for (key, value) in engine.debug_info() {
                println!("  {:<20} {}", key, value);
            }
        }
        Err(e) => println!("  unavailable: {}", e),
    }

    println!("\nTTS: {}", settings.tts_engine);
    let tts = settings
        .tts_params(&RequestOverrides::default())
        .and_then(|params| registry::resolve_tts(&settings.tts_engine, &params));
    match tts {
        Ok(engine) if engine.capabilities().debug_info => {
            for (key, value) in engine.debug_info() {
                println!("  {:<20} {}", key, value);
            }
        }
        Ok(engine) => println!("  {} (no debug info)", engine.id()),
        Err(e) => println!("  unavailable: {}", e),
    }
}
