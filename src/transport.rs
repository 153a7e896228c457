//! Line-delimited JSON streaming protocol over TCP, in the Wyoming style:
//! every event is one JSON line, and `audio-chunk` is followed by exactly
//! `data.length` raw PCM bytes.
//!
//! Each connection gets its own engine and [`StreamingSession`] on its own
//! task. Closing the socket is the same as sending `audio-stop`.

use crate::backends::{Fragment, FragmentKind, SpeechToText};
use crate::error::Result;
use crate::session::{SessionReport, StreamingSession};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Larger chunks are treated as a protocol error.
pub const MAX_CHUNK_BYTES: usize = 1 << 20;

/// Builds a fresh engine for every accepted connection.
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn SpeechToText>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn new(event_type: &str, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
        }
    }

    pub fn fragment(fragment: &Fragment) -> Self {
        let event_type = match fragment.kind {
            FragmentKind::Partial => "partial",
            FragmentKind::Committed => "transcript",
            FragmentKind::Final => "final",
        };
        Self::new(event_type, Some(json!({ "text": fragment.text })))
    }

    pub fn session_end(report: &SessionReport) -> Self {
        Self::new("session-end", serde_json::to_value(report).ok())
    }
}

/// What the client asked for, with chunk payloads already read.
#[derive(Debug, PartialEq)]
enum Inbound {
    Start,
    Chunk(Vec<u8>),
    Stop,
    Other(String),
}

pub async fn serve(addr: &str, factory: EngineFactory) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("streaming transport listening on {}", listener.local_addr()?);
    serve_listener(listener, factory).await
}

/// Accept loop; never returns unless accepting itself fails hard.
pub async fn serve_listener(listener: TcpListener, factory: EngineFactory) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let factory = Arc::clone(&factory);
                tokio::spawn(async move {
                    log::debug!("connection from {}", peer);
                    match handle_connection(socket, factory).await {
                        Ok(report) => log::info!(
                            "{}: session done, {} chunks, {} dropped",
                            peer,
                            report.chunks_received,
                            report.dropped_chunks
                        ),
                        Err(e) => log::warn!("{}: connection error: {}", peer, e),
                    }
                });
            }
            Err(e) => log::error!("accept error: {}", e),
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    factory: EngineFactory,
) -> std::io::Result<SessionReport> {
    let (reader, mut writer) = socket.into_split();

    let engine = match factory() {
        Ok(engine) => engine,
        Err(e) => {
            write_event(&mut writer, &Event::new("error", Some(json!({ "text": e.to_string() }))))
                .await?;
            return Err(Error::new(ErrorKind::Other, e.to_string()));
        }
    };

    run_session(reader, &mut writer, StreamingSession::new(engine)).await
}

/// Drive one session from `reader` to completion, writing every fragment and
/// the closing `session-end` report to `writer`.
///
/// The session is closed exactly once even when the client stops reading;
/// the write error is returned after the engine has been drained.
pub async fn run_session<R, W>(
    reader: R,
    writer: &mut W,
    mut session: StreamingSession,
) -> std::io::Result<SessionReport>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let events = inbound_events(BufReader::new(reader));
    futures_util::pin_mut!(events);
    let mut write_failed: Option<Error> = None;

    while let Some(event) = events.next().await {
        let written = match event {
            Ok(Inbound::Start) => match session.start().await {
                Ok(()) => Ok(()),
                Err(e) => {
                    let error = Event::new("error", Some(json!({ "text": e.to_string() })));
                    if let Err(e) = write_event(writer, &error).await {
                        write_failed = Some(e);
                    }
                    break;
                }
            },
            Ok(Inbound::Chunk(audio)) => {
                let fragments = session.push_chunk(&audio).await;
                write_fragments(writer, &fragments).await
            }
            Ok(Inbound::Stop) => break,
            Ok(Inbound::Other(kind)) => {
                log::debug!("ignoring '{}' event", kind);
                Ok(())
            }
            Err(e) => {
                log::warn!("protocol error, closing session: {}", e);
                break;
            }
        };
        if let Err(e) = written {
            log::warn!("client write failed, closing session: {}", e);
            write_failed = Some(e);
            break;
        }
    }

    let last = session.close().await;
    if let Some(e) = write_failed {
        return Err(e);
    }
    if let Some(fragment) = last {
        write_event(writer, &Event::fragment(&fragment)).await?;
    }
    let report = session.report().clone();
    write_event(writer, &Event::session_end(&report)).await?;
    writer.flush().await?;
    Ok(report)
}

/// Inbound events in wire order; ends at EOF.
fn inbound_events<R>(reader: BufReader<R>) -> impl Stream<Item = std::io::Result<Inbound>>
where
    R: AsyncRead + Unpin,
{
    stream::unfold(Some(reader), |state| async move {
        let Some(mut reader) = state else {
            return None;
        };
        match read_inbound(&mut reader).await {
            Ok(Some(event)) => Some((Ok(event), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

async fn read_inbound<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<Inbound>>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None); // EOF
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let event: Event = serde_json::from_str(line.trim())
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("bad event: {}", e)))?;

    let inbound = match event.event_type.as_str() {
        "audio-start" => Inbound::Start,
        "audio-stop" => Inbound::Stop,
        "audio-chunk" => {
            let length = event
                .data
                .as_ref()
                .and_then(|d| d["length"].as_u64())
                .ok_or_else(|| Error::new(ErrorKind::InvalidData, "audio-chunk without length"))?
                as usize;
            if length > MAX_CHUNK_BYTES {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("chunk of {} bytes exceeds {}", length, MAX_CHUNK_BYTES),
                ));
            }
            let mut audio = vec![0u8; length];
            reader.read_exact(&mut audio).await?;
            Inbound::Chunk(audio)
        }
        other => Inbound::Other(other.to_string()),
    };
    Ok(Some(inbound))
}

async fn write_fragments<W: AsyncWrite + Unpin>(
    writer: &mut W,
    fragments: &[Fragment],
) -> std::io::Result<()> {
    for fragment in fragments {
        write_event(writer, &Event::fragment(fragment)).await?;
    }
    Ok(())
}

async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    writer.write_all(&line).await
}
