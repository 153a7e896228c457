//! One live audio stream over one STT engine.
//!
//! ```text
//! Idle --start--> Streaming --chunk--> Streaming
//!                     |
//!                   close
//!                     v
//!                 Draining --end_stream--> Closed
//! ```
//!
//! Nothing goes back to `Idle`. Chunk faults are logged and counted, never
//! propagated, so a flaky engine cannot kill the connection it serves.

use crate::backends::{Fragment, SpeechToText};
use crate::error::{Result, SpeechError};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Draining,
    Closed,
}

/// Counters handed back when a session closes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub chunks_received: u64,
    pub fragments_emitted: u64,
    pub dropped_chunks: u64,
    pub final_text: String,
}

pub struct StreamingSession {
    engine: Box<dyn SpeechToText>,
    state: SessionState,
    report: SessionReport,
}

impl StreamingSession {
    pub fn new(engine: Box<dyn SpeechToText>) -> Self {
        Self {
            engine,
            state: SessionState::Idle,
            report: SessionReport::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn engine(&self) -> &dyn SpeechToText {
        self.engine.as_ref()
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Idle -> Streaming. Starting a session that is already streaming is a
    /// no-op; a closed session cannot be restarted.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => {
                self.engine.start_stream().await?;
                self.state = SessionState::Streaming;
                log::debug!("session on {}: streaming", self.engine.id());
                Ok(())
            }
            SessionState::Streaming => Ok(()),
            SessionState::Draining | SessionState::Closed => Err(SpeechError::StreamingChunk(
                "session already closed".to_string(),
            )),
        }
    }

    /// Feed one chunk and return whatever the engine produced for it.
    pub async fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Fragment> {
        self.report.chunks_received += 1;

        if self.state != SessionState::Streaming {
            self.report.dropped_chunks += 1;
            log::warn!(
                "session on {}: dropping {} byte chunk in state {:?}",
                self.engine.id(),
                chunk.len(),
                self.state
            );
            return Vec::new();
        }

        match self.engine.process_chunk(chunk).await {
            Ok(fragments) => {
                self.report.fragments_emitted += fragments.len() as u64;
                fragments
            }
            Err(e) => {
                self.report.dropped_chunks += 1;
                log::warn!(
                    "session on {}: chunk {} dropped: {}",
                    self.engine.id(),
                    self.report.chunks_received,
                    e
                );
                Vec::new()
            }
        }
    }

    /// Streaming -> Draining -> Closed. Returns the final fragment the first
    /// time only, and only when the engine had something left to say.
    pub async fn close(&mut self) -> Option<Fragment> {
        match self.state {
            SessionState::Closed | SessionState::Draining => return None,
            SessionState::Idle => {
                self.state = SessionState::Closed;
                return None;
            }
            SessionState::Streaming => {}
        }

        self.state = SessionState::Draining;
        let text = match self.engine.end_stream().await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                log::warn!("session on {}: final flush failed: {}", self.engine.id(), e);
                String::new()
            }
        };
        self.state = SessionState::Closed;

        log::debug!(
            "session on {}: closed after {} chunks ({} dropped)",
            self.engine.id(),
            self.report.chunks_received,
            self.report.dropped_chunks
        );

        if text.is_empty() {
            return None;
        }
        self.report.fragments_emitted += 1;
        self.report.final_text = text.clone();
        Some(Fragment::final_text(text))
    }

    /// Run a whole session: start, forward every chunk from `input` in
    /// order, and close once `input` ends. Fragments go to `output` as soon
    /// as they exist. A vanished receiver stops reading but still closes the
    /// engine.
    pub async fn drive(
        mut self,
        mut input: mpsc::Receiver<Vec<u8>>,
        output: mpsc::Sender<Fragment>,
    ) -> Result<SessionReport> {
        self.start().await?;

        'feed: while let Some(chunk) = input.recv().await {
            for fragment in self.push_chunk(&chunk).await {
                if output.send(fragment).await.is_err() {
                    log::debug!("session on {}: listener gone", self.engine.id());
                    break 'feed;
                }
            }
        }

        if let Some(fragment) = self.close().await {
            let _ = output.send(fragment).await;
        }
        Ok(self.report)
    }
}
