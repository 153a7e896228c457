//! Pseudo-streaming for engines that only transcribe complete buffers.
//!
//! Chunks are accumulated until the buffer reaches a backend-specific
//! threshold, then the whole buffer is transcribed and the result emitted as
//! one committed fragment. After a successful cycle the buffer is either
//! discarded or trimmed to a tail overlap, so consecutive fragments may share
//! words. Consumers must treat that overlap as expected output.
//!
//! A failed cycle keeps the buffer for the next chunk to retry and reports
//! the chunk as rejected; the session counts it and carries on.

use crate::backends::{BatchTranscriber, Capabilities, DebugInfo, Fragment, SpeechToText};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;

/// ~1 s of 16 kHz, 16-bit mono PCM.
pub const DEFAULT_THRESHOLD_BYTES: usize = 32_000;

/// One 16-bit mono sample.
pub const PCM16_FRAME_BYTES: usize = 2;

/// What is kept after a successful transcription cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Clear the buffer and start over.
    Discard,
    /// Keep the last N bytes for continuity across the boundary.
    Overlap(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPolicy {
    pub threshold: usize,
    pub retention: Retention,
    /// Overlap cuts land on multiples of this, so a kept tail never starts
    /// mid-sample.
    pub frame_bytes: usize,
}

impl BufferPolicy {
    pub fn discard(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            retention: Retention::Discard,
            frame_bytes: PCM16_FRAME_BYTES,
        }
    }

    /// An overlap at or above the threshold would re-trigger on every chunk,
    /// so it is capped just below it.
    pub fn overlap(threshold: usize, tail: usize) -> Self {
        let threshold = threshold.max(1);
        let tail = tail.min(threshold - 1);
        Self {
            threshold,
            retention: if tail == 0 {
                Retention::Discard
            } else {
                Retention::Overlap(tail)
            },
            frame_bytes: PCM16_FRAME_BYTES,
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::discard(DEFAULT_THRESHOLD_BYTES)
    }
}

/// Byte buffer that knows when it holds enough audio to be worth a cycle.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buffer: Vec<u8>,
    policy: BufferPolicy,
}

impl ChunkAccumulator {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            buffer: Vec::with_capacity(policy.threshold),
            policy,
        }
    }

    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append a chunk. Returns true once the threshold is reached.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);
        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.policy.threshold
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Apply the retention policy after a successful cycle.
    pub fn commit(&mut self) {
        match self.policy.retention {
            Retention::Discard => self.buffer.clear(),
            Retention::Overlap(tail) => {
                if self.buffer.len() > tail {
                    let frame = self.policy.frame_bytes.max(1);
                    let cut = (self.buffer.len() - tail).div_ceil(frame) * frame;
                    self.buffer.drain(..cut.min(self.buffer.len()));
                }
            }
        }
    }

    /// Hand over everything that is left, emptying the buffer.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// Adapts a [`BatchTranscriber`] to the streaming [`SpeechToText`] contract.
pub struct Buffered<B> {
    inner: B,
    acc: ChunkAccumulator,
    language: Option<String>,
    active: bool,
    failed_cycles: u64,
}

impl<B: BatchTranscriber> Buffered<B> {
    pub fn new(inner: B, policy: BufferPolicy) -> Self {
        Self {
            inner,
            acc: ChunkAccumulator::new(policy),
            language: None,
            active: false,
            failed_cycles: 0,
        }
    }

    /// Language hint passed to every streaming cycle.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        self.language = if language.is_empty() {
            None
        } else {
            Some(language)
        };
        self
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn buffered_bytes(&self) -> usize {
        self.acc.len()
    }

    /// Cycles whose transcription failed and were retried on later chunks.
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles
    }
}

#[async_trait]
impl<B: BatchTranscriber> SpeechToText for Buffered<B> {
    fn id(&self) -> &'static str {
        self.inner.id()
    }

    async fn transcribe(&self, audio: &[u8], language: Option<&str>) -> Result<String> {
        self.inner.transcribe(audio, language).await
    }

    async fn start_stream(&mut self) -> Result<()> {
        self.acc.clear();
        self.active = true;
        Ok(())
    }

    async fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Fragment>> {
        if !self.active {
            return Err(SpeechError::StreamingChunk(format!(
                "{}: stream not started",
                self.inner.id()
            )));
        }
        if !self.acc.push(chunk) {
            return Ok(Vec::new());
        }

        let outcome = self
            .inner
            .transcribe(self.acc.pending(), self.language.as_deref())
            .await;

        match outcome {
            Ok(text) => {
                self.acc.commit();
                let text = text.trim();
                if text.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Fragment::committed(text)])
                }
            }
            Err(e) => {
                // Buffer stays as-is; the next chunk retries with more audio.
                self.failed_cycles += 1;
                log::debug!(
                    "{}: cycle {} failed, keeping {} bytes",
                    self.inner.id(),
                    self.failed_cycles,
                    self.acc.len()
                );
                Err(SpeechError::StreamingChunk(format!(
                    "{}: transcription of {} buffered bytes failed: {}",
                    self.inner.id(),
                    self.acc.len(),
                    e
                )))
            }
        }
    }

    async fn end_stream(&mut self) -> Result<String> {
        self.active = false;
        if self.acc.is_empty() {
            return Ok(String::new());
        }

        let audio = self.acc.take();
        match self.inner.transcribe(&audio, self.language.as_deref()).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => {
                log::warn!(
                    "{}: final flush over {} bytes failed: {}",
                    self.inner.id(),
                    audio.len(),
                    e
                );
                Ok(String::new())
            }
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            debug_info: true,
            set_speed: false,
        }
    }

    fn debug_info(&self) -> DebugInfo {
        let mut info = self.inner.debug_info();
        let policy = self.acc.policy();
        info.insert("audio_buffer_size", self.acc.len().to_string());
        info.insert("stream_threshold", policy.threshold.to_string());
        info.insert(
            "stream_overlap",
            match policy.retention {
                Retention::Discard => "0".to_string(),
                Retention::Overlap(n) => n.to_string(),
            },
        );
        info.insert("failed_cycles", self.failed_cycles.to_string());
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records the size of every buffer it is asked to transcribe and
    /// numbers its answers so ordering is observable.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<usize>>,
        failures_left: AtomicUsize,
    }

    impl Recorder {
        fn failing(times: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failures_left: AtomicUsize::new(times),
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchTranscriber for Recorder {
        fn id(&self) -> &'static str {
            "recorder"
        }

        async fn transcribe(&self, audio: &[u8], _language: Option<&str>) -> Result<String> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(audio.len());
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SpeechError::Transcription("backend hiccup".into()));
            }
            Ok(format!(" seg-{} ", calls.len()))
        }
    }

    #[test]
    fn test_overlap_is_capped_below_threshold() {
        let policy = BufferPolicy::overlap(100, 500);
        assert_eq!(policy.retention, Retention::Overlap(99));
        assert_eq!(BufferPolicy::overlap(100, 0).retention, Retention::Discard);
    }

    #[test]
    fn test_accumulator_commit_keeps_tail() {
        let mut acc = ChunkAccumulator::new(BufferPolicy::overlap(10, 4));
        assert!(!acc.push(&[1, 2, 3, 4, 5]));
        assert!(acc.push(&[6, 7, 8, 9, 10, 11, 12]));
        acc.commit();
        assert_eq!(acc.pending(), &[9, 10, 11, 12]);
        assert_eq!(acc.take(), vec![9, 10, 11, 12]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_overlap_tail_starts_on_sample_boundary() {
        let pcm: Vec<u8> = (0u16..20_000).flat_map(|s| s.to_le_bytes()).collect();
        let mut acc = ChunkAccumulator::new(BufferPolicy::overlap(32_000, 16_000));

        // odd-sized chunks: 3 x 12001 = 36003 bytes crosses the threshold
        let mut chunks = pcm.chunks(12_001);
        assert!(!acc.push(chunks.next().unwrap()));
        assert!(!acc.push(chunks.next().unwrap()));
        assert!(acc.push(chunks.next().unwrap()));
        acc.commit();

        assert!(acc.len() <= 16_000);
        let first = u16::from_le_bytes([acc.pending()[0], acc.pending()[1]]);
        assert_eq!(first, 10_002);
        let second = u16::from_le_bytes([acc.pending()[2], acc.pending()[3]]);
        assert_eq!(second, 10_003);
    }

    #[tokio::test]
    async fn test_threshold_crossing_scenario() {
        let mut stt = Buffered::new(Recorder::default(), BufferPolicy::discard(32_000));
        stt.start_stream().await.unwrap();

        assert!(stt.process_chunk(&[0u8; 12_000]).await.unwrap().is_empty());
        assert!(stt.process_chunk(&[0u8; 12_000]).await.unwrap().is_empty());
        let out = stt.process_chunk(&[0u8; 10_000]).await.unwrap();

        assert_eq!(out, vec![Fragment::committed("seg-1")]);
        assert_eq!(stt.inner().calls(), vec![34_000]);
        assert_eq!(stt.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_overlap_retention_after_cycle() {
        let mut stt = Buffered::new(Recorder::default(), BufferPolicy::overlap(32_000, 16_000));
        stt.start_stream().await.unwrap();
        stt.process_chunk(&[0u8; 34_000]).await.unwrap();
        assert_eq!(stt.buffered_bytes(), 16_000);

        // 16 000 retained + 16 000 new crosses again
        let out = stt.process_chunk(&[0u8; 16_000]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(stt.inner().calls(), vec![34_000, 32_000]);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_buffer_for_retry() {
        let mut stt = Buffered::new(Recorder::failing(1), BufferPolicy::discard(100));
        stt.start_stream().await.unwrap();

        let err = stt.process_chunk(&[0u8; 120]).await.unwrap_err();
        assert!(matches!(err, SpeechError::StreamingChunk(msg) if msg.contains("backend hiccup")));
        assert_eq!(stt.buffered_bytes(), 120);
        assert_eq!(stt.failed_cycles(), 1);

        let out = stt.process_chunk(&[0u8; 10]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(stt.inner().calls(), vec![120, 130]);
    }

    #[tokio::test]
    async fn test_end_stream_flushes_remainder() {
        let mut stt = Buffered::new(Recorder::default(), BufferPolicy::discard(1_000));
        stt.start_stream().await.unwrap();
        stt.process_chunk(&[0u8; 300]).await.unwrap();

        assert_eq!(stt.end_stream().await.unwrap(), "seg-1");
        assert_eq!(stt.buffered_bytes(), 0);
        // nothing left the second time
        assert_eq!(stt.end_stream().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_end_stream_failure_yields_empty_text() {
        let mut stt = Buffered::new(Recorder::failing(1), BufferPolicy::discard(1_000));
        stt.start_stream().await.unwrap();
        stt.process_chunk(&[0u8; 10]).await.unwrap();
        assert_eq!(stt.end_stream().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_chunk_before_start_is_rejected() {
        let mut stt = Buffered::new(Recorder::default(), BufferPolicy::default());
        let err = stt.process_chunk(&[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, SpeechError::StreamingChunk(_)));
    }

    #[test]
    fn test_debug_info_reports_buffer() {
        let stt = Buffered::new(Recorder::default(), BufferPolicy::overlap(32_000, 8_000));
        let info = stt.debug_info();
        assert_eq!(info["audio_buffer_size"], "0");
        assert_eq!(info["stream_overlap"], "8000");
        assert!(stt.capabilities().debug_info);
    }

    proptest! {
        #[test]
        fn prop_below_threshold_never_transcribes(
            chunks in proptest::collection::vec(1usize..500, 0..20),
        ) {
            let total: usize = chunks.iter().sum();
            let threshold = total + 1;
            let fragments = tokio_test::block_on(async {
                let mut stt = Buffered::new(Recorder::default(), BufferPolicy::discard(threshold));
                stt.start_stream().await.unwrap();
                let mut n = 0;
                for c in &chunks {
                    n += stt.process_chunk(&vec![0u8; *c]).await.unwrap().len();
                }
                n
            });
            prop_assert_eq!(fragments, 0);
        }

        #[test]
        fn prop_one_fragment_per_crossing_in_order(
            chunks in proptest::collection::vec(1usize..4_000, 1..40),
            threshold in 1usize..8_000,
            tail in 0usize..4_000,
        ) {
            let policy = BufferPolicy::overlap(threshold, tail);
            let (texts, calls) = tokio_test::block_on(async {
                let mut stt = Buffered::new(Recorder::default(), policy);
                stt.start_stream().await.unwrap();
                let mut texts = Vec::new();
                for c in &chunks {
                    let out = stt.process_chunk(&vec![0u8; *c]).await.unwrap();
                    prop_assert!(out.len() <= 1);
                    texts.extend(out.into_iter().map(|f| f.text));
                }
                Ok::<_, TestCaseError>((texts, stt.inner().calls()))
            })?;

            prop_assert_eq!(texts.len(), calls.len());
            for (i, text) in texts.iter().enumerate() {
                prop_assert_eq!(text, &format!("seg-{}", i + 1));
            }
            for size in calls {
                prop_assert!(size >= policy.threshold);
            }
        }
    }
}
