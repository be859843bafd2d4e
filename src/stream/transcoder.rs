use bytes::Bytes;

use super::records::RecordBuffer;
use crate::protocol::openai_chat::StreamChunk;

const DATA_PREFIX: &[u8] = b"data:";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// What a single upstream record turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// A data record carrying non-empty incremental text.
    Delta(String),
    /// A well-formed data record with no text (role announcement, finish reason, usage).
    NoDelta,
    /// The advisory `[DONE]` sentinel.
    Done,
    /// A data record whose payload reports a provider-side error.
    ProviderError(String),
    /// Blank lines, comments and non-`data:` fields.
    NotData,
    /// A data record whose payload is not JSON.
    Malformed,
}

/// Classify one complete record (separator already removed).
#[must_use]
pub fn classify_record(record: &[u8]) -> RecordKind {
    let record = record.trim_ascii();
    let Some(payload) = record.strip_prefix(DATA_PREFIX) else {
        return RecordKind::NotData;
    };
    let payload = payload.trim_ascii_start();
    if payload == DONE_SENTINEL {
        return RecordKind::Done;
    }

    match serde_json::from_slice::<StreamChunk>(payload) {
        Ok(chunk) => {
            if let Some(error) = chunk.error.as_ref() {
                let message = error
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_owned);
                return RecordKind::ProviderError(message);
            }
            chunk
                .into_first_delta()
                .map_or(RecordKind::NoDelta, RecordKind::Delta)
        }
        Err(_) => RecordKind::Malformed,
    }
}

/// Lifecycle of one transcoded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodePhase {
    Idle,
    Streaming,
    Completed,
    Aborted,
}

impl TranscodePhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TranscodePhase::Completed | TranscodePhase::Aborted)
    }
}

/// Counters collected while transcoding, reported when the stream closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub upstream_reads: u64,
    pub upstream_bytes: u64,
    pub records: u64,
    pub fragments: u64,
    pub downstream_bytes: u64,
    pub malformed_records: u64,
    pub saw_done_sentinel: bool,
    pub discarded_tail_bytes: usize,
}

/// Per-request state machine turning upstream event-stream bytes into plain
/// text fragments.
///
/// Owned by exactly one response; never shared or reused.
#[derive(Debug)]
pub struct StreamTranscoder {
    records: RecordBuffer,
    scratch: Vec<Bytes>,
    phase: TranscodePhase,
    stats: TranscodeStats,
}

impl Default for StreamTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTranscoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RecordBuffer::new(),
            scratch: Vec::with_capacity(8),
            phase: TranscodePhase::Idle,
            stats: TranscodeStats::default(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> TranscodePhase {
        self.phase
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase.is_terminal()
    }

    #[must_use]
    pub fn stats(&self) -> TranscodeStats {
        self.stats
    }

    /// Bytes of the trailing, not yet terminated record.
    #[must_use]
    pub fn partial_len(&self) -> usize {
        self.records.partial_len()
    }

    /// Process one upstream read, pushing every derived text fragment into
    /// `out` in upstream order. Returns the number of fragments emitted.
    ///
    /// Reads after the transcoder closed are ignored.
    pub fn transcode_chunk_into<E: Extend<Bytes>>(&mut self, chunk: &[u8], out: &mut E) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.phase = TranscodePhase::Streaming;
        self.stats.upstream_reads += 1;
        self.stats.upstream_bytes += chunk.len() as u64;

        self.records.feed_into(chunk, &mut self.scratch);
        let mut emitted = 0;
        for record in self.scratch.drain(..) {
            self.stats.records += 1;
            match classify_record(&record) {
                RecordKind::Delta(text) => {
                    self.stats.fragments += 1;
                    self.stats.downstream_bytes += text.len() as u64;
                    emitted += 1;
                    out.extend(std::iter::once(Bytes::from(text)));
                }
                RecordKind::Done => self.stats.saw_done_sentinel = true,
                RecordKind::ProviderError(message) => {
                    tracing::warn!(error = %message, "upstream reported an error inside the stream");
                }
                RecordKind::Malformed => {
                    self.stats.malformed_records += 1;
                    tracing::debug!(
                        record_len = record.len(),
                        "discarding unparseable upstream record"
                    );
                }
                RecordKind::NoDelta | RecordKind::NotData => {}
            }
        }
        emitted
    }

    /// Upstream reached end-of-data: drop any unterminated tail and close.
    pub fn finish(&mut self) {
        self.close(TranscodePhase::Completed);
    }

    /// Upstream failed or the downstream went away: drop any tail and close.
    pub fn abort(&mut self) {
        self.close(TranscodePhase::Aborted);
    }

    fn close(&mut self, terminal: TranscodePhase) {
        if self.is_closed() {
            return;
        }
        self.stats.discarded_tail_bytes = self.records.discard_partial();
        self.phase = terminal;
    }
}
