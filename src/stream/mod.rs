pub mod records;
pub mod transcoder;

pub use records::RecordBuffer;
pub use transcoder::{classify_record, RecordKind, StreamTranscoder, TranscodePhase, TranscodeStats};

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::error::describe_error_chain;

/// Why a stream ended before upstream finished cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Reading from upstream failed after the response was committed.
    UpstreamRead(String),
    /// The downstream consumer dropped the response body.
    DownstreamCancelled,
}

/// Terminal state reported exactly once per stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(TranscodeStats),
    Aborted {
        reason: AbortReason,
        stats: TranscodeStats,
    },
}

impl StreamOutcome {
    #[must_use]
    pub fn stats(&self) -> &TranscodeStats {
        match self {
            StreamOutcome::Completed(stats) | StreamOutcome::Aborted { stats, .. } => stats,
        }
    }
}

/// Callback invoked when the downstream side closes.
pub type CloseHook = Box<dyn FnOnce(StreamOutcome) + Send + 'static>;

pin_project! {
    /// Plain-text body stream fed by an upstream event-stream body.
    ///
    /// Upstream is polled only when the consumer asks for the next chunk and
    /// every fragment from the previous read has been handed out, so a slow
    /// consumer pauses upstream reads. Dropping this stream drops the
    /// upstream body, closing the upstream connection.
    ///
    /// The close hook runs exactly once: when the stream first yields `None`
    /// (clean end or upstream read error), or on drop if it never got there.
    /// Once closed, the stream keeps yielding `None` without touching upstream.
    pub struct TextStream<S> {
        #[pin]
        upstream: S,
        transcoder: StreamTranscoder,
        pending: VecDeque<Bytes>,
        on_close: Option<CloseHook>,
    }

    impl<S> PinnedDrop for TextStream<S> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(hook) = this.on_close.take() {
                this.transcoder.abort();
                hook(StreamOutcome::Aborted {
                    reason: AbortReason::DownstreamCancelled,
                    stats: this.transcoder.stats(),
                });
            }
        }
    }
}

impl<S> TextStream<S> {
    pub fn new(upstream: S, on_close: CloseHook) -> Self {
        Self {
            upstream,
            transcoder: StreamTranscoder::new(),
            pending: VecDeque::with_capacity(8),
            on_close: Some(on_close),
        }
    }

    #[must_use]
    pub fn phase(&self) -> TranscodePhase {
        self.transcoder.phase()
    }
}

impl<S, E> Stream for TextStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error,
{
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(chunk) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if this.transcoder.is_closed() {
                return Poll::Ready(None);
            }

            match ready!(this.upstream.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => {
                    this.transcoder.transcode_chunk_into(&bytes, &mut *this.pending);
                }
                Some(Err(err)) => {
                    this.transcoder.abort();
                    if let Some(hook) = this.on_close.take() {
                        hook(StreamOutcome::Aborted {
                            reason: AbortReason::UpstreamRead(describe_error_chain(&err)),
                            stats: this.transcoder.stats(),
                        });
                    }
                }
                None => {
                    this.transcoder.finish();
                    if let Some(hook) = this.on_close.take() {
                        hook(StreamOutcome::Completed(this.transcoder.stats()));
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.transcoder.is_closed() {
            (self.pending.len(), Some(self.pending.len()))
        } else {
            (self.pending.len(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Outcomes = Arc<Mutex<Vec<StreamOutcome>>>;

    fn recording_hook() -> (CloseHook, Outcomes) {
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let hook: CloseHook = Box::new(move |outcome| sink.lock().unwrap().push(outcome));
        (hook, outcomes)
    }

    fn ok(chunk: &'static [u8]) -> Result<Bytes, std::io::Error> {
        Ok(Bytes::from_static(chunk))
    }

    async fn collect_text<S>(stream: TextStream<S>) -> Vec<String>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>>,
    {
        stream
            .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_clean_completion_emits_fragments_then_closes_once() {
        let upstream = futures_util::stream::iter(vec![
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n"),
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n"),
            ok(b"data: [DONE]\n"),
        ]);
        let (hook, outcomes) = recording_hook();
        let fragments = collect_text(TextStream::new(upstream, hook)).await;

        assert_eq!(fragments, vec!["Hel", "lo"]);
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            StreamOutcome::Completed(stats) => {
                assert_eq!(stats.fragments, 2);
                assert!(stats.saw_done_sentinel);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_sent_output_and_closes_once() {
        let upstream = futures_util::stream::iter(vec![
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n"),
        ]);
        let (hook, outcomes) = recording_hook();
        let mut stream = Box::pin(TextStream::new(upstream, hook));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"par"));
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
        assert_eq!(stream.phase(), TranscodePhase::Aborted);
        drop(stream);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0],
            StreamOutcome::Aborted {
                reason: AbortReason::UpstreamRead(message),
                ..
            } if message.contains("reset")
        ));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error decoding response body")]
    struct BodyReadError(#[source] std::io::Error);

    #[tokio::test]
    async fn test_upstream_error_reason_names_underlying_cause() {
        let upstream = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n",
            )),
            Err(BodyReadError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
        ]);
        let (hook, outcomes) = recording_hook();
        let fragments: Vec<Bytes> = TextStream::new(upstream, hook)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec![Bytes::from_static(b"par")]);

        let outcomes = outcomes.lock().unwrap();
        match &outcomes[0] {
            StreamOutcome::Aborted {
                reason: AbortReason::UpstreamRead(message),
                ..
            } => assert_eq!(
                message,
                "error decoding response body: connection reset by peer"
            ),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upstream_not_read_until_fragments_delivered() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let upstream = futures_util::stream::iter(vec![
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n"),
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n"),
        ])
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (hook, _outcomes) = recording_hook();
        let mut stream = Box::pin(TextStream::new(upstream, hook));

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"c"));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_downstream_drop_reports_cancellation_once() {
        let upstream = futures_util::stream::iter(vec![
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n"),
            ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n"),
        ])
        .chain(futures_util::stream::pending());
        let (hook, outcomes) = recording_hook();
        let mut stream = Box::pin(TextStream::new(upstream, hook));

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        drop(stream);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0],
            StreamOutcome::Aborted {
                reason: AbortReason::DownstreamCancelled,
                stats,
            } if stats.fragments == 1
        ));
    }

    #[tokio::test]
    async fn test_drop_after_completion_does_not_report_again() {
        let upstream = futures_util::stream::iter(vec![ok(b"data: [DONE]\n")]);
        let (hook, outcomes) = recording_hook();
        let fragments = collect_text(TextStream::new(upstream, hook)).await;
        assert!(fragments.is_empty());
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_before_first_poll_still_closes() {
        let upstream = futures_util::stream::pending::<Result<Bytes, std::io::Error>>();
        let (hook, outcomes) = recording_hook();
        drop(TextStream::new(upstream, hook));
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_stream_drops_upstream() {
        struct DropFlag(Arc<Mutex<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                *self.0.lock().unwrap() = true;
            }
        }

        let dropped = Arc::new(Mutex::new(false));
        let flag = DropFlag(Arc::clone(&dropped));
        let upstream = futures_util::stream::pending::<Result<Bytes, std::io::Error>>()
            .map(move |item| {
                let _keep = &flag;
                item
            });
        let (hook, _outcomes) = recording_hook();
        let stream = TextStream::new(upstream, hook);
        assert!(!*dropped.lock().unwrap());
        drop(stream);
        assert!(*dropped.lock().unwrap());
    }

    #[tokio::test]
    async fn test_single_byte_reads_match_whole_read() {
        const INPUT: &[u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\
data: noise\n\
data: {\"choices\":[{\"delta\":{\"content\":\"there\"}}]}\n\
data: [DONE]\n";
        let whole = futures_util::stream::iter(vec![ok(INPUT)]);
        let (hook, _) = recording_hook();
        let expected = collect_text(TextStream::new(whole, hook)).await;

        let bytewise = futures_util::stream::iter(
            INPUT
                .chunks(1)
                .map(|b| Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(b)))
                .collect::<Vec<_>>(),
        );
        let (hook, _) = recording_hook();
        let actual = collect_text(TextStream::new(bytewise, hook)).await;

        assert_eq!(expected, vec!["Hi ", "there"]);
        assert_eq!(actual, expected);
    }
}
