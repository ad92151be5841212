//! Stream driver: pulls bytes from an upstream completion stream and forwards
//! decoded text fragments to a downstream sink, in arrival order.
//!
//! One driver serves one client request. It owns its frame buffer, so
//! concurrent relays never share mutable state.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use shared::events::{DiagnosticKind, RelayDiagnostic};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::openai::decode_delta;
use crate::sse::{parse_frame, FrameAssembler};

/// Fragments buffered between the driver and the HTTP body before the driver
/// waits on the client.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Receives every [`RelayDiagnostic`] the driver produces.
pub type DiagnosticHook = Arc<dyn Fn(&RelayDiagnostic) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    /// The sentinel was seen.
    Terminated,
    /// Upstream ended without a sentinel.
    UpstreamClosed,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    UpstreamRead(String),
    UpstreamTimeout,
    ClientDisconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub state: RelayState,
    /// Number of fragments written downstream
    pub fragments: usize,
    /// Total bytes written downstream
    pub bytes: usize,
}

impl RelayOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(
            self.state,
            RelayState::Terminated | RelayState::UpstreamClosed
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("downstream receiver closed")]
pub struct SinkClosed;

/// Downstream end of a relay.
#[async_trait]
pub trait RelaySink: Send + Sync {
    /// Write one fragment and make it visible to the client right away.
    async fn forward(&mut self, delta: &str) -> Result<(), SinkClosed>;

    /// Close the downstream stream.
    async fn finish(&mut self);

    /// Resolves once the downstream consumer is gone. Sinks that cannot tell
    /// never resolve.
    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

/// Sink backed by a bounded channel whose receiving half is the HTTP body.
///
/// Each fragment is one channel message and therefore one body chunk.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<String>>,
}

impl ChannelSink {
    /// Create a sink and the body stream that drains it. Dropping the stream
    /// (client disconnect) closes the sink.
    pub fn channel(capacity: usize) -> (Self, impl Stream<Item = String> + Send + 'static) {
        let (tx, rx) = mpsc::channel(capacity);
        let body = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        (Self { tx: Some(tx) }, body)
    }
}

#[async_trait]
impl RelaySink for ChannelSink {
    async fn forward(&mut self, delta: &str) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        tx.send(delta.to_owned()).await.map_err(|_| SinkClosed)
    }

    async fn finish(&mut self) {
        self.tx.take();
    }

    async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => futures::future::pending::<()>().await,
        }
    }
}

/// Default hook: log through tracing.
pub fn log_diagnostic(diag: &RelayDiagnostic) {
    if diag.is_recoverable() {
        tracing::debug!(kind = ?diag.kind, payload = ?diag.payload, "{}", diag.detail);
    } else {
        tracing::warn!(kind = ?diag.kind, "{}", diag.detail);
    }
}

enum Flow {
    Continue,
    Terminated,
    Disconnected,
}

enum Read<B> {
    Chunk(B),
    End,
    Failed(String),
    TimedOut,
    Disconnected,
}

pub struct RelayDriver<S> {
    sink: S,
    assembler: FrameAssembler,
    state: RelayState,
    diagnostics: DiagnosticHook,
    read_timeout: Option<Duration>,
    fragments: usize,
    bytes: usize,
}

impl<S: RelaySink> RelayDriver<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            assembler: FrameAssembler::new(),
            state: RelayState::Idle,
            diagnostics: Arc::new(log_diagnostic),
            read_timeout: None,
            fragments: 0,
            bytes: 0,
        }
    }

    pub fn with_diagnostics(mut self, hook: DiagnosticHook) -> Self {
        self.diagnostics = hook;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Relay `upstream` until the sentinel, end of stream, a read failure or
    /// client disconnect.
    ///
    /// Call only after upstream answered with a success status. The upstream
    /// stream is dropped on return, which releases its connection.
    pub async fn run<U, B, E>(mut self, upstream: U) -> RelayOutcome
    where
        U: Stream<Item = Result<B, E>> + Send,
        B: AsRef<[u8]> + Send,
        E: Display + Send,
    {
        let mut upstream = std::pin::pin!(upstream);
        self.state = RelayState::Streaming;

        loop {
            // The upstream read is the only suspension point, and it always
            // races the client going away.
            let read = tokio::select! {
                biased;
                _ = self.sink.closed() => Read::Disconnected,
                read = next_chunk(&mut upstream, self.read_timeout) => read,
            };

            match read {
                Read::Chunk(chunk) => {
                    let frames = self.assembler.push(chunk.as_ref());
                    let total = frames.len();
                    for (index, frame) in frames.into_iter().enumerate() {
                        match self.process_frame(&frame).await {
                            Flow::Continue => {}
                            Flow::Terminated => {
                                self.discard_after_sentinel(total - index - 1);
                                return self.finish(RelayState::Terminated).await;
                            }
                            Flow::Disconnected => return self.disconnected().await,
                        }
                    }
                }
                Read::End => {
                    // Best effort on a trailing frame that never got its delimiter.
                    if let Some(rest) = self.assembler.finish() {
                        match self.process_frame(&rest).await {
                            Flow::Continue => {}
                            Flow::Terminated => return self.finish(RelayState::Terminated).await,
                            Flow::Disconnected => return self.disconnected().await,
                        }
                    }
                    return self.finish(RelayState::UpstreamClosed).await;
                }
                Read::Failed(message) => {
                    self.report(RelayDiagnostic::new(
                        DiagnosticKind::UpstreamReadError,
                        format!("upstream read failed: {}", message),
                    ));
                    let reason = FailureReason::UpstreamRead(message);
                    return self.finish(RelayState::Failed(reason)).await;
                }
                Read::TimedOut => {
                    self.report(RelayDiagnostic::new(
                        DiagnosticKind::UpstreamTimeout,
                        "upstream read timed out",
                    ));
                    let reason = FailureReason::UpstreamTimeout;
                    return self.finish(RelayState::Failed(reason)).await;
                }
                Read::Disconnected => return self.disconnected().await,
            }
        }
    }

    /// Parser → decoder → writer for one frame.
    async fn process_frame(&mut self, frame: &str) -> Flow {
        let event = parse_frame(frame);

        for payload in &event.payloads {
            let delta = match decode_delta(payload) {
                Ok(delta) => delta,
                Err(e) => {
                    self.report(RelayDiagnostic::malformed_payload(
                        payload.as_str(),
                        e.to_string(),
                    ));
                    None
                }
            };
            let Some(text) = delta else {
                continue;
            };
            if self.sink.forward(&text).await.is_err() {
                return Flow::Disconnected;
            }
            self.fragments += 1;
            self.bytes += text.len();
        }

        if event.terminal {
            Flow::Terminated
        } else {
            Flow::Continue
        }
    }

    /// Frames and bytes already received after the sentinel are dropped
    /// unprocessed.
    fn discard_after_sentinel(&mut self, frames_skipped: usize) {
        let pending = self.assembler.pending().len();
        if frames_skipped == 0 && pending == 0 {
            return;
        }
        self.report(RelayDiagnostic::new(
            DiagnosticKind::RemainderDiscarded,
            format!(
                "discarded {} frame(s) and {} buffered byte(s) after the sentinel",
                frames_skipped, pending
            ),
        ));
        self.assembler.finish();
    }

    async fn disconnected(self) -> RelayOutcome {
        self.report(RelayDiagnostic::new(
            DiagnosticKind::ClientDisconnected,
            "downstream client disconnected, abandoning upstream",
        ));
        self.finish(RelayState::Failed(FailureReason::ClientDisconnected))
            .await
    }

    async fn finish(mut self, state: RelayState) -> RelayOutcome {
        self.sink.finish().await;
        self.state = state;
        RelayOutcome {
            state: self.state,
            fragments: self.fragments,
            bytes: self.bytes,
        }
    }

    fn report(&self, diag: RelayDiagnostic) {
        (self.diagnostics)(&diag);
    }
}

async fn next_chunk<U, B, E>(upstream: &mut U, timeout: Option<Duration>) -> Read<B>
where
    U: Stream<Item = Result<B, E>> + Unpin,
    E: Display,
{
    let next = match timeout {
        Some(limit) => match tokio::time::timeout(limit, upstream.next()).await {
            Ok(next) => next,
            Err(_) => return Read::TimedOut,
        },
        None => upstream.next().await,
    };

    match next {
        Some(Ok(chunk)) => Read::Chunk(chunk),
        Some(Err(e)) => Read::Failed(e.to_string()),
        None => Read::End,
    }
}
