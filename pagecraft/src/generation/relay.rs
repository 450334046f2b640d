//! Streaming relay: forwards upstream bytes to the client while reconstructing the text.
//!
//! A spawned task reads the upstream body and pushes every chunk, unmodified, into a
//! bounded channel that backs the client response. The same bytes are fed to an
//! [`SseAccumulator`]. When the upstream ends, the task decides the [`StreamOutcome`] and
//! hands it to the completion callback *before* closing the client response, so a client
//! that reads to the end observes the persisted state.
//!
//! If the client goes away the channel send fails; the task then stops reading, which
//! drops the upstream connection.

use std::fmt::Display;
use std::future::Future;

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, warn};

use super::sse::SseAccumulator;

/// How a relayed stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Completion marker seen, client connected throughout, non-empty text
    Completed { text: String },
    /// Upstream closed without a completion marker
    Truncated { partial_len: usize },
    /// Completion marker seen but no content was produced
    Empty,
    /// Upstream transport failed mid-stream
    UpstreamFailed { error: String },
    /// The client stopped reading before the stream ended
    ClientDisconnected,
}

impl StreamOutcome {
    /// Label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed { .. } => "completed",
            StreamOutcome::Truncated { .. } => "truncated",
            StreamOutcome::Empty => "empty",
            StreamOutcome::UpstreamFailed { .. } => "upstream_failed",
            StreamOutcome::ClientDisconnected => "client_disconnected",
        }
    }
}

/// Relay `upstream` into a response body.
///
/// `on_finish` runs exactly once with the outcome. Only [`StreamOutcome::Completed`] should
/// lead to persistence.
pub fn relay_stream<S, E, F, Fut>(upstream: S, buffer: usize, on_finish: F) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(StreamOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(buffer.max(1));

    let task = async move {
        let outcome = pump(upstream, &tx).await;
        debug!(outcome = outcome.label(), "Stream relay finished");
        on_finish(outcome).await;
        // tx dropped here, which ends the client response
    };
    tokio::spawn(task.instrument(tracing::Span::current()));

    Body::from_stream(ReceiverStream::new(rx))
}

async fn pump<S, E>(upstream: S, tx: &mpsc::Sender<Result<Bytes, std::io::Error>>) -> StreamOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut accumulator = SseAccumulator::new();

    while let Some(item) = upstream.next().await {
        match item {
            Ok(chunk) => {
                accumulator.feed(&chunk);
                if tx.send(Ok(chunk)).await.is_err() {
                    debug!(received = accumulator.text().len(), "Client disconnected, abandoning upstream stream");
                    return StreamOutcome::ClientDisconnected;
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!(%error, "Upstream stream failed");
                let _ = tx.send(Err(std::io::Error::other(error.clone()))).await;
                return StreamOutcome::UpstreamFailed { error };
            }
        }
    }

    accumulator.finish();

    if tx.is_closed() {
        return StreamOutcome::ClientDisconnected;
    }
    if accumulator.malformed() > 0 {
        debug!(malformed = accumulator.malformed(), "Skipped malformed stream records");
    }
    if !accumulator.is_complete() {
        return StreamOutcome::Truncated {
            partial_len: accumulator.text().len(),
        };
    }
    if accumulator.text().trim().is_empty() {
        return StreamOutcome::Empty;
    }
    StreamOutcome::Completed {
        text: accumulator.into_text(),
    }
}
