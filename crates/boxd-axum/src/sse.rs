//! SSE plumbing: typed event channels become `text/event-stream` bodies.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

/// Wrap a typed receiver as an SSE response. Each event is serialized to
/// JSON as the `data:` payload; the stream ends when the channel closes.
pub fn sse_from_receiver<T>(
    rx: mpsc::Receiver<T>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>
where
    T: Serialize + Send + 'static,
{
    let stream = ReceiverStream::new(rx).filter_map(|event| {
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(e) => {
                tracing::warn!("failed to serialize stream event: {e}");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(keep_alive())
}

/// Wrap an ad-hoc event stream as an SSE response.
pub fn sse_from_stream<S, T>(
    events: S,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let stream = events.filter_map(|event| match serde_json::to_string(&event) {
        Ok(json) => Some(Ok(Event::default().data(json))),
        Err(e) => {
            tracing::warn!("failed to serialize stream event: {e}");
            None
        }
    });
    Sse::new(stream).keep_alive(keep_alive())
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}
