//! Producer/consumer bridge between a chat worker and the response stream.
//!
//! [`open`] creates an unbounded, ordered, single-producer/single-consumer
//! channel. The worker owns the [`StreamHandle`] and the transport owns the
//! [`EventStream`].
//!
//! ```text
//! Open ──emit──▶ Open ──finish──▶ Closed(Done)
//!                   └────fail───▶ Closed(Error)
//! ```
//!
//! Exactly one terminal event is ever delivered. `finish`/`fail` on a closed
//! handle are no-ops, and a handle dropped while still open (early return,
//! panic unwinding) closes the stream with an error so the consumer never
//! waits on a dead producer. Dropping the `EventStream` cancels: the next
//! `emit` reports it and `is_cancelled` turns true.

use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream_event::StreamEvent;

/// Create a connected handle/stream pair.
pub fn open() -> (StreamHandle, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamHandle { tx: Some(tx) },
        EventStream {
            rx: Some(rx),
            idle_timeout: None,
        },
    )
}

/// Producer side.
pub struct StreamHandle {
    tx: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl StreamHandle {
    /// Append a token.
    ///
    /// Returns `false` once the consumer has gone away; the caller should stop
    /// producing.
    ///
    /// # Panics
    ///
    /// Panics if the handle was already closed by `finish` or `fail`.
    pub fn emit(&mut self, token: impl Into<String>) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            panic!("StreamHandle::emit called after the stream was closed");
        };
        tx.send(StreamEvent::token(token)).is_ok()
    }

    /// Close the stream successfully.
    pub fn finish(&mut self) {
        self.close(StreamEvent::Done);
    }

    /// Close the stream with an error.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.close(StreamEvent::error(reason));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// The consumer dropped its end of the stream.
    pub fn is_cancelled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    fn close(&mut self, event: StreamEvent) {
        if let Some(tx) = self.tx.take() {
            debug!(event = event.event_type(), "Closing response stream");
            let _ = tx.send(event);
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.tx.is_some() {
            let reason = if std::thread::panicking() {
                "producer panicked"
            } else {
                "producer terminated without completing"
            };
            warn!(reason, "Response stream left open, closing with error");
            self.fail(reason);
        }
    }
}

/// Consumer side: a finite, non-restartable sequence of events.
pub struct EventStream {
    rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    idle_timeout: Option<Duration>,
}

impl EventStream {
    /// Fail the stream when no event arrives within `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Whether the stream has ended.
    pub fn is_terminated(&self) -> bool {
        self.rx.is_none()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` after the terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        let rx = self.rx.as_mut()?;

        let next = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs_f64(), "Response stream idle, giving up");
                    self.rx = None;
                    return Some(StreamEvent::error(format!(
                        "stream idle timeout after {}s",
                        limit.as_secs_f64()
                    )));
                }
            },
            None => rx.recv().await,
        };

        match next {
            Some(event) => {
                if event.is_terminal() {
                    self.rx = None;
                }
                Some(event)
            }
            None => {
                self.rx = None;
                None
            }
        }
    }

    /// Read every token until the stream ends, returning the joined text.
    pub async fn collect_text(mut self) -> Result<String, String> {
        let mut text = String::new();
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Token { content } => text.push_str(&content),
                StreamEvent::Done => return Ok(text),
                StreamEvent::Error { message } => return Err(message),
            }
        }
        Err("stream ended without a terminal event".into())
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }
}
