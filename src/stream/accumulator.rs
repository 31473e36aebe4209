//! Rebuilds one in-flight assistant message from content fragments

use super::frame::StreamEvent;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// How an accumulation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorOutcome {
    /// Completion marker seen; carries the full message text
    Completed(String),
    /// Upstream error; the partial text was discarded
    Failed(String),
    /// Abandoned by the caller; the partial text was discarded
    Cancelled,
}

type Observer = Box<dyn FnMut(&str, &str) + Send>;

/// Growing text buffer for exactly one assistant turn.
///
/// The buffer is owned here for the lifetime of the exchange. Display code
/// observes progress through the observer callback, which receives the new
/// fragment and the partial text so far.
#[derive(Default)]
pub struct MessageAccumulator {
    buffer: String,
    observer: Option<Observer>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: impl FnMut(&str, &str) + Send + 'static) -> Self {
        Self {
            buffer: String::new(),
            observer: Some(Box::new(observer)),
        }
    }

    /// Apply one event, returning the outcome once the turn is finished
    pub fn apply(&mut self, event: StreamEvent) -> Option<AccumulatorOutcome> {
        match event {
            StreamEvent::Content { text } => {
                self.buffer.push_str(&text);
                if let Some(observer) = self.observer.as_mut() {
                    observer(&text, &self.buffer);
                }
                None
            }
            StreamEvent::Done => Some(AccumulatorOutcome::Completed(std::mem::take(
                &mut self.buffer,
            ))),
            StreamEvent::Error { message } => {
                self.buffer.clear();
                Some(AccumulatorOutcome::Failed(message))
            }
        }
    }

    /// Abandon the in-flight turn
    pub fn cancel(&mut self) -> AccumulatorOutcome {
        self.buffer.clear();
        AccumulatorOutcome::Cancelled
    }

    /// Text received so far
    pub fn partial(&self) -> &str {
        &self.buffer
    }
}

/// Drive an event sequence into the accumulator until it finishes or the
/// token is cancelled. Cancellation takes priority over pending events.
pub async fn accumulate<S>(
    events: S,
    accumulator: &mut MessageAccumulator,
    cancel: &CancellationToken,
) -> AccumulatorOutcome
where
    S: Stream<Item = StreamEvent>,
{
    let mut events = std::pin::pin!(events);
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return accumulator.cancel(),

            next = events.next() => match next {
                Some(event) => {
                    if let Some(outcome) = accumulator.apply(event) {
                        return outcome;
                    }
                }
                None => {
                    tracing::debug!(
                        partial_len = accumulator.partial().len(),
                        "Event stream ended without a terminal event"
                    );
                    accumulator.buffer.clear();
                    return AccumulatorOutcome::Failed("stream ended before completion".to_string());
                }
            },
        }
    }
}
