//! Server-Sent Events support
//!
//! Two streams: the per-turn stream answering a user turn, and the session
//! event stream for observers.

use crate::runtime::{SessionEvent, SessionHandle};
use crate::state_machine::{Progress, Role, Session, Turn};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Cancels the exchange if the client goes away before it ends
struct CancelOnDrop {
    handle: SessionHandle,
    exchange: u64,
    armed: bool,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed && self.handle.try_cancel(self.exchange) {
            tracing::info!(
                session_id = %self.handle.id(),
                exchange = self.exchange,
                "Client disconnected, cancelling exchange"
            );
        }
    }
}

struct TurnStream {
    events: broadcast::Receiver<SessionEvent>,
    guard: CancelOnDrop,
}

impl TurnStream {
    /// Next frame for this exchange, or `None` once it has ended
    async fn next_frame(&mut self) -> Option<(Event, bool)> {
        let exchange = self.guard.exchange;
        loop {
            match self.events.recv().await {
                Ok(SessionEvent::Fragment { exchange: e, delta }) if e == exchange => {
                    return Some((content_frame(&delta), false));
                }
                Ok(SessionEvent::ExchangeCompleted {
                    exchange: e,
                    message,
                    progress,
                }) if e == exchange => return Some((done_frame(&message, &progress), true)),
                Ok(SessionEvent::ExchangeFailed {
                    exchange: e,
                    message,
                    progress,
                }) if e == exchange => return Some((error_frame(&message, Some(&progress)), true)),
                Ok(SessionEvent::ExchangeCancelled { exchange: e, progress }) if e == exchange => {
                    return Some((error_frame("Response cancelled", Some(&progress)), true));
                }
                Ok(SessionEvent::Restarted { .. }) => {
                    return Some((error_frame("Session restarted", None), true));
                }
                Ok(SessionEvent::Closed) | Err(RecvError::Closed) => {
                    return Some((error_frame("Session closed", None), true));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Turn stream lagged");
                    if let Some(frame) = self.settled_from_snapshot() {
                        return Some((frame, true));
                    }
                }
            }
        }
    }

    /// If the exchange ended while we were lagging, answer from the snapshot
    fn settled_from_snapshot(&self) -> Option<Event> {
        let session = self.guard.handle.snapshot();
        if session.phase.exchange() == Some(self.guard.exchange) {
            return None;
        }
        let progress = session.progress();
        let frame = match exchange_reply(&session, self.guard.exchange) {
            Some(turn) if turn.role == Role::Assistant => done_frame(&turn.content, &progress),
            Some(turn) => {
                let message = turn.content.strip_prefix("Error: ").unwrap_or(&turn.content);
                error_frame(message, Some(&progress))
            }
            None => error_frame("Response cancelled", Some(&progress)),
        };
        Some(frame)
    }
}

/// The assistant or system turn that answered `exchange`, if any.
///
/// Every exchange opens with exactly one user turn, so the exchange's user
/// turn is found by counting back from the newest one. Later exchanges may
/// already have been appended after it.
fn exchange_reply(session: &Session, exchange: u64) -> Option<&Turn> {
    let newer = usize::try_from(session.last_exchange.checked_sub(exchange)?).ok()?;
    let user_index = session
        .transcript
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, turn)| turn.role == Role::User)
        .nth(newer)
        .map(|(index, _)| index)?;
    session
        .transcript
        .get(user_index + 1)
        .filter(|turn| turn.role != Role::User)
}

/// Stream the answer to one user turn.
///
/// Dropping the stream before the exchange ends cancels the exchange.
pub fn turn_stream(
    handle: SessionHandle,
    events: broadcast::Receiver<SessionEvent>,
    exchange: u64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let state = TurnStream {
        events,
        guard: CancelOnDrop {
            handle,
            exchange,
            armed: true,
        },
    };

    let frames = stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        let (frame, terminal) = state.next_frame().await?;
        if terminal {
            state.guard.disarm();
            Some((Ok::<_, Infallible>(frame), None))
        } else {
            Some((Ok(frame), Some(state)))
        }
    });

    Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

fn content_frame(delta: &str) -> Event {
    Event::default().data(json!({ "content": delta }).to_string())
}

fn done_frame(message: &str, progress: &Progress) -> Event {
    Event::default().data(
        json!({
            "done": true,
            "message": message,
            "progress": progress,
        })
        .to_string(),
    )
}

fn error_frame(message: &str, progress: Option<&Progress>) -> Event {
    let payload = match progress {
        Some(progress) => json!({ "error": message, "progress": progress }),
        None => json!({ "error": message }),
    };
    Event::default().data(payload.to_string())
}

/// Observer stream: an init snapshot, then every session event
pub fn session_events(handle: &SessionHandle) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = handle.subscribe();
    let session = handle.snapshot();

    let init = json!({
        "type": "init",
        "session_id": session.id,
        "scenario_id": session.scenario_id,
        "transcript": session.transcript,
        "progress": session.progress(),
    });
    let init = stream::once(async move { Ok(Event::default().event("init").data(init.to_string())) });

    let broadcasts = BroadcastStream::new(events).filter_map(|result| match result {
        Ok(event) => Some(Ok(session_event_to_sse(&event))),
        Err(e) => {
            tracing::debug!(error = %e, "Event stream lagged");
            None
        }
    });

    Sse::new(init.chain(broadcasts)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

fn session_event_to_sse(event: &SessionEvent) -> Event {
    let name = match event {
        SessionEvent::Fragment { .. } => "fragment",
        SessionEvent::ExchangeCompleted { .. } => "exchange_completed",
        SessionEvent::ExchangeFailed { .. } => "exchange_failed",
        SessionEvent::ExchangeCancelled { .. } => "exchange_cancelled",
        SessionEvent::Progress { .. } => "progress",
        SessionEvent::Restarted { .. } => "restarted",
        SessionEvent::Closed => "closed",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| json!({ "type": name }).to_string());
    Event::default().event(name).data(data)
}
