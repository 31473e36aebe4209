//! Pure state transition function

use super::{Effect, Event, Notice, Session, SessionContext, SessionPhase, Turn};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_session: Session,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            new_session: session,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Transitions the current phase does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A response is still streaming; wait for it or cancel it first")]
    ResponsePending,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("All communication steps are complete; evaluate or restart the session")]
    Exhausted,
    #[error("Session has been restarted")]
    SessionRestarted,
    #[error("No response is in flight")]
    NoResponsePending,
    #[error("Event belongs to exchange {0}, which is no longer in flight")]
    StaleExchange(u64),
}

/// Pure transition function: same inputs, same outputs, no I/O.
pub fn transition(
    session: &Session,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (session.phase, event) {
        (SessionPhase::Restarted, _) => Err(TransitionError::SessionRestarted),

        // ============================================================
        // User turns
        // ============================================================
        (SessionPhase::AwaitingUserInput, Event::UserTurn { text, model }) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(TransitionError::EmptyMessage);
            }

            let mut next = session.clone();
            let exchange = session.last_exchange + 1;
            next.last_exchange = exchange;
            next.transcript.push(Turn::user(text));
            next.phase = SessionPhase::AwaitingAssistantResponse {
                exchange,
                step_index: session.current_step_index,
            };

            Ok(TransitionResult::new(next)
                .with_effect(Effect::PublishSnapshot)
                .with_effect(Effect::RequestCompletion {
                    exchange,
                    step_index: session.current_step_index,
                    model,
                }))
        }

        (SessionPhase::AwaitingAssistantResponse { .. }, Event::UserTurn { .. }) => {
            Err(TransitionError::ResponsePending)
        }

        (SessionPhase::Exhausted, Event::UserTurn { .. }) => Err(TransitionError::Exhausted),

        // ============================================================
        // Exchange endings
        // ============================================================
        (
            SessionPhase::AwaitingAssistantResponse {
                exchange,
                step_index,
            },
            Event::AssistantComplete {
                exchange: finished,
                text,
            },
        ) if finished == exchange => {
            let mut next = session.clone();
            next.transcript.push(Turn::assistant(text.clone()));
            next.exchanges_completed += 1;

            if context
                .policy
                .should_advance(&next, &context.scenario, step_index)
            {
                complete_step(&mut next, step_index);
            }
            next.phase = settled_phase(&next);

            Ok(TransitionResult::new(next)
                .with_effect(Effect::PublishSnapshot)
                .with_effect(Effect::notify_completed(exchange, text)))
        }

        (
            SessionPhase::AwaitingAssistantResponse { exchange, .. },
            Event::AssistantError {
                exchange: failed,
                message,
            },
        ) if failed == exchange => {
            let mut next = session.clone();
            next.transcript.push(Turn::system(format!("Error: {message}")));
            next.phase = settled_phase(&next);

            Ok(TransitionResult::new(next)
                .with_effect(Effect::PublishSnapshot)
                .with_effect(Effect::notify_failed(exchange, message)))
        }

        (SessionPhase::AwaitingAssistantResponse { exchange, .. }, Event::Cancel { exchange: target })
            if target.map_or(true, |t| t == exchange) =>
        {
            let mut next = session.clone();
            next.phase = settled_phase(&next);

            Ok(TransitionResult::new(next)
                .with_effect(Effect::AbortCompletion)
                .with_effect(Effect::PublishSnapshot)
                .with_effect(Effect::Notify(Notice::ExchangeCancelled { exchange })))
        }

        (
            SessionPhase::AwaitingAssistantResponse { .. },
            Event::AssistantComplete { exchange, .. }
            | Event::AssistantError { exchange, .. }
            | Event::Cancel {
                exchange: Some(exchange),
            },
        ) => Err(TransitionError::StaleExchange(exchange)),

        (
            _,
            Event::AssistantComplete { exchange, .. } | Event::AssistantError { exchange, .. },
        ) if exchange <= session.last_exchange => Err(TransitionError::StaleExchange(exchange)),

        (_, Event::AssistantComplete { .. } | Event::AssistantError { .. } | Event::Cancel { .. }) => {
            Err(TransitionError::NoResponsePending)
        }

        // ============================================================
        // Manual advancement
        // ============================================================
        (SessionPhase::Exhausted, Event::AdvanceStep) => {
            Ok(TransitionResult::new(session.clone()))
        }

        (phase, Event::AdvanceStep) => {
            let mut next = session.clone();
            let current = session.current_step_index;
            if current < session.step_count {
                next.completed_steps.insert(current);
                next.current_step_index = current + 1;
            }
            if !phase.is_streaming() {
                next.phase = settled_phase(&next);
            }

            Ok(TransitionResult::new(next)
                .with_effect(Effect::PublishSnapshot)
                .with_effect(Effect::Notify(Notice::ProgressChanged)))
        }

        // ============================================================
        // Restart
        // ============================================================
        (phase, Event::Restart) => {
            let mut next = session.clone();
            next.phase = SessionPhase::Restarted;

            let result = TransitionResult::new(next);
            let result = if phase.is_streaming() {
                result.with_effect(Effect::AbortCompletion)
            } else {
                result
            };
            Ok(result.with_effect(Effect::PublishSnapshot))
        }
    }
}

/// Mark the step an exchange began on as done. The index only moves
/// forward, so a manual advance during the exchange is not counted twice.
fn complete_step(session: &mut Session, step_index: usize) {
    if step_index < session.step_count {
        session.completed_steps.insert(step_index);
    }
    session.current_step_index = session
        .current_step_index
        .max(step_index + 1)
        .min(session.step_count);
}

/// Resting phase once nothing is streaming
fn settled_phase(session: &Session) -> SessionPhase {
    if session.is_exhausted() {
        SessionPhase::Exhausted
    } else {
        SessionPhase::AwaitingUserInput
    }
}
