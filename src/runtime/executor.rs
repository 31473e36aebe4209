//! Session runtime executor

use super::{Command, SessionEvent};
use crate::error::SessionError;
use crate::llm::{CompletionRequest, LlmError, ModelProvider};
use crate::state_machine::{transition, Effect, Event, Notice, Session, SessionContext};
use crate::stream::{accumulate, decode_stream, AccumulatorOutcome, MessageAccumulator};
use crate::system_prompt::build_request;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Owns one session: applies events in arrival order and runs effects
pub struct SessionRuntime {
    context: SessionContext,
    session: Session,
    provider: Arc<dyn ModelProvider>,
    exchange_timeout: Duration,
    commands: mpsc::Receiver<Command>,
    /// Results of spawned exchanges come back through here
    results_tx: mpsc::Sender<Event>,
    results_rx: mpsc::Receiver<Event>,
    snapshot_tx: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    /// Token of the in-flight exchange
    exchange_cancel: Option<CancellationToken>,
}

impl SessionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        session: Session,
        provider: Arc<dyn ModelProvider>,
        exchange_timeout: Duration,
        commands: mpsc::Receiver<Command>,
        snapshot_tx: watch::Sender<Session>,
        events: broadcast::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(4);
        Self {
            context,
            session,
            provider,
            exchange_timeout,
            commands,
            results_tx,
            results_rx,
            snapshot_tx,
            events,
            shutdown,
            exchange_cancel: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session.id, "Starting session runtime");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(event) = self.results_rx.recv() => {
                    if let Err(e) = self.process(event) {
                        // Late results from an exchange that was already settled
                        tracing::debug!(session_id = %self.session.id, error = %e, "Ignoring exchange result");
                    }
                }

                command = self.commands.recv() => match command {
                    Some(Command { event, reply }) => {
                        let result = self.process(event);
                        if let Err(e) = &result {
                            tracing::debug!(session_id = %self.session.id, error = %e, "Rejected event");
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    None => break,
                },
            }
        }

        if let Some(token) = self.exchange_cancel.take() {
            token.cancel();
        }
        tracing::info!(session_id = %self.session.id, "Session runtime stopped");
    }

    fn process(&mut self, event: Event) -> Result<Session, SessionError> {
        let result = transition(&self.session, &self.context, event)?;

        self.session = result.new_session;
        self.session.updated_at = Utc::now();

        for effect in result.effects {
            self.execute_effect(effect);
        }
        Ok(self.session.clone())
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::RequestCompletion {
                exchange,
                step_index,
                model,
            } => {
                let request = build_request(&self.session, &self.context.scenario, step_index, model);
                let cancel = CancellationToken::new();
                self.exchange_cancel = Some(cancel.clone());

                tracing::info!(
                    session_id = %self.session.id,
                    exchange,
                    step_index,
                    "Requesting completion"
                );

                tokio::spawn(run_exchange(
                    self.provider.clone(),
                    request,
                    exchange,
                    cancel,
                    self.exchange_timeout,
                    self.events.clone(),
                    self.results_tx.clone(),
                ));
            }

            Effect::AbortCompletion => {
                tracing::info!(session_id = %self.session.id, "Aborting completion");
                if let Some(token) = self.exchange_cancel.take() {
                    token.cancel();
                }
            }

            Effect::PublishSnapshot => {
                self.snapshot_tx.send_replace(self.session.clone());
            }

            Effect::Notify(notice) => {
                let progress = self.session.progress();
                let event = match notice {
                    Notice::ExchangeCompleted { exchange, message } => {
                        self.exchange_cancel = None;
                        SessionEvent::ExchangeCompleted {
                            exchange,
                            message,
                            progress,
                        }
                    }
                    Notice::ExchangeFailed { exchange, message } => {
                        self.exchange_cancel = None;
                        tracing::warn!(session_id = %self.session.id, exchange, error = %message, "Exchange failed");
                        SessionEvent::ExchangeFailed {
                            exchange,
                            message,
                            progress,
                        }
                    }
                    Notice::ExchangeCancelled { exchange } => {
                        SessionEvent::ExchangeCancelled { exchange, progress }
                    }
                    Notice::ProgressChanged => SessionEvent::Progress { progress },
                };
                // No subscribers is fine
                let _ = self.events.send(event);
            }
        }
    }
}

/// Stream one assistant turn and report how it ended.
///
/// A cancelled exchange reports nothing: the cancel transition has already
/// settled the session.
async fn run_exchange(
    provider: Arc<dyn ModelProvider>,
    request: CompletionRequest,
    exchange: u64,
    cancel: CancellationToken,
    limit: Duration,
    events: broadcast::Sender<SessionEvent>,
    results: mpsc::Sender<Event>,
) {
    let work = async {
        let frames = provider.stream(&request).await?;
        let mut accumulator = MessageAccumulator::with_observer(move |delta, _| {
            let _ = events.send(SessionEvent::Fragment {
                exchange,
                delta: delta.to_string(),
            });
        });
        Ok::<_, LlmError>(accumulate(decode_stream(frames), &mut accumulator, &cancel).await)
    };

    let outcome = tokio::select! {
        biased;

        () = cancel.cancelled() => AccumulatorOutcome::Cancelled,

        result = tokio::time::timeout(limit, work) => match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => AccumulatorOutcome::Failed(e.message),
            Err(_) => AccumulatorOutcome::Failed(format!(
                "No response from the model within {}s",
                limit.as_secs()
            )),
        },
    };

    let event = match outcome {
        AccumulatorOutcome::Completed(text) => Event::AssistantComplete { exchange, text },
        AccumulatorOutcome::Failed(message) => Event::AssistantError { exchange, message },
        AccumulatorOutcome::Cancelled => {
            tracing::info!(exchange, "Exchange cancelled");
            return;
        }
    };
    let _ = results.send(event).await;
}
