//! Mock collaborators and end-to-end runtime tests
//!
//! `MockProvider` replays queued frame scripts so sessions can be driven
//! through the real runtime without network access.

use crate::llm::{CompletionRequest, FrameStream, LlmError, ModelProvider};
use crate::stream::{encode_frame, StreamEvent};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Mock Provider
// ============================================================================

/// One scripted provider response
pub struct Script {
    open_error: Option<LlmError>,
    before: Vec<Vec<u8>>,
    gate: Option<Arc<Notify>>,
    stall: bool,
    after: Vec<Vec<u8>>,
}

impl Script {
    /// A complete reply, one frame per word
    pub fn reply(text: &str) -> Self {
        Self {
            open_error: None,
            before: word_frames(text),
            gate: None,
            stall: false,
            after: vec![encode_frame(&StreamEvent::Done).into_bytes()],
        }
    }

    /// Some content, then an upstream error frame
    pub fn fails_with(partial: &str, message: &str) -> Self {
        Self {
            open_error: None,
            before: word_frames(partial),
            gate: None,
            stall: false,
            after: vec![encode_frame(&StreamEvent::error(message)).into_bytes()],
        }
    }

    /// The request is rejected before any frame
    pub fn open_error(error: LlmError) -> Self {
        Self {
            open_error: Some(error),
            before: vec![],
            gate: None,
            stall: false,
            after: vec![],
        }
    }

    /// Delivers `first` and then never finishes
    pub fn stalled(first: &str) -> Self {
        Self {
            open_error: None,
            before: word_frames(first),
            gate: None,
            stall: true,
            after: vec![],
        }
    }

    /// Delivers `first`, waits for the returned gate, then finishes with `rest`
    pub fn gated(first: &str, rest: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut after = word_frames(rest);
        after.push(encode_frame(&StreamEvent::Done).into_bytes());
        (
            Self {
                open_error: None,
                before: word_frames(first),
                gate: Some(gate.clone()),
                stall: false,
                after,
            },
            gate,
        )
    }

    fn into_stream(self) -> Result<FrameStream, LlmError> {
        if let Some(error) = self.open_error {
            return Err(error);
        }

        let Script {
            before,
            gate,
            stall,
            after,
            ..
        } = self;
        let rest = stream::once(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if stall {
                futures::future::pending::<()>().await;
            }
            stream::iter(after.into_iter().map(Ok))
        })
        .flatten();

        Ok(Box::pin(stream::iter(before.into_iter().map(Ok)).chain(rest)))
    }
}

fn word_frames(text: &str) -> Vec<Vec<u8>> {
    text.split_inclusive(' ')
        .map(|word| encode_frame(&StreamEvent::content(word)).into_bytes())
        .collect()
}

/// Provider that plays queued scripts in order and records requests
pub struct MockProvider {
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(script) => script.into_stream(),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::runtime::{RuntimeSettings, SessionEvent, SessionHandle, SessionStore};
    use crate::scenario::{ScenarioCatalog, ScenarioDefinition, ScenarioProvider, ScenarioStep};
    use crate::state_machine::{AdvancementPolicy, Event, Role, Session, SessionPhase};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc, watch};
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(5);

    fn catalog() -> Arc<ScenarioCatalog> {
        let scenario = ScenarioDefinition {
            id: "greet-explain".to_string(),
            key: Some("ge".to_string()),
            title: "Greet and explain".to_string(),
            description: "Test scenario".to_string(),
            ai_role: "Worried patient".to_string(),
            initial_prompt: "Doctor, what's going on?".to_string(),
            steps: vec![
                ScenarioStep {
                    name: "Greet".to_string(),
                    keywords: vec!["hello".to_string()],
                    guidance_cue: "Ask who they are.".to_string(),
                },
                ScenarioStep {
                    name: "Explain".to_string(),
                    keywords: vec!["because".to_string()],
                    guidance_cue: String::new(),
                },
            ],
        };
        Arc::new(ScenarioCatalog::from_definitions(vec![scenario]).unwrap())
    }

    fn store_with(settings: RuntimeSettings) -> (Arc<SessionStore>, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(SessionStore::new(catalog(), provider.clone(), settings));
        (store, provider)
    }

    fn store() -> (Arc<SessionStore>, Arc<MockProvider>) {
        store_with(RuntimeSettings::default())
    }

    /// Wait for the event that ends `exchange`
    async fn wait_for_end(events: &mut broadcast::Receiver<SessionEvent>, exchange: u64) -> SessionEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.unwrap();
                let ended = match &event {
                    SessionEvent::ExchangeCompleted { exchange: e, .. }
                    | SessionEvent::ExchangeFailed { exchange: e, .. }
                    | SessionEvent::ExchangeCancelled { exchange: e, .. } => *e == exchange,
                    _ => false,
                };
                if ended {
                    return event;
                }
            }
        })
        .await
        .expect("exchange did not end in time")
    }

    async fn wait_for_fragment(events: &mut broadcast::Receiver<SessionEvent>) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                if let SessionEvent::Fragment { delta, .. } = events.recv().await.unwrap() {
                    return delta;
                }
            }
        })
        .await
        .expect("no fragment arrived")
    }

    /// Submit a user turn and wait until its exchange ends
    async fn exchange(handle: &SessionHandle, text: &str) -> (SessionEvent, Session) {
        let mut events = handle.subscribe();
        let started = handle.send(Event::user_turn(text)).await.unwrap();
        let exchange = started.phase.exchange().unwrap();
        let end = wait_for_end(&mut events, exchange).await;
        (end, handle.snapshot())
    }

    #[tokio::test]
    async fn test_create_opens_with_initial_prompt() {
        let (store, _) = store();
        let handle = store.create("ge").await.unwrap();
        let session = handle.snapshot();

        assert_eq!(session.scenario_id, "greet-explain");
        assert_eq!(session.transcript.len(), 1);
        assert_eq!(session.transcript[0].role, Role::Assistant);
        assert_eq!(session.phase, SessionPhase::AwaitingUserInput);
        assert!(store.get(handle.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let (store, _) = store();
        assert!(matches!(store.create("missing").await, Err(SessionError::NotFound(_))));
        assert!(matches!(store.get("missing").await, Err(SessionError::SessionNotFound(_))));
        assert!(matches!(store.evaluate("missing").await, Err(SessionError::SessionNotFound(_))));
        assert!(matches!(store.close("missing").await, Err(SessionError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_greet_and_explain_walkthrough() {
        let (store, provider) = store();
        provider.queue(Script::reply("Who are you?"));
        provider.queue(Script::reply("Okay."));
        let handle = store.create("greet-explain").await.unwrap();

        let (end, session) = exchange(&handle, "hello, I'm Dr. Smith").await;
        match end {
            SessionEvent::ExchangeCompleted { message, progress, .. } => {
                assert_eq!(message, "Who are you?");
                assert_eq!(progress.current_step_index, 0);
            }
            other => panic!("unexpected end: {other:?}"),
        }
        assert_eq!(session.transcript.len(), 3);
        assert_eq!(session.transcript[2].content, "Who are you?");

        let (_, session) = exchange(&handle, "I'm the doctor looking after you").await;
        assert_eq!(session.current_step_index, 1);
        assert_eq!(session.completed_steps.iter().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(session.phase, SessionPhase::AwaitingUserInput);

        let report = store.evaluate(handle.id()).await.unwrap();
        assert!((report.steps[0].score - 1.0).abs() < 1e-9);
        assert!(report.steps[1].score.abs() < 1e-9);
        assert!((report.overall_score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fragments_are_broadcast_in_order() {
        let (store, provider) = store();
        provider.queue(Script::reply("I feel so scared"));
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        handle.send(Event::user_turn("hello")).await.unwrap();
        let mut text = String::new();
        loop {
            match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
                SessionEvent::Fragment { delta, .. } => text.push_str(&delta),
                SessionEvent::ExchangeCompleted { message, .. } => {
                    assert_eq!(message, text);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(text, "I feel so scared");
    }

    #[tokio::test]
    async fn test_second_submit_while_streaming_is_rejected() {
        let (store, provider) = store();
        let (script, gate) = Script::gated("Well ", "then.");
        provider.queue(script);
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        let started = handle.send(Event::user_turn("hello")).await.unwrap();
        let second = handle.send(Event::user_turn("are you there?")).await;
        assert!(matches!(second, Err(SessionError::InvalidState(_))));

        gate.notify_one();
        wait_for_end(&mut events, started.phase.exchange().unwrap()).await;

        let session = handle.snapshot();
        let user_turns: Vec<_> = session.user_turns().map(|t| t.content.clone()).collect();
        assert_eq!(user_turns, vec!["hello"]);
        assert_eq!(session.transcript.last().unwrap().content, "Well then.");
    }

    #[tokio::test]
    async fn test_concurrent_submits_admit_exactly_one() {
        let (store, provider) = store();
        let (script, gate) = Script::gated("One ", "at a time.");
        provider.queue(script);
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        let (first, second) = tokio::join!(
            handle.send(Event::user_turn("hello")),
            handle.send(Event::user_turn("hello again")),
        );
        let (accepted, rejected) = match (first, second) {
            (Ok(session), Err(e)) | (Err(e), Ok(session)) => (session, e),
            other => panic!("expected one accepted and one rejected submit, got {other:?}"),
        };
        assert!(matches!(rejected, SessionError::InvalidState(_)));

        gate.notify_one();
        wait_for_end(&mut events, accepted.phase.exchange().unwrap()).await;

        let session = handle.snapshot();
        assert_eq!(session.user_turns().count(), 1);
        assert_eq!(session.transcript.len(), 3);
        assert_eq!(session.transcript.last().unwrap().content, "One at a time.");
        assert_eq!(provider.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_discards_partial_text() {
        let (store, provider) = store();
        provider.queue(Script::stalled("I was just "));
        provider.queue(Script::reply("Sorry, go on."));
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        handle.send(Event::user_turn("hello")).await.unwrap();
        wait_for_fragment(&mut events).await;

        let cancelled = handle.send(Event::Cancel { exchange: None }).await.unwrap();
        assert_eq!(cancelled.phase, SessionPhase::AwaitingUserInput);
        assert_eq!(cancelled.transcript.len(), 2);
        assert!(matches!(
            wait_for_end(&mut events, 1).await,
            SessionEvent::ExchangeCancelled { exchange: 1, .. }
        ));

        let (_, session) = exchange(&handle, "hello again").await;
        assert_eq!(session.transcript.last().unwrap().content, "Sorry, go on.");
        assert_eq!(session.exchanges_completed, 1);
    }

    #[tokio::test]
    async fn test_try_cancel_targets_one_exchange() {
        let (store, provider) = store();
        provider.queue(Script::stalled("Hmm "));
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        handle.send(Event::user_turn("hello")).await.unwrap();
        wait_for_fragment(&mut events).await;

        assert!(handle.try_cancel(1));
        wait_for_end(&mut events, 1).await;
        assert_eq!(handle.snapshot().phase, SessionPhase::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_try_cancel_survives_full_command_buffer() {
        let scenario = catalog().get_scenario("ge").unwrap();
        let session = Session::new("s1", &scenario);
        let (commands, mut command_rx) = mpsc::channel(1);
        let (_snapshot_tx, snapshot) = watch::channel(session);
        let (events, _) = broadcast::channel(4);
        let handle = SessionHandle {
            id: "s1".to_string(),
            scenario,
            commands,
            snapshot,
            events,
            shutdown: CancellationToken::new(),
        };

        assert!(handle.try_cancel(1));
        assert!(handle.try_cancel(2));

        for expected in [1, 2] {
            let command = tokio::time::timeout(WAIT, command_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                command.event,
                Event::Cancel {
                    exchange: Some(expected)
                }
            );
        }

        drop(command_rx);
        assert!(!handle.try_cancel(3));
    }

    #[tokio::test]
    async fn test_upstream_error_becomes_system_turn() {
        let (store, provider) = store();
        provider.queue(Script::fails_with("I think ", "rate limited"));
        let handle = store.create("ge").await.unwrap();

        let (end, session) = exchange(&handle, "hello").await;
        assert!(matches!(end, SessionEvent::ExchangeFailed { ref message, .. } if message == "rate limited"));

        let last = session.transcript.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.content, "Error: rate limited");
        assert_eq!(session.phase, SessionPhase::AwaitingUserInput);
        assert_eq!(session.exchanges_completed, 0);
    }

    #[tokio::test]
    async fn test_open_error_becomes_system_turn() {
        let (store, provider) = store();
        provider.queue(Script::open_error(LlmError::auth("invalid api key")));
        let handle = store.create("ge").await.unwrap();

        let (_, session) = exchange(&handle, "hello").await;
        assert_eq!(session.transcript.last().unwrap().content, "Error: invalid api key");
    }

    #[tokio::test]
    async fn test_exchange_timeout_settles_session() {
        let (store, provider) = store_with(RuntimeSettings {
            exchange_timeout: Duration::from_millis(50),
            ..RuntimeSettings::default()
        });
        provider.queue(Script::stalled("Uh "));
        let handle = store.create("ge").await.unwrap();

        let (end, session) = exchange(&handle, "hello").await;
        assert!(matches!(end, SessionEvent::ExchangeFailed { .. }));
        assert_eq!(session.phase, SessionPhase::AwaitingUserInput);
        assert!(session
            .transcript
            .last()
            .unwrap()
            .content
            .starts_with("Error: No response from the model"));
    }

    #[tokio::test]
    async fn test_requests_carry_step_context_and_skip_system_turns() {
        let (store, provider) = store();
        provider.queue(Script::open_error(LlmError::network("reset")));
        provider.queue(Script::reply("Fine."));
        let handle = store.create("ge").await.unwrap();

        exchange(&handle, "hello").await;
        let mut events = handle.subscribe();
        handle
            .send(Event::UserTurn {
                text: "hello again".to_string(),
                model: Some("gpt-4o-mini".to_string()),
            })
            .await
            .unwrap();
        wait_for_end(&mut events, 2).await;

        let requests = provider.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].system.contains("Worried patient"));
        assert!(requests[0].system.contains("working on: Greet. Ask who they are."));
        assert_eq!(requests[1].model.as_deref(), Some("gpt-4o-mini"));
        assert!(requests[1].messages.iter().all(|m| !m.content.starts_with("Error:")));
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_manual_advance_and_exhaustion() {
        let (store, _) = store();
        let handle = store.create("ge").await.unwrap();
        let mut events = handle.subscribe();

        let once = handle.send(Event::AdvanceStep).await.unwrap();
        assert_eq!(once.current_step_index, 1);
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Progress { .. }));

        let twice = handle.send(Event::AdvanceStep).await.unwrap();
        assert_eq!(twice.phase, SessionPhase::Exhausted);

        let again = handle.send(Event::AdvanceStep).await.unwrap();
        assert_eq!(again.current_step_index, 2);

        let rejected = handle.send(Event::user_turn("one more thing")).await;
        assert!(matches!(rejected, Err(SessionError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_restart_replaces_session() {
        let (store, provider) = store();
        provider.queue(Script::stalled("Wait "));
        let handle = store.create("ge").await.unwrap();
        let old_id = handle.id().to_string();
        let mut events = handle.subscribe();

        handle.send(Event::user_turn("hello")).await.unwrap();
        wait_for_fragment(&mut events).await;

        let fresh = store.restart(&old_id).await.unwrap();
        assert_ne!(fresh.id(), old_id);
        assert_eq!(fresh.snapshot().transcript.len(), 1);
        assert!(matches!(store.get(&old_id).await, Err(SessionError::SessionNotFound(_))));

        let restarted = tokio::time::timeout(WAIT, async {
            loop {
                if let SessionEvent::Restarted { new_session_id } = events.recv().await.unwrap() {
                    return new_session_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(restarted, fresh.id());
        assert_eq!(handle.snapshot().phase, SessionPhase::Restarted);
    }

    #[tokio::test]
    async fn test_restart_after_progress_starts_clean() {
        let (store, provider) = store();
        provider.queue(Script::reply("Who are you?"));
        provider.queue(Script::reply("Oh, I see."));
        let handle = store.create("ge").await.unwrap();

        exchange(&handle, "hello, I'm the doctor").await;
        let (_, advanced) = exchange(&handle, "because of the scan").await;
        assert_eq!(advanced.current_step_index, 1);
        let advanced = handle.send(Event::AdvanceStep).await.unwrap();
        assert_eq!(advanced.completed_steps.len(), 2);

        let fresh = store.restart(handle.id()).await.unwrap().snapshot();
        assert_ne!(fresh.id, advanced.id);
        assert_eq!(fresh.current_step_index, 0);
        assert!(fresh.completed_steps.is_empty());
        assert_eq!(fresh.transcript.len(), 1);
        assert_eq!(fresh.transcript[0].role, Role::Assistant);
        assert_eq!(fresh.transcript[0].content, "Doctor, what's going on?");
        assert_eq!(fresh.phase, SessionPhase::AwaitingUserInput);
    }

    #[tokio::test]
    async fn test_evaluate_requires_user_turns() {
        let (store, _) = store();
        let handle = store.create("ge").await.unwrap();
        assert_eq!(
            store.evaluate(handle.id()).await.unwrap_err(),
            SessionError::NoTranscript
        );
    }

    #[tokio::test]
    async fn test_close_and_evict() {
        let (store, _) = store_with(RuntimeSettings {
            idle_timeout: Duration::from_secs(60),
            ..RuntimeSettings::default()
        });
        let first = store.create("ge").await.unwrap();
        let second = store.create("ge").await.unwrap();
        assert_eq!(store.active_sessions().await.len(), 2);

        store.close(first.id()).await.unwrap();
        assert_eq!(store.active_sessions().await.len(), 1);

        assert_eq!(store.evict_idle(Utc::now()).await, 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(store.evict_idle(later).await, 1);
        assert!(store.get(second.id()).await.is_err());
    }

    #[tokio::test]
    async fn test_keyword_policy_through_runtime() {
        let (store, provider) = store_with(RuntimeSettings {
            policy: AdvancementPolicy::KeywordTriggered,
            ..RuntimeSettings::default()
        });
        provider.queue(Script::reply("Oh."));
        let handle = store.create("ge").await.unwrap();

        let (_, session) = exchange(&handle, "hello there").await;
        assert_eq!(session.current_step_index, 1);
    }
}
