//! Runtime for live training sessions
//!
//! Every session is owned by one [`SessionRuntime`] task. Callers talk to it
//! through a [`SessionHandle`]; the [`SessionStore`] keeps the handles of
//! all live sessions.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::error::SessionError;
use crate::evaluation::{evaluate, generate_feedback, EvaluationReport, FeedbackMode};
use crate::llm::ModelProvider;
use crate::scenario::{ScenarioDefinition, ScenarioProvider};
use crate::state_machine::{
    AdvancementPolicy, Event, Progress, Session, SessionContext, SessionPhase,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;
const BROADCAST_BUFFER: usize = 256;

/// Tunables for session runtimes
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub policy: AdvancementPolicy,
    /// Sessions untouched for this long are evicted by the sweeper
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Upper bound on one streaming exchange
    pub exchange_timeout: Duration,
    pub feedback: FeedbackMode,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            policy: AdvancementPolicy::default(),
            idle_timeout: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
            exchange_timeout: Duration::from_secs(120),
            feedback: FeedbackMode::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_secs)
        };

        let policy = match std::env::var("MEDCOMM_ADVANCEMENT") {
            Ok(name) => AdvancementPolicy::from_name(&name).unwrap_or_else(|| {
                tracing::warn!(value = %name, "Unknown MEDCOMM_ADVANCEMENT, using exchange pairs");
                AdvancementPolicy::default()
            }),
            Err(_) => defaults.policy,
        };

        Self {
            policy,
            idle_timeout: secs("MEDCOMM_SESSION_IDLE_SECS", defaults.idle_timeout),
            sweep_interval: secs("MEDCOMM_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            exchange_timeout: secs("MEDCOMM_EXCHANGE_TIMEOUT_SECS", defaults.exchange_timeout),
            feedback: std::env::var("MEDCOMM_GENERATIVE_FEEDBACK")
                .map(|v| FeedbackMode::from_flag(&v))
                .unwrap_or_default(),
        }
    }
}

/// A request to the session owner
#[derive(Debug)]
pub struct Command {
    pub event: Event,
    /// Receives the session after the transition, or why it was rejected
    pub reply: Option<oneshot::Sender<Result<Session, SessionError>>>,
}

/// Live events for observers of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new piece of the streaming assistant turn
    Fragment { exchange: u64, delta: String },
    ExchangeCompleted {
        exchange: u64,
        message: String,
        progress: Progress,
    },
    ExchangeFailed {
        exchange: u64,
        message: String,
        progress: Progress,
    },
    ExchangeCancelled { exchange: u64, progress: Progress },
    Progress { progress: Progress },
    /// The session was replaced; follow `new_session_id`
    Restarted { new_session_id: String },
    /// The session was closed or evicted
    Closed,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    scenario: Arc<ScenarioDefinition>,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Session>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scenario(&self) -> &Arc<ScenarioDefinition> {
        &self.scenario
    }

    /// Latest published state, without waiting on the owner
    pub fn snapshot(&self) -> Session {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Apply an event and wait for the resulting session
    pub async fn send(&self, event: Event) -> Result<Session, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command {
                event,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SessionError::SessionNotFound(self.id.clone()))?;
        response
            .await
            .map_err(|_| SessionError::SessionNotFound(self.id.clone()))?
    }

    /// Fire-and-forget cancellation for contexts that cannot await.
    ///
    /// A full command buffer hands the cancel to a spawned task instead of
    /// dropping it. Returns false only when it cannot be delivered at all.
    pub fn try_cancel(&self, exchange: u64) -> bool {
        let command = Command {
            event: Event::Cancel {
                exchange: Some(exchange),
            },
            reply: None,
        };
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(command)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(session_id = %self.id, exchange, "Command buffer full, cancel dropped");
                    return false;
                };
                tracing::debug!(session_id = %self.id, exchange, "Command buffer full, queueing cancel");
                let commands = self.commands.clone();
                runtime.spawn(async move {
                    let _ = commands.send(command).await;
                });
                true
            }
        }
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }
}

/// Listing entry for a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub scenario_id: String,
    pub phase: SessionPhase,
    pub current_step_index: usize,
    pub step_count: usize,
    pub turns: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            scenario_id: session.scenario_id.clone(),
            phase: session.phase,
            current_step_index: session.current_step_index,
            step_count: session.step_count,
            turns: session.transcript.len(),
            updated_at: session.updated_at,
        }
    }
}

/// Registry of all live sessions
pub struct SessionStore {
    scenarios: Arc<dyn ScenarioProvider>,
    provider: Arc<dyn ModelProvider>,
    settings: RuntimeSettings,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new(
        scenarios: Arc<dyn ScenarioProvider>,
        provider: Arc<dyn ModelProvider>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            scenarios,
            provider,
            settings,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn scenarios(&self) -> &Arc<dyn ScenarioProvider> {
        &self.scenarios
    }

    /// Start a session on a scenario (by id or key)
    pub async fn create(&self, scenario_id: &str) -> Result<SessionHandle, SessionError> {
        let scenario = self.scenarios.get_scenario(scenario_id)?;
        let session = Session::new(uuid::Uuid::new_v4().to_string(), &scenario);
        let id = session.id.clone();

        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot) = watch::channel(session.clone());
        let (events, _) = broadcast::channel(BROADCAST_BUFFER);
        let shutdown = CancellationToken::new();

        let runtime = SessionRuntime::new(
            SessionContext::new(scenario.clone(), self.settings.policy),
            session,
            self.provider.clone(),
            self.settings.exchange_timeout,
            command_rx,
            snapshot_tx,
            events.clone(),
            shutdown.clone(),
        );
        tokio::spawn(runtime.run());

        let handle = SessionHandle {
            id: id.clone(),
            scenario,
            commands,
            snapshot,
            events,
            shutdown,
        };
        self.sessions.write().await.insert(id.clone(), handle.clone());

        tracing::info!(session_id = %id, scenario = %handle.scenario.id, "Session created");
        Ok(handle)
    }

    pub async fn get(&self, id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }

    /// Retire a session and start a fresh one on the same scenario.
    ///
    /// The old id stops resolving; observers of the old session are told
    /// the new id.
    pub async fn restart(&self, id: &str) -> Result<SessionHandle, SessionError> {
        let old = self.get(id).await?;
        old.send(Event::Restart).await?;
        self.sessions.write().await.remove(id);

        let fresh = self.create(&old.scenario.id).await?;
        old.notify(SessionEvent::Restarted {
            new_session_id: fresh.id.clone(),
        });
        old.stop();

        tracing::info!(old_session = %id, session_id = %fresh.id, "Session restarted");
        Ok(fresh)
    }

    /// Drop a session, aborting any in-flight exchange
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))?;
        handle.notify(SessionEvent::Closed);
        handle.stop();
        tracing::info!(session_id = %id, "Session closed");
        Ok(())
    }

    /// Score the session's transcript as it stands right now
    pub async fn evaluate(&self, id: &str) -> Result<EvaluationReport, SessionError> {
        let handle = self.get(id).await?;
        let session = handle.snapshot();
        let mut report = evaluate(&session.transcript, &handle.scenario)?;

        report.feedback = generate_feedback(
            self.settings.feedback,
            &report,
            &session.transcript,
            &handle.scenario,
            self.provider.as_ref(),
        )
        .await;

        tracing::info!(
            session_id = %id,
            overall_score = report.overall_score,
            "Session evaluated"
        );
        Ok(report)
    }

    pub async fn active_sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(|h| SessionSummary::from(&h.snapshot()))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Remove sessions idle since before `now - idle_timeout`.
    ///
    /// A session with a response in flight is never idle.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let idle = chrono::Duration::from_std(self.settings.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = now - idle;

        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, h)| {
                let snapshot = h.snapshot.borrow();
                !snapshot.phase.is_streaming() && snapshot.updated_at <= cutoff
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            if let Some(handle) = sessions.remove(id) {
                handle.notify(SessionEvent::Closed);
                handle.stop();
                tracing::info!(session_id = %id, "Evicted idle session");
            }
        }
        stale.len()
    }

    /// Periodically evict idle sessions
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = self.settings.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.evict_idle(Utc::now()).await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Idle sweep finished");
                }
            }
        })
    }
}
