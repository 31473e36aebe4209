//! Session state types

use super::AdvancementPolicy;
use crate::scenario::ScenarioDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// Engine notices such as provider failures; never scored
    System,
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Where the conversation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Ready for the next user turn
    AwaitingUserInput,
    /// A model response is streaming
    AwaitingAssistantResponse {
        /// Exchange number, used to discard late events from older exchanges
        exchange: u64,
        /// Step that was active when the exchange began
        step_index: usize,
    },
    /// Every step is behind us; no further user turns
    Exhausted,
    /// Superseded by a fresh session (terminal)
    Restarted,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Restarted)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionPhase::AwaitingAssistantResponse { .. })
    }

    /// The in-flight exchange, if any
    pub fn exchange(&self) -> Option<u64> {
        match self {
            SessionPhase::AwaitingAssistantResponse { exchange, .. } => Some(*exchange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Restarted,
}

/// One conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub scenario_id: String,
    /// Append-only
    pub transcript: Vec<Turn>,
    /// Always `<= step_count`; equal means exhausted
    pub current_step_index: usize,
    pub completed_steps: BTreeSet<usize>,
    pub step_count: usize,
    pub phase: SessionPhase,
    /// Exchanges that ended with an assistant turn
    pub exchanges_completed: u64,
    /// Number of the most recently started exchange
    pub last_exchange: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session opened by the scenario's initial prompt
    pub fn new(id: impl Into<String>, scenario: &ScenarioDefinition) -> Self {
        let now = Utc::now();
        let step_count = scenario.step_count();
        Self {
            id: id.into(),
            scenario_id: scenario.id.clone(),
            transcript: vec![Turn::assistant(scenario.initial_prompt.clone())],
            current_step_index: 0,
            completed_steps: BTreeSet::new(),
            step_count,
            phase: if step_count == 0 {
                SessionPhase::Exhausted
            } else {
                SessionPhase::AwaitingUserInput
            },
            exchanges_completed: 0,
            last_exchange: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.phase.is_terminal() {
            SessionStatus::Restarted
        } else {
            SessionStatus::Active
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step_index >= self.step_count
    }

    pub fn user_turns(&self) -> impl Iterator<Item = &Turn> {
        self.transcript.iter().filter(|t| t.role == Role::User)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current_step_index: self.current_step_index,
            completed_steps: self.completed_steps.iter().copied().collect(),
            step_count: self.step_count,
            exhausted: self.is_exhausted(),
            phase: self.phase,
        }
    }
}

/// Step progression as shown to the trainee
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current_step_index: usize,
    pub completed_steps: Vec<usize>,
    pub step_count: usize,
    pub exhausted: bool,
    pub phase: SessionPhase,
}

/// Immutable configuration for one session
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub scenario: Arc<ScenarioDefinition>,
    pub policy: AdvancementPolicy,
}

impl SessionContext {
    pub fn new(scenario: Arc<ScenarioDefinition>, policy: AdvancementPolicy) -> Self {
        Self { scenario, policy }
    }
}
