//! API request and response types

use crate::evaluation::{EvaluationReport, StepEvaluation};
use crate::runtime::SessionSummary;
use crate::scenario::{ScenarioDefinition, ScenarioSummary};
use crate::state_machine::{Progress, Session, SessionStatus, Turn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request to start a session
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub scenario_id: String,
}

/// Request to send a user turn
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Chat request in the shape older clients send
#[derive(Debug, Deserialize)]
pub struct LegacyChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Optional filter for the scenario info listing
#[derive(Debug, Deserialize)]
pub struct ScenarioInfoQuery {
    #[serde(default)]
    pub id: Option<String>,
}

/// Session-addressed request used by older clients
#[derive(Debug, Deserialize)]
pub struct SessionIdRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<ScenarioSummary>,
}

/// Step as shown to the trainee; keywords stay server-side
#[derive(Debug, Serialize)]
pub struct StepInfo {
    pub name: String,
    pub guidance_cue: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub ai_role: String,
    pub initial_prompt: String,
    pub steps: Vec<StepInfo>,
}

impl From<&ScenarioDefinition> for ScenarioResponse {
    fn from(scenario: &ScenarioDefinition) -> Self {
        Self {
            id: scenario.id.clone(),
            title: scenario.title.clone(),
            description: scenario.description.clone(),
            ai_role: scenario.ai_role.clone(),
            initial_prompt: scenario.initial_prompt.clone(),
            steps: scenario
                .steps
                .iter()
                .map(|s| StepInfo {
                    name: s.name.clone(),
                    guidance_cue: s.guidance_cue.clone(),
                })
                .collect(),
        }
    }
}

/// Scenario entry in the shape older clients list
#[derive(Debug, Serialize)]
pub struct ScenarioInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub ai_role: String,
    pub communication_steps: Vec<String>,
    /// Step name to cue; steps without a cue are left out
    pub guidance_cues: BTreeMap<String, String>,
}

impl From<&ScenarioDefinition> for ScenarioInfo {
    fn from(scenario: &ScenarioDefinition) -> Self {
        Self {
            id: scenario.id.clone(),
            title: scenario.title.clone(),
            description: scenario.description.clone(),
            ai_role: scenario.ai_role.clone(),
            communication_steps: scenario.steps.iter().map(|s| s.name.clone()).collect(),
            guidance_cues: scenario
                .steps
                .iter()
                .filter(|s| !s.guidance_cue.is_empty())
                .map(|s| (s.name.clone(), s.guidance_cue.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScenarioInfoResponse {
    pub scenarios: Vec<ScenarioInfo>,
}

/// Response for a newly started session
#[derive(Debug, Serialize)]
pub struct SessionStartResponse {
    pub session_id: String,
    pub scenario_id: String,
    pub title: String,
    pub ai_role: String,
    pub initial_prompt: String,
    pub steps: Vec<StepInfo>,
    pub progress: Progress,
}

impl SessionStartResponse {
    pub fn new(session: &Session, scenario: &ScenarioDefinition) -> Self {
        let scenario_view = ScenarioResponse::from(scenario);
        Self {
            session_id: session.id.clone(),
            scenario_id: scenario.id.clone(),
            title: scenario_view.title,
            ai_role: scenario_view.ai_role,
            initial_prompt: scenario_view.initial_prompt,
            steps: scenario_view.steps,
            progress: session.progress(),
        }
    }
}

/// `start_chat` response shape
#[derive(Debug, Serialize)]
pub struct StartChatResponse {
    pub session_id: String,
    pub initial_prompt: String,
    pub ai_role: String,
    pub communication_steps: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Full view of one session
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub scenario_id: String,
    pub status: SessionStatus,
    pub transcript: Vec<Turn>,
    pub progress: Progress,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            scenario_id: session.scenario_id.clone(),
            status: session.status(),
            transcript: session.transcript.clone(),
            progress: session.progress(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub session_id: String,
    pub progress: Progress,
}

#[derive(Debug, Serialize)]
pub struct EvaluationResponse {
    pub session_id: String,
    pub scenario_id: String,
    #[serde(flatten)]
    pub report: EvaluationReport,
}

/// `evaluate` response shape for older clients
#[derive(Debug, Serialize)]
pub struct LegacyEvaluationResponse {
    pub session_id: String,
    pub scenario_id: String,
    pub steps_evaluation: Vec<StepEvaluation>,
    pub overall_score: f64,
    pub feedback: String,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
