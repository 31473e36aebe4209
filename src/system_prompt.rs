//! Completion request construction
//!
//! Builds the role-play instructions from the scenario and the active step,
//! and replays the visible conversation as chat history.

use crate::llm::{ChatMessage, CompletionRequest};
use crate::scenario::ScenarioDefinition;
use crate::state_machine::{Role, Session};
use std::fmt::Write;

/// Shared role-play rules for every scenario
const BASE_PROMPT: &str = r"You are role-playing a person in a medical communication training exercise. A trainee doctor is practising how to talk with you.

Stay in character for the whole conversation. Speak the way the person you play would speak: plain language, real emotions, no medical expertise beyond what the role describes. Never mention that this is a simulation, never coach the trainee, and never break character to evaluate them.

Keep each reply to a few sentences so the trainee has room to respond.";

const MAX_REPLY_TOKENS: u32 = 500;

/// Build the request for the exchange that began on `step_index`.
///
/// System turns (provider errors and similar notices) are not part of the
/// conversation the counterpart saw, so they are left out.
pub fn build_request(
    session: &Session,
    scenario: &ScenarioDefinition,
    step_index: usize,
    model: Option<String>,
) -> CompletionRequest {
    let messages = session
        .transcript
        .iter()
        .filter_map(|turn| match turn.role {
            Role::User => Some(ChatMessage::user(turn.content.clone())),
            Role::Assistant => Some(ChatMessage::assistant(turn.content.clone())),
            Role::System => None,
        })
        .collect();

    CompletionRequest {
        model,
        system: build_system_prompt(scenario, step_index),
        messages,
        max_tokens: Some(MAX_REPLY_TOKENS),
    }
}

fn build_system_prompt(scenario: &ScenarioDefinition, step_index: usize) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    let _ = write!(prompt, "\n\n## Your role\n\n{}", scenario.ai_role.trim());
    if !scenario.description.trim().is_empty() {
        let _ = write!(prompt, "\n\n## Situation\n\n{}", scenario.description.trim());
    }

    if let Some(step) = scenario.step(step_index) {
        let _ = write!(
            prompt,
            "\n\n## Current stage of the conversation\n\nThe trainee is working on: {}.",
            step.name
        );
        if !step.guidance_cue.trim().is_empty() {
            let _ = write!(prompt, " {}", step.guidance_cue.trim());
        }
    }

    prompt
}
