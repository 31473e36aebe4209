//! Model-written evaluation feedback
//!
//! Asks the model provider for a short coaching summary of an already
//! scored transcript. The scores are passed in, never recomputed, and any
//! failure falls back to the template text.

use super::EvaluationReport;
use crate::llm::{ChatMessage, CompletionRequest, ModelProvider};
use crate::scenario::ScenarioDefinition;
use crate::state_machine::{Role, Turn};
use crate::stream::{accumulate, decode_stream, AccumulatorOutcome, MessageAccumulator};
use std::fmt::Write;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const FEEDBACK_PROMPT: &str = r"You are an experienced clinical communication tutor. Review the trainee doctor's conversation below and write brief, constructive feedback (at most 150 words). Mention what went well and the most important gap for each step that scored below 0.7. Do not restate or change the numeric scores.";

const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_TRANSCRIPT_CHARS: usize = 6000;

/// Where feedback text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedbackMode {
    #[default]
    Template,
    Generative,
}

impl FeedbackMode {
    pub fn from_flag(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Self::Generative,
            _ => Self::Template,
        }
    }
}

/// Produce the feedback text for a report.
///
/// Returns the report's template feedback unless generative mode is on and
/// the provider answers in time.
pub async fn generate_feedback(
    mode: FeedbackMode,
    report: &EvaluationReport,
    transcript: &[Turn],
    scenario: &ScenarioDefinition,
    provider: &dyn ModelProvider,
) -> String {
    if mode == FeedbackMode::Template {
        return report.feedback.clone();
    }

    let request = CompletionRequest {
        model: None,
        system: FEEDBACK_PROMPT.to_string(),
        messages: vec![ChatMessage::user(render_prompt(report, transcript, scenario))],
        max_tokens: Some(400),
    };

    let cancel = CancellationToken::new();
    let attempt = async {
        let frames = provider.stream(&request).await?;
        let mut accumulator = MessageAccumulator::new();
        Ok::<_, crate::llm::LlmError>(accumulate(decode_stream(frames), &mut accumulator, &cancel).await)
    };

    match timeout(FEEDBACK_TIMEOUT, attempt).await {
        Ok(Ok(AccumulatorOutcome::Completed(text))) if !text.trim().is_empty() => {
            text.trim().to_string()
        }
        Ok(Ok(AccumulatorOutcome::Completed(_))) => {
            tracing::warn!(scenario = %scenario.id, "Feedback model returned empty text");
            report.feedback.clone()
        }
        Ok(Ok(AccumulatorOutcome::Failed(message))) => {
            tracing::warn!(scenario = %scenario.id, error = %message, "Feedback stream failed");
            report.feedback.clone()
        }
        Ok(Ok(AccumulatorOutcome::Cancelled)) => report.feedback.clone(),
        Ok(Err(e)) => {
            tracing::warn!(scenario = %scenario.id, error = %e.message, "Feedback request failed");
            report.feedback.clone()
        }
        Err(_) => {
            tracing::warn!(scenario = %scenario.id, "Feedback generation timed out");
            report.feedback.clone()
        }
    }
}

fn render_prompt(report: &EvaluationReport, transcript: &[Turn], scenario: &ScenarioDefinition) -> String {
    let mut prompt = format!("Scenario: {}\nPatient role: {}\n\nScores:\n", scenario.title, scenario.ai_role);
    for step in &report.steps {
        let _ = writeln!(prompt, "- {}: {:.2}", step.step_name, step.score);
    }
    let _ = writeln!(prompt, "Overall: {:.2}\n\nConversation:", report.overall_score);

    let mut conversation = String::new();
    for turn in transcript {
        let speaker = match turn.role {
            Role::User => "Doctor",
            Role::Assistant => "Patient",
            Role::System => continue,
        };
        let _ = writeln!(conversation, "{speaker}: {}", turn.content);
    }

    // Keep the most recent part of long conversations
    if conversation.len() > MAX_TRANSCRIPT_CHARS {
        let mut cut = conversation.len() - MAX_TRANSCRIPT_CHARS;
        while !conversation.is_char_boundary(cut) {
            cut += 1;
        }
        prompt.push_str("...\n");
        prompt.push_str(&conversation.split_off(cut));
    } else {
        prompt.push_str(&conversation);
    }
    prompt
}
