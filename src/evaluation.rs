//! Transcript evaluation
//!
//! Scores how well the trainee's own turns covered each communication step
//! of a scenario, using case-insensitive keyword presence.

mod feedback;

pub use feedback::{generate_feedback, FeedbackMode};

use crate::error::SessionError;
use crate::scenario::ScenarioDefinition;
use crate::state_machine::{Role, Turn};
use serde::Serialize;
use std::fmt::Write;

/// Score for one communication step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepEvaluation {
    pub step_name: String,
    /// Fraction of the step's keywords found, in `[0, 1]`
    pub score: f64,
    pub keywords_found: bool,
    /// Matched keywords, in the step's declared order
    pub matching_keywords: Vec<String>,
}

/// Result of evaluating one transcript snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub overall_score: f64,
    pub steps: Vec<StepEvaluation>,
    pub feedback: String,
}

/// Evaluate a transcript against a scenario's steps.
///
/// Only user turns count as evidence. Fails with
/// [`SessionError::NoTranscript`] when there are none.
#[allow(clippy::cast_precision_loss)]
pub fn evaluate(transcript: &[Turn], scenario: &ScenarioDefinition) -> Result<EvaluationReport, SessionError> {
    let mut user_turns = transcript.iter().filter(|t| t.role == Role::User).peekable();
    if user_turns.peek().is_none() {
        return Err(SessionError::NoTranscript);
    }

    let evidence = user_turns
        .map(|t| t.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let steps: Vec<StepEvaluation> = scenario
        .steps
        .iter()
        .map(|step| {
            let matching_keywords: Vec<String> = step
                .keywords
                .iter()
                .filter(|k| evidence.contains(&k.to_lowercase()))
                .cloned()
                .collect();

            let score = if step.keywords.is_empty() {
                0.0
            } else {
                (matching_keywords.len() as f64 / step.keywords.len() as f64).min(1.0)
            };

            StepEvaluation {
                step_name: step.name.clone(),
                score,
                keywords_found: !matching_keywords.is_empty(),
                matching_keywords,
            }
        })
        .collect();

    let overall_score = if steps.is_empty() {
        0.0
    } else {
        steps.iter().map(|s| s.score).sum::<f64>() / steps.len() as f64
    };

    let feedback = template_feedback(&steps, overall_score);

    Ok(EvaluationReport {
        overall_score,
        steps,
        feedback,
    })
}

fn step_assessment(score: f64) -> &'static str {
    if score >= 0.7 {
        "Excellent"
    } else if score >= 0.4 {
        "Good"
    } else if score > 0.0 {
        "Needs improvement"
    } else {
        "Not addressed"
    }
}

fn overall_assessment(score: f64) -> &'static str {
    if score >= 0.8 {
        "Excellent communication skills demonstrated."
    } else if score >= 0.6 {
        "Good communication skills with some areas for improvement."
    } else if score >= 0.4 {
        "Adequate communication with several areas needing improvement."
    } else {
        "Communication skills need significant improvement."
    }
}

/// Deterministic feedback text built from the scores alone
pub fn template_feedback(steps: &[StepEvaluation], overall_score: f64) -> String {
    let mut text = String::from("Communication Skills Evaluation:\n\n");

    for step in steps {
        let status = if step.keywords_found {
            "Keywords found"
        } else {
            "Keywords not found"
        };
        let _ = writeln!(
            text,
            "Step '{}': {}. {}.",
            step.step_name,
            status,
            step_assessment(step.score)
        );
        if !step.matching_keywords.is_empty() {
            let _ = writeln!(
                text,
                "   Keywords detected: {}",
                step.matching_keywords.join(", ")
            );
        }
    }

    let _ = writeln!(text, "\nOverall Communication Score: {overall_score:.1}/1.0");
    text.push_str("Overall Assessment: ");
    text.push_str(overall_assessment(overall_score));
    text
}
