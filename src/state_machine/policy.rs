//! Step-advancement policies
//!
//! A policy decides, once an exchange has produced its assistant turn,
//! whether the step that was active when the exchange began is now done.

use super::Session;
use crate::scenario::ScenarioDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvancementPolicy {
    /// Advance once per two completed exchanges, regardless of content
    #[default]
    ExchangePairs,
    /// Advance when the exchange's user turn mentions a keyword of the
    /// step that was active. Content-aware alternative; opt-in because it
    /// changes when steps complete.
    KeywordTriggered,
}

impl AdvancementPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "exchange_pairs" | "pairs" => Some(Self::ExchangePairs),
            "keywords" | "keyword_triggered" => Some(Self::KeywordTriggered),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ExchangePairs => "exchange_pairs",
            Self::KeywordTriggered => "keywords",
        }
    }

    /// Decide after the assistant turn was appended and counted
    pub fn should_advance(
        self,
        session: &Session,
        scenario: &ScenarioDefinition,
        exchange_step: usize,
    ) -> bool {
        match self {
            Self::ExchangePairs => {
                session.exchanges_completed > 0 && session.exchanges_completed % 2 == 0
            }
            Self::KeywordTriggered => {
                let Some(step) = scenario.step(exchange_step) else {
                    return false;
                };
                let Some(user_turn) = session.user_turns().last() else {
                    return false;
                };
                let evidence = user_turn.content.to_lowercase();
                step.keywords
                    .iter()
                    .any(|k| evidence.contains(&k.to_lowercase()))
            }
        }
    }
}
