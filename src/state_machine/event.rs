//! Events that drive session transitions

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Trainee sends a message
    UserTurn {
        text: String,
        /// Model override for this exchange
        model: Option<String>,
    },
    /// The in-flight response finished
    AssistantComplete { exchange: u64, text: String },
    /// The in-flight response failed upstream
    AssistantError { exchange: u64, message: String },
    /// Abandon the in-flight response. `None` cancels whatever is streaming.
    Cancel { exchange: Option<u64> },
    /// Mark the current step done without waiting for the policy
    AdvanceStep,
    /// Retire this session in favor of a fresh one
    Restart,
}

#[cfg(test)]
impl Event {
    pub fn user_turn(text: impl Into<String>) -> Self {
        Event::UserTurn {
            text: text.into(),
            model: None,
        }
    }
}
