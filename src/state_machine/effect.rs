//! Effects produced by state transitions

/// Something observers should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ExchangeCompleted { exchange: u64, message: String },
    ExchangeFailed { exchange: u64, message: String },
    ExchangeCancelled { exchange: u64 },
    ProgressChanged,
}

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a streaming model request for this exchange
    RequestCompletion {
        exchange: u64,
        step_index: usize,
        model: Option<String>,
    },

    /// Abort the in-flight model request
    AbortCompletion,

    /// Publish the new session snapshot to readers
    PublishSnapshot,

    /// Notify connected clients
    Notify(Notice),
}

impl Effect {
    pub fn notify_completed(exchange: u64, message: impl Into<String>) -> Self {
        Effect::Notify(Notice::ExchangeCompleted {
            exchange,
            message: message.into(),
        })
    }

    pub fn notify_failed(exchange: u64, message: impl Into<String>) -> Self {
        Effect::Notify(Notice::ExchangeFailed {
            exchange,
            message: message.into(),
        })
    }
}
