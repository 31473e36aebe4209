//! HTTP API for the training service

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::runtime::SessionStore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
}

impl AppState {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}
