//! Shared application state for the web surface.

use std::sync::Arc;
use std::time::Duration;

use super::rate_limit::FixedWindowLimiter;
use crate::engine::Engine;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    /// Build state over an assembled engine, wiring the webhook rate limiter
    /// from its configuration.
    pub fn new(engine: Arc<Engine>) -> Self {
        let webhook = &engine.config().webhook;
        let limiter = Arc::new(FixedWindowLimiter::new(
            webhook.rate_max,
            Duration::from_secs(webhook.rate_window_secs),
        ));
        Self { engine, limiter }
    }
}
