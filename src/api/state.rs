//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::hub::Hub;

/// Default buffer of frames queued for one websocket observer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    /// Frames queued per websocket before writes start to block
    pub channel_capacity: usize,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            start_time: Instant::now(),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
