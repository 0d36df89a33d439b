//! Administrative HTTP API for the airqod delivery queue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use airqod_core::{Clock, RecordStore, ScheduleStore};

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Delivery record persistence.
    pub records: Arc<dyn RecordStore>,
    /// Schedule persistence.
    pub schedules: Arc<dyn ScheduleStore>,
    /// Time source, swappable in tests.
    pub clock: Arc<dyn Clock>,
    /// Credentials guarding the /api surface.
    pub admin: Arc<AdminCredentials>,
}

/// Basic-auth credentials for the administrative API.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    /// Expected username.
    pub username: String,
    /// Expected password.
    pub password: String,
}

impl AppState {
    /// Builds the state from its parts.
    pub fn new(
        records: Arc<dyn RecordStore>,
        schedules: Arc<dyn ScheduleStore>,
        clock: Arc<dyn Clock>,
        admin: AdminCredentials,
    ) -> Self {
        Self { records, schedules, clock, admin: Arc::new(admin) }
    }
}
