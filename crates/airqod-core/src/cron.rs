//! Cron expression evaluation for schedules and the retry sweep.
//!
//! Thin wrapper over `croner` exposing a pure next-fire-time function so
//! schedule arithmetic can be tested without a running scheduler.

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::error::{CoreError, Result};

/// Validates a cron expression, returning the parsed pattern.
pub fn parse(expression: &str) -> Result<Cron> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| CoreError::InvalidCron {
            expression: expression.to_string(),
            message: e.to_string(),
        })
}

/// Computes the next fire time strictly after `after` for a cron
/// expression.
///
/// Pure function of its inputs; callers pass the injected clock's current
/// time rather than reading the system clock here.
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = parse(expression)?;
    cron.find_next_occurrence(&after, false)
        .map_err(|e| CoreError::InvalidCron {
            expression: expression.to_string(),
            message: e.to_string(),
        })
}
