//! Test data builders with configurable properties and sensible defaults.

use airqod_core::{
    AuthMethod, DeliveryRecord, RecordDraft, RecordId, Schedule, ScheduleDraft, ServerProfile,
};
use chrono::{DateTime, Utc};

/// Builder for test delivery records.
///
/// Defaults to a JSON payload bound for a primary destination named
/// "dhis2" with no carbon copies.
pub struct RecordBuilder {
    draft: RecordDraft,
}

impl RecordBuilder {
    /// Creates a builder with sensible defaults.
    pub fn with_defaults() -> Self {
        Self {
            draft: RecordDraft {
                source: "airqo".to_string(),
                destination: "dhis2".to_string(),
                url_suffix: "dataValueSets".to_string(),
                content_type: "application/json".to_string(),
                body: r#"{"dataValues":[]}"#.to_string(),
                ..RecordDraft::default()
            },
        }
    }

    /// Sets the primary destination label.
    #[must_use]
    pub fn destination(mut self, label: impl Into<String>) -> Self {
        self.draft.destination = label.into();
        self
    }

    /// Sets the carbon-copy destination labels.
    #[must_use]
    pub fn cc_servers(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.draft.cc_servers = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the URL suffix appended to the destination base route.
    #[must_use]
    pub fn url_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.draft.url_suffix = suffix.into();
        self
    }

    /// Sets the payload as JSON, adjusting the content type.
    #[must_use]
    pub fn json_body(mut self, value: &serde_json::Value) -> Self {
        self.draft.body = value.to_string();
        self.draft.content_type = "application/json".to_string();
        self
    }

    /// Sets the producing batch identifier.
    #[must_use]
    pub fn batch(mut self, batch_id: impl Into<String>) -> Self {
        self.draft.batch_id = Some(batch_id.into());
        self
    }

    /// Sets the district.
    #[must_use]
    pub fn district(mut self, district: impl Into<String>) -> Self {
        self.draft.district = district.into();
        self
    }

    /// Sets the facility.
    #[must_use]
    pub fn facility(mut self, facility: impl Into<String>) -> Self {
        self.draft.facility = facility.into();
        self
    }

    /// Makes the record depend on another record.
    #[must_use]
    pub fn depends_on(mut self, id: RecordId) -> Self {
        self.draft.depends_on = Some(id);
        self
    }

    /// Builds a pending record created at the given time.
    pub fn build(self, now: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord::from_draft(self.draft, now)
    }
}

/// Builder for test schedules.
pub struct ScheduleBuilder {
    draft: ScheduleDraft,
}

impl ScheduleBuilder {
    /// Creates a builder with sensible defaults: an hourly push to
    /// "dhis2".
    pub fn with_defaults() -> Self {
        Self {
            draft: ScheduleDraft {
                name: "hourly-push".to_string(),
                cron_expr: "0 * * * *".to_string(),
                server: "dhis2".to_string(),
                url_suffix: "dataValueSets".to_string(),
                content_type: "application/json".to_string(),
                body: "{}".to_string(),
            },
        }
    }

    /// Sets the schedule name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.draft.name = name.into();
        self
    }

    /// Sets the cron recurrence expression.
    #[must_use]
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.draft.cron_expr = expression.into();
        self
    }

    /// Sets the destination server label.
    #[must_use]
    pub fn server(mut self, label: impl Into<String>) -> Self {
        self.draft.server = label.into();
        self
    }

    /// Builds a schedule created at the given time.
    pub fn build(self, now: DateTime<Utc>) -> Schedule {
        Schedule::from_draft(self.draft, now)
    }
}

/// An unauthenticated server profile.
pub fn profile(name: &str, base_url: &str) -> ServerProfile {
    ServerProfile { name: name.to_string(), base_url: base_url.to_string(), auth: AuthMethod::None }
}

/// A server profile with HTTP Basic credentials.
pub fn basic_profile(name: &str, base_url: &str, username: &str, password: &str) -> ServerProfile {
    ServerProfile {
        name: name.to_string(),
        base_url: base_url.to_string(),
        auth: AuthMethod::Basic { username: username.to_string(), password: password.to_string() },
    }
}

/// A server profile authenticated with a personal access token.
pub fn token_profile(name: &str, base_url: &str, token: &str) -> ServerProfile {
    ServerProfile {
        name: name.to_string(),
        base_url: base_url.to_string(),
        auth: AuthMethod::Token { token: token.to_string() },
    }
}
