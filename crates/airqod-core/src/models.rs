//! Core domain models and strongly-typed identifiers.
//!
//! Defines delivery records, per-destination outcomes, schedules, server
//! profiles and newtype ID wrappers for compile-time type safety. Includes
//! the aggregate-status rule used when a fan-out delivery completes.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed delivery record identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. The identifier is
/// assigned at creation and never changes afterwards; it is the key used by
/// the in-flight claim set to prevent duplicate concurrent processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Creates a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed schedule identifier.
///
/// Schedules run with per-schedule mutual exclusion keyed by this ID,
/// independent of any delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    /// Creates a new random schedule ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ScheduleId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Lifecycle state of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Queued, waiting for the dispatch producer to pick it up.
    Pending,
    /// Claimed by a worker; a delivery attempt is in progress.
    InFlight,
    /// All destinations accepted the update. Terminal and immutable.
    Succeeded,
    /// Every destination failed on the last attempt.
    Failed,
    /// The primary or some replicas succeeded while others failed.
    PartiallyFailed,
}

impl RecordStatus {
    /// Database/text representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially_failed",
        }
    }

    /// Parses the database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "partially_failed" => Some(Self::PartiallyFailed),
            _ => None,
        }
    }

    /// Whether the retry scheduler may re-surface a record in this state.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::PartiallyFailed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed delivery attempt against one destination.
///
/// The kind decides retry behavior: timeouts and network faults are
/// transient, a rejected payload will never succeed unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The per-call deadline elapsed before the destination answered.
    Timeout,
    /// Connection-level failure talking to the destination.
    Network,
    /// The destination rejected the payload (HTTP 4xx validation error).
    Rejected,
    /// The destination reported a server-side error (HTTP 5xx).
    ServerError,
    /// No server profile is configured for the destination.
    UnknownDestination,
    /// Unexpected fault inside the worker while processing the record.
    Internal,
}

impl FailureKind {
    /// Whether a retry without payload changes can plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::ServerError | Self::Internal)
    }
}

/// Result of one delivery attempt against one destination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationOutcome {
    /// Whether the destination accepted the update.
    pub success: bool,
    /// Remote submission identifier parsed from a successful response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    /// HTTP status code, when a response was received at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Error detail for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl DestinationOutcome {
    /// Successful outcome with an optional remote submission id.
    pub fn ok(http_status: u16, submission_id: Option<String>) -> Self {
        Self {
            success: true,
            submission_id,
            http_status: Some(http_status),
            error: None,
            error_kind: None,
        }
    }

    /// Failed outcome with a classification and detail message.
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            submission_id: None,
            http_status: None,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }

    /// Failed outcome that still carries the HTTP status of the response.
    pub fn failed_with_status(kind: FailureKind, status: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            submission_id: None,
            http_status: Some(status),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}

/// Computes the aggregate record status from per-destination outcomes.
///
/// Succeeded iff every destination succeeded, Failed iff every destination
/// failed, PartiallyFailed otherwise. An empty map counts as Failed: it only
/// occurs when resolution failed before any attempt was made.
pub fn aggregate_status(outcomes: &BTreeMap<String, DestinationOutcome>) -> RecordStatus {
    let total = outcomes.len();
    let succeeded = outcomes.values().filter(|o| o.success).count();

    if total == 0 || succeeded == 0 {
        RecordStatus::Failed
    } else if succeeded == total {
        RecordStatus::Succeeded
    } else {
        RecordStatus::PartiallyFailed
    }
}

/// A persisted unit of outbound work: one logical update to be sent to a
/// primary destination and optional carbon-copy replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Process-unique identifier, assigned at creation.
    pub id: RecordId,
    /// Externally-visible submission id, set only after successful delivery.
    pub submission_id: Option<String>,

    /// Label of the system that produced the record.
    pub source: String,
    /// Label of the primary destination server.
    pub destination: String,
    /// Labels of carbon-copy servers receiving best-effort copies.
    pub cc_servers: Vec<String>,
    /// Suffix appended to the destination's base route.
    pub url_suffix: String,

    /// MIME type of the payload.
    pub content_type: String,
    /// Serialized payload, opaque to this subsystem.
    pub body: String,
    /// Object type tag, used for observability and filtering only.
    pub object_type: String,
    /// Report type tag, used for observability and filtering only.
    pub report_type: String,

    /// Reporting year of the underlying data.
    pub year: String,
    /// ISO week of the underlying data.
    pub week: String,
    /// Month of the underlying data.
    pub month: String,
    /// Reporting period identifier (idempotent re-submission key component).
    pub period: String,

    /// Identifier of the aggregation run that produced this record.
    pub batch_id: Option<String>,
    /// Facility (organisational unit) the record belongs to.
    pub facility: String,
    /// District the record belongs to, for scoped administrative clears.
    pub district: String,

    /// Identity of a record that must reach Succeeded before this one may
    /// dispatch.
    pub depends_on: Option<RecordId>,

    /// Current lifecycle state.
    pub status: RecordStatus,
    /// Per-destination outcome map (destination label to outcome).
    pub destination_results: BTreeMap<String, DestinationOutcome>,
    /// Number of completed delivery attempts.
    pub attempts: u32,

    /// Creation timestamp, also the dispatch ordering key.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp; the retry backoff window is measured from
    /// here.
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// Builds a pending record from a draft, assigning a fresh identity.
    pub fn from_draft(draft: RecordDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            submission_id: None,
            source: draft.source,
            destination: draft.destination,
            cc_servers: draft.cc_servers,
            url_suffix: draft.url_suffix,
            content_type: draft.content_type,
            body: draft.body,
            object_type: draft.object_type,
            report_type: draft.report_type,
            year: draft.year,
            week: draft.week,
            month: draft.month,
            period: draft.period,
            batch_id: draft.batch_id,
            facility: draft.facility,
            district: draft.district,
            depends_on: draft.depends_on,
            status: RecordStatus::Pending,
            destination_results: BTreeMap::new(),
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a destination already holds a successful outcome.
    ///
    /// Used on retry passes so already-accepted destinations are not
    /// re-delivered.
    pub fn destination_succeeded(&self, server: &str) -> bool {
        self.destination_results.get(server).is_some_and(|o| o.success)
    }

    /// Whether any failed destination could plausibly succeed on a retry.
    ///
    /// A record whose failures are all rejections (or unknown
    /// destinations) will fail identically every time, so the retry sweep
    /// leaves it alone. Outcomes without a classification count as
    /// retryable.
    pub fn has_retryable_failure(&self) -> bool {
        self.destination_results
            .values()
            .filter(|o| !o.success)
            .any(|o| o.error_kind.map_or(true, FailureKind::is_retryable))
    }
}

/// Incoming form for creating a delivery record, as accepted by the
/// administrative API and the aggregation producers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Source system label.
    pub source: String,
    /// Primary destination server label.
    pub destination: String,
    /// Carbon-copy server labels.
    #[serde(default)]
    pub cc_servers: Vec<String>,
    /// Suffix appended to the destination base route.
    #[serde(default)]
    pub url_suffix: String,
    /// Payload MIME type.
    pub content_type: String,
    /// Serialized payload.
    pub body: String,
    /// Object type tag.
    #[serde(default)]
    pub object_type: String,
    /// Report type tag.
    #[serde(default)]
    pub report_type: String,
    /// Reporting year.
    #[serde(default)]
    pub year: String,
    /// ISO week.
    #[serde(default)]
    pub week: String,
    /// Month.
    #[serde(default)]
    pub month: String,
    /// Reporting period.
    #[serde(default)]
    pub period: String,
    /// Batch identifier of the producing run.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// Facility identifier.
    #[serde(default)]
    pub facility: String,
    /// District identifier.
    #[serde(default)]
    pub district: String,
    /// Optional dependency on another record.
    #[serde(default)]
    pub depends_on: Option<RecordId>,
}

/// Authentication scheme for a destination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// HTTP Basic authentication.
    Basic {
        /// Account username.
        username: String,
        /// Account password.
        password: String,
    },
    /// Personal access token sent as `Authorization: Token <token>`.
    Token {
        /// The access token.
        token: String,
    },
    /// No authentication header.
    None,
}

/// Connection profile for one destination server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Server label, the key records use to reference it.
    pub name: String,
    /// Base URL deliveries are posted to.
    pub base_url: String,
    /// Authentication scheme and credentials.
    pub auth: AuthMethod,
}

/// A recurring task definition executed with per-schedule mutual exclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule identity, the exclusivity key.
    pub id: ScheduleId,
    /// Human-readable name.
    pub name: String,
    /// Cron recurrence expression.
    pub cron_expr: String,
    /// Destination server label the task posts to.
    pub server: String,
    /// Suffix appended to the server's base route.
    pub url_suffix: String,
    /// Payload MIME type.
    pub content_type: String,
    /// Task payload.
    pub body: String,
    /// Execution exclusivity flag; set while the task is running.
    pub is_running: bool,
    /// Completion time of the most recent run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Builds a schedule from a draft, assigning a fresh identity.
    pub fn from_draft(draft: ScheduleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ScheduleId::new(),
            name: draft.name,
            cron_expr: draft.cron_expr,
            server: draft.server,
            url_suffix: draft.url_suffix,
            content_type: draft.content_type,
            body: draft.body,
            is_running: false,
            last_run_at: None,
            created_at: now,
        }
    }
}

/// Incoming form for creating or updating a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDraft {
    /// Human-readable name.
    pub name: String,
    /// Cron recurrence expression.
    pub cron_expr: String,
    /// Destination server label.
    pub server: String,
    /// Suffix appended to the server's base route.
    #[serde(default)]
    pub url_suffix: String,
    /// Payload MIME type.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Task payload.
    #[serde(default)]
    pub body: String,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Per-status record counts exposed on the administrative surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Records waiting to dispatch.
    pub pending: u64,
    /// Records claimed by workers.
    pub in_flight: u64,
    /// Records delivered to all destinations.
    pub succeeded: u64,
    /// Records whose last attempt failed on all destinations.
    pub failed: u64,
    /// Records with mixed per-destination outcomes.
    pub partially_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_map(pairs: &[(&str, bool)]) -> BTreeMap<String, DestinationOutcome> {
        pairs
            .iter()
            .map(|(name, ok)| {
                let outcome = if *ok {
                    DestinationOutcome::ok(200, None)
                } else {
                    DestinationOutcome::failed(FailureKind::ServerError, "boom")
                };
                ((*name).to_string(), outcome)
            })
            .collect()
    }

    #[test]
    fn aggregate_status_all_destinations_succeeded() {
        let outcomes = outcome_map(&[("dhis2", true), ("serverA", true)]);
        assert_eq!(aggregate_status(&outcomes), RecordStatus::Succeeded);
    }

    #[test]
    fn aggregate_status_all_destinations_failed() {
        let outcomes = outcome_map(&[("dhis2", false), ("serverA", false)]);
        assert_eq!(aggregate_status(&outcomes), RecordStatus::Failed);
    }

    #[test]
    fn aggregate_status_mixed_outcomes_is_partial() {
        let outcomes = outcome_map(&[("dhis2", true), ("serverA", true), ("serverB", false)]);
        assert_eq!(aggregate_status(&outcomes), RecordStatus::PartiallyFailed);
    }

    #[test]
    fn aggregate_status_empty_map_is_failed() {
        assert_eq!(aggregate_status(&BTreeMap::new()), RecordStatus::Failed);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::InFlight,
            RecordStatus::Succeeded,
            RecordStatus::Failed,
            RecordStatus::PartiallyFailed,
        ] {
            assert_eq!(RecordStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::parse("bogus"), None);
    }

    #[test]
    fn rejected_payloads_are_not_retryable() {
        assert!(!FailureKind::Rejected.is_retryable());
        assert!(!FailureKind::UnknownDestination.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Network.is_retryable());
        assert!(FailureKind::ServerError.is_retryable());
    }

    #[test]
    fn retryable_failure_detection_ignores_pure_rejections() {
        let now = Utc::now();
        let mut record = DeliveryRecord::from_draft(RecordDraft::default(), now);

        record
            .destination_results
            .insert("dhis2".into(), DestinationOutcome::failed(FailureKind::Rejected, "bad"));
        assert!(!record.has_retryable_failure());

        record
            .destination_results
            .insert("serverA".into(), DestinationOutcome::failed(FailureKind::Network, "down"));
        assert!(record.has_retryable_failure());

        record
            .destination_results
            .insert("serverA".into(), DestinationOutcome::ok(200, None));
        assert!(!record.has_retryable_failure());
    }

    #[test]
    fn draft_produces_pending_record_with_fresh_identity() {
        let now = Utc::now();
        let draft = RecordDraft {
            source: "localhost".into(),
            destination: "dhis2".into(),
            cc_servers: vec!["serverA".into()],
            content_type: "application/json".into(),
            body: r#"{"value":1}"#.into(),
            ..Default::default()
        };

        let record = DeliveryRecord::from_draft(draft, now);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert!(record.destination_results.is_empty());
        assert!(record.submission_id.is_none());
        assert_eq!(record.created_at, now);
    }
}
