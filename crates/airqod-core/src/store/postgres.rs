//! PostgreSQL-backed record and schedule store.
//!
//! Runtime-checked sqlx queries against two tables, `delivery_records` and
//! `schedules`. Per-destination outcomes live in a JSONB column so the
//! outcome map travels with the record. Schema setup is idempotent and runs
//! at startup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{
        DeliveryRecord, DestinationOutcome, QueueDepth, RecordId, RecordStatus, Schedule,
        ScheduleId,
    },
    store::{RecordFilter, RecordStore, ScheduleStore},
};

const RECORD_COLUMNS: &str = "id, submission_id, source, destination, cc_servers, url_suffix, \
                              content_type, body, object_type, report_type, year, week, month, \
                              period, batch_id, facility, district, depends_on, status, \
                              destination_results, attempts, created_at, updated_at";

const SCHEDULE_COLUMNS: &str =
    "id, name, cron_expr, server, url_suffix, content_type, body, is_running, last_run_at, \
     created_at";

/// Production store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Wraps an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool, for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_records (
                id UUID PRIMARY KEY,
                submission_id TEXT,
                source TEXT NOT NULL,
                destination TEXT NOT NULL,
                cc_servers TEXT[] NOT NULL DEFAULT '{}',
                url_suffix TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL,
                body TEXT NOT NULL,
                object_type TEXT NOT NULL DEFAULT '',
                report_type TEXT NOT NULL DEFAULT '',
                year TEXT NOT NULL DEFAULT '',
                week TEXT NOT NULL DEFAULT '',
                month TEXT NOT NULL DEFAULT '',
                period TEXT NOT NULL DEFAULT '',
                batch_id TEXT,
                facility TEXT NOT NULL DEFAULT '',
                district TEXT NOT NULL DEFAULT '',
                depends_on UUID,
                status TEXT NOT NULL,
                destination_results JSONB NOT NULL DEFAULT '{}',
                attempts INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_records_status_created \
             ON delivery_records (status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_records_district \
             ON delivery_records (district)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_records_batch ON delivery_records (batch_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                cron_expr TEXT NOT NULL,
                server TEXT NOT NULL,
                url_suffix TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT 'application/json',
                body TEXT NOT NULL DEFAULT '',
                is_running BOOLEAN NOT NULL DEFAULT FALSE,
                last_run_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::debug!("database schema ensured");
        Ok(())
    }

    /// Distinguishes a missing record from an immutable one after an update
    /// matched no rows.
    async fn explain_unmatched(&self, id: RecordId) -> CoreError {
        let status: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM delivery_records WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await;
        match status {
            Ok(Some(_)) => CoreError::ConstraintViolation(format!(
                "record {id} already succeeded and is immutable"
            )),
            Ok(None) => CoreError::NotFound(format!("record {id} not found")),
            Err(e) => e.into(),
        }
    }
}

fn record_from_row(row: &PgRow) -> std::result::Result<DeliveryRecord, sqlx::Error> {
    let status_text: String = row.try_get("status")?;
    let status = RecordStatus::parse(&status_text).ok_or_else(|| sqlx::Error::Decode(
        format!("unknown record status {status_text:?}").into(),
    ))?;
    let results: sqlx::types::Json<BTreeMap<String, DestinationOutcome>> =
        row.try_get("destination_results")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(DeliveryRecord {
        id: RecordId(row.try_get::<Uuid, _>("id")?),
        submission_id: row.try_get("submission_id")?,
        source: row.try_get("source")?,
        destination: row.try_get("destination")?,
        cc_servers: row.try_get("cc_servers")?,
        url_suffix: row.try_get("url_suffix")?,
        content_type: row.try_get("content_type")?,
        body: row.try_get("body")?,
        object_type: row.try_get("object_type")?,
        report_type: row.try_get("report_type")?,
        year: row.try_get("year")?,
        week: row.try_get("week")?,
        month: row.try_get("month")?,
        period: row.try_get("period")?,
        batch_id: row.try_get("batch_id")?,
        facility: row.try_get("facility")?,
        district: row.try_get("district")?,
        depends_on: row.try_get::<Option<Uuid>, _>("depends_on")?.map(RecordId),
        status,
        destination_results: results.0,
        attempts: attempts.try_into().unwrap_or(0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn schedule_from_row(row: &PgRow) -> std::result::Result<Schedule, sqlx::Error> {
    Ok(Schedule {
        id: ScheduleId(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        cron_expr: row.try_get("cron_expr")?,
        server: row.try_get("server")?,
        url_suffix: row.try_get("url_suffix")?,
        content_type: row.try_get("content_type")?,
        body: row.try_get("body")?,
        is_running: row.try_get("is_running")?,
        last_run_at: row.try_get("last_run_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for PgStorage {
    async fn insert_record(&self, record: &DeliveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_records (
                id, submission_id, source, destination, cc_servers, url_suffix,
                content_type, body, object_type, report_type, year, week, month,
                period, batch_id, facility, district, depends_on, status,
                destination_results, attempts, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            "#,
        )
        .bind(record.id.0)
        .bind(&record.submission_id)
        .bind(&record.source)
        .bind(&record.destination)
        .bind(&record.cc_servers)
        .bind(&record.url_suffix)
        .bind(&record.content_type)
        .bind(&record.body)
        .bind(&record.object_type)
        .bind(&record.report_type)
        .bind(&record.year)
        .bind(&record.week)
        .bind(&record.month)
        .bind(&record.period)
        .bind(&record.batch_id)
        .bind(&record.facility)
        .bind(&record.district)
        .bind(record.depends_on.map(|d| d.0))
        .bind(record.status.as_str())
        .bind(sqlx::types::Json(&record.destination_results))
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_record(&self, id: RecordId) -> Result<Option<DeliveryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM delivery_records WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose().map_err(Into::into)
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<DeliveryRecord>> {
        // Fixed placeholder positions; absent filters collapse to TRUE.
        let limit = filter.limit.map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR district = $2)
              AND ($3::TEXT IS NULL OR facility = $3)
              AND ($4::TEXT IS NULL OR batch_id = $4)
              AND ($5::TEXT IS NULL OR destination = $5)
            ORDER BY created_at DESC
            LIMIT $6
            "#
        ))
        .bind(filter.status.map(RecordStatus::as_str))
        .bind(&filter.district)
        .bind(&filter.facility)
        .bind(&filter.batch_id)
        .bind(&filter.destination)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    async fn list_retryable(
        &self,
        cutoff: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE status IN ('failed', 'partially_failed')
              AND attempts < $1
              AND updated_at <= $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    async fn list_stale_in_flight(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM delivery_records
            WHERE status = 'in_flight'
              AND updated_at <= $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect::<std::result::Result<_, _>>().map_err(Into::into)
    }

    async fn update_record(&self, record: &DeliveryRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_records
            SET submission_id = $2, status = $3, destination_results = $4,
                attempts = $5, body = $6, updated_at = $7
            WHERE id = $1 AND status <> 'succeeded'
            "#,
        )
        .bind(record.id.0)
        .bind(&record.submission_id)
        .bind(record.status.as_str())
        .bind(sqlx::types::Json(&record.destination_results))
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(&record.body)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_unmatched(record.id).await);
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE delivery_records SET status = $2, updated_at = $3 \
             WHERE id = $1 AND status <> 'succeeded'",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_unmatched(id).await);
        }
        Ok(())
    }

    async fn delete_record(&self, id: RecordId) -> Result<()> {
        sqlx::query("DELETE FROM delivery_records WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_batch(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_records WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_district(&self, district: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_records WHERE district = $1")
            .bind(district)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn queue_depth(&self) -> Result<QueueDepth> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM delivery_records GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut depth = QueueDepth::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            let total = u64::try_from(total).unwrap_or(0);
            match RecordStatus::parse(&status) {
                Some(RecordStatus::Pending) => depth.pending = total,
                Some(RecordStatus::InFlight) => depth.in_flight = total,
                Some(RecordStatus::Succeeded) => depth.succeeded = total,
                Some(RecordStatus::Failed) => depth.failed = total,
                Some(RecordStatus::PartiallyFailed) => depth.partially_failed = total,
                None => {}
            }
        }
        Ok(depth)
    }
}

#[async_trait]
impl ScheduleStore for PgStorage {
    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, name, cron_expr, server, url_suffix, content_type, body,
                is_running, last_run_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(schedule.id.0)
        .bind(&schedule.name)
        .bind(&schedule.cron_expr)
        .bind(&schedule.server)
        .bind(&schedule.url_suffix)
        .bind(&schedule.content_type)
        .bind(&schedule.body)
        .bind(schedule.is_running)
        .bind(schedule.last_run_at)
        .bind(schedule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(schedule_from_row).transpose().map_err(Into::into)
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let rows =
            sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY created_at"))
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(schedule_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(Into::into)
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET name = $2, cron_expr = $3, server = $4, url_suffix = $5,
                content_type = $6, body = $7
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.0)
        .bind(&schedule.name)
        .bind(&schedule.cron_expr)
        .bind(&schedule.server)
        .bind(&schedule.url_suffix)
        .bind(&schedule.content_type)
        .bind(&schedule.body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("schedule {} not found", schedule.id)));
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        sqlx::query("DELETE FROM schedules WHERE id = $1").bind(id.0).execute(&self.pool).await?;
        Ok(())
    }

    async fn try_mark_running(&self, id: ScheduleId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET is_running = TRUE WHERE id = $1 AND is_running = FALSE",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_finished(&self, id: ScheduleId, finished_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schedules SET is_running = FALSE, last_run_at = $2 WHERE id = $1",
        )
        .bind(id.0)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("schedule {id} not found")));
        }
        Ok(())
    }
}
