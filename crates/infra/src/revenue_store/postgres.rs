//! Postgres-backed revenue repository.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | RepositoryError |
//! |------------|---------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` (duplicate period) |
//! | Database (check violation) | `23514` | `Unexpected` (totals invariant rejected) |
//! | Database (other) | any | `Unexpected` |
//! | PoolTimedOut / PoolClosed / Io | n/a | `Unexpected` |
//!
//! ## Runtime
//!
//! The repository trait is synchronous. The adapter owns a Tokio runtime and
//! blocks on it, so it must be called from plain threads (the sync worker,
//! the replay tool), never from inside another async runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Runtime;
use tracing::instrument;

use revsync_core::{ExpectedVersion, RecordId};
use revsync_invoicing::InvoiceId;
use revsync_revenue::{CalculationSource, PeriodKey, RevenuePatch, RevenueRecord, RevenueTotals};

use super::r#trait::{RepositoryError, RevenueRepository};

/// Table definition. `period` is unique, and the totals invariant is also
/// enforced by the database.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS revenue_records (
    id                   UUID PRIMARY KEY,
    period               DATE NOT NULL UNIQUE,
    total_amount         BIGINT NOT NULL CHECK (total_amount >= 0),
    total_paid_amount    BIGINT NOT NULL CHECK (total_paid_amount >= 0),
    total_pending_amount BIGINT NOT NULL CHECK (total_pending_amount >= 0),
    invoice_count        BIGINT NOT NULL CHECK (invoice_count >= 0),
    calculation_source   TEXT NOT NULL,
    applied_revisions    JSONB NOT NULL DEFAULT '{}'::jsonb,
    version              BIGINT NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL,
    updated_at           TIMESTAMPTZ NOT NULL,
    CONSTRAINT revenue_records_total_is_bucket_sum
        CHECK (total_amount = total_paid_amount + total_pending_amount)
)
"#;

const COLUMNS: &str = "id, period, total_amount, total_paid_amount, total_pending_amount, \
     invoice_count, calculation_source, applied_revisions, version, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresRevenueRepository {
    pool: PgPool,
    runtime: Arc<Runtime>,
}

impl PostgresRevenueRepository {
    /// Build a runtime and connect a small pool with bounded acquire timeouts.
    pub fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| RepositoryError::Unexpected(format!("failed to build runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), RepositoryError> {
        self.runtime.block_on(async {
            sqlx::query(SCHEMA)
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| map_sqlx_error("ensure_schema", e))
        })
    }

    #[instrument(skip(self), fields(period = %period), err)]
    pub async fn fetch_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM revenue_records WHERE period = $1"))
            .bind(period.first_day())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_period", e))?;

        row.map(|r| decode(&r)).transpose()
    }

    #[instrument(skip(self), fields(record_id = %id), err)]
    pub async fn fetch_by_id(&self, id: RecordId) -> Result<Option<RevenueRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM revenue_records WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.map(|r| decode(&r)).transpose()
    }

    #[instrument(skip(self, patch), fields(period = %period), err)]
    pub async fn insert(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        let now = Utc::now();
        let revisions = encode_revisions(&patch.applied_revisions)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO revenue_records ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $9)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(*RecordId::new().as_uuid())
        .bind(period.first_day())
        .bind(patch.totals.total_amount)
        .bind(patch.totals.total_paid_amount)
        .bind(patch.totals.total_pending_amount)
        .bind(patch.totals.invoice_count)
        .bind(patch.calculation_source.as_str())
        .bind(revisions)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        decode(&row)
    }

    /// Conditional update: `WHERE id = $1 AND version = $2`.
    ///
    /// When no row matches, a second lookup tells `NotFound` from `Conflict`.
    #[instrument(skip(self, patch), fields(record_id = %id, expected_version = ?expected_version), err)]
    pub async fn update_versioned(
        &self,
        id: RecordId,
        patch: RevenuePatch,
        expected_version: ExpectedVersion,
    ) -> Result<RevenueRecord, RepositoryError> {
        let expected: Option<i64> = match expected_version {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(to_i64(v, "expected_version")?),
        };
        let revisions = encode_revisions(&patch.applied_revisions)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE revenue_records SET
                total_amount = $3,
                total_paid_amount = $4,
                total_pending_amount = $5,
                invoice_count = $6,
                calculation_source = $7,
                applied_revisions = $8,
                version = version + 1,
                updated_at = $9
            WHERE id = $1 AND ($2::bigint IS NULL OR version = $2)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(*id.as_uuid())
        .bind(expected)
        .bind(patch.totals.total_amount)
        .bind(patch.totals.total_paid_amount)
        .bind(patch.totals.total_pending_amount)
        .bind(patch.totals.invoice_count)
        .bind(patch.calculation_source.as_str())
        .bind(revisions)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if let Some(row) = row {
            return decode(&row);
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM revenue_records WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;

        match current {
            None => Err(RepositoryError::NotFound(id.to_string())),
            Some(found) => Err(RepositoryError::Conflict(format!(
                "expected {expected_version:?}, found version {found}"
            ))),
        }
    }

    #[instrument(skip(self, patch), fields(period = %period), err)]
    pub async fn upsert(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        let now = Utc::now();
        let revisions = encode_revisions(&patch.applied_revisions)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO revenue_records ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $9)
            ON CONFLICT (period) DO UPDATE SET
                total_amount = EXCLUDED.total_amount,
                total_paid_amount = EXCLUDED.total_paid_amount,
                total_pending_amount = EXCLUDED.total_pending_amount,
                invoice_count = EXCLUDED.invoice_count,
                calculation_source = EXCLUDED.calculation_source,
                applied_revisions = EXCLUDED.applied_revisions,
                version = revenue_records.version + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING {COLUMNS}
            "#
        ))
        .bind(*RecordId::new().as_uuid())
        .bind(period.first_day())
        .bind(patch.totals.total_amount)
        .bind(patch.totals.total_paid_amount)
        .bind(patch.totals.total_pending_amount)
        .bind(patch.totals.invoice_count)
        .bind(patch.calculation_source.as_str())
        .bind(revisions)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_by_period", e))?;

        decode(&row)
    }

    #[instrument(skip(self), fields(from = %from, to = %to), err)]
    pub async fn fetch_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM revenue_records WHERE period >= $1 AND period <= $2 ORDER BY period ASC"
        ))
        .bind(from.first_day())
        .bind(to.first_day())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_date_range", e))?;

        rows.iter().map(decode).collect()
    }
}

impl RevenueRepository for PostgresRevenueRepository {
    fn find_by_period(&self, period: PeriodKey) -> Result<Option<RevenueRecord>, RepositoryError> {
        self.runtime.block_on(self.fetch_by_period(period))
    }

    fn find_by_id(&self, id: RecordId) -> Result<Option<RevenueRecord>, RepositoryError> {
        self.runtime.block_on(self.fetch_by_id(id))
    }

    fn create(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        self.runtime.block_on(self.insert(period, patch))
    }

    fn update(
        &self,
        id: RecordId,
        patch: RevenuePatch,
        expected_version: ExpectedVersion,
    ) -> Result<RevenueRecord, RepositoryError> {
        self.runtime
            .block_on(self.update_versioned(id, patch, expected_version))
    }

    fn upsert_by_period(&self, period: PeriodKey, patch: RevenuePatch) -> Result<RevenueRecord, RepositoryError> {
        self.runtime.block_on(self.upsert(period, patch))
    }

    fn list_by_date_range(&self, from: PeriodKey, to: PeriodKey) -> Result<Vec<RevenueRecord>, RepositoryError> {
        if from > to {
            return Ok(Vec::new());
        }
        self.runtime.block_on(self.fetch_range(from, to))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                _ => RepositoryError::Unexpected(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            RepositoryError::Unexpected(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Unexpected(format!("connection pool closed in {operation}"))
        }
        other => RepositoryError::Unexpected(format!("sqlx error in {operation}: {other}")),
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Unexpected(format!("{field} {value} overflows BIGINT")))
}

fn encode_revisions(revisions: &BTreeMap<InvoiceId, u64>) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(revisions)
        .map_err(|e| RepositoryError::Unexpected(format!("failed to encode applied revisions: {e}")))
}

#[derive(Debug)]
struct RecordRow {
    id: uuid::Uuid,
    period: NaiveDate,
    total_amount: i64,
    total_paid_amount: i64,
    total_pending_amount: i64,
    invoice_count: i64,
    calculation_source: String,
    applied_revisions: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RecordRow {
            id: row.try_get("id")?,
            period: row.try_get("period")?,
            total_amount: row.try_get("total_amount")?,
            total_paid_amount: row.try_get("total_paid_amount")?,
            total_pending_amount: row.try_get("total_pending_amount")?,
            invoice_count: row.try_get("invoice_count")?,
            calculation_source: row.try_get("calculation_source")?,
            applied_revisions: row.try_get("applied_revisions")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<RecordRow> for RevenueRecord {
    type Error = RepositoryError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let calculation_source: CalculationSource = row
            .calculation_source
            .parse()
            .map_err(|e| RepositoryError::Unexpected(format!("bad calculation_source column: {e}")))?;
        let applied_revisions: BTreeMap<InvoiceId, u64> = serde_json::from_value(row.applied_revisions)
            .map_err(|e| RepositoryError::Unexpected(format!("bad applied_revisions column: {e}")))?;
        let version = u64::try_from(row.version)
            .map_err(|_| RepositoryError::Unexpected(format!("negative version {}", row.version)))?;

        Ok(RevenueRecord {
            id: RecordId::from_uuid(row.id),
            period: PeriodKey::from_date(row.period),
            totals: RevenueTotals {
                total_amount: row.total_amount,
                total_paid_amount: row.total_paid_amount,
                total_pending_amount: row.total_pending_amount,
                invoice_count: row.invoice_count,
            },
            calculation_source,
            applied_revisions,
            version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode(row: &PgRow) -> Result<RevenueRecord, RepositoryError> {
    let raw = RecordRow::from_row(row)
        .map_err(|e| RepositoryError::Unexpected(format!("failed to decode revenue row: {e}")))?;
    raw.try_into()
}
