//! PostgreSQL implementation of ExecutionLedger
//!
//! Production persistence using PostgreSQL with:
//! - One row per execution in `actflow_executions`
//! - One row per step attempt in `actflow_execution_records`, keyed by
//!   `(identifier, step_index, attempt)` so a repeated append cannot
//!   silently duplicate a record
//! - Row locks on the execution while appending to keep records ordered

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::{
    ExecutionRecord, ExecutionResult, ExecutionState, ExecutionStatus, RequestEnvelope,
    RequestIdentifier,
};

/// PostgreSQL implementation of ExecutionLedger
///
/// # Example
///
/// ```ignore
/// use actflow_durable::PostgresExecutionLedger;
///
/// let ledger = PostgresExecutionLedger::connect("postgres://localhost/actflow").await?;
/// ledger.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExecutionLedger {
    pool: PgPool,
}

impl PostgresExecutionLedger {
    /// Create a ledger over an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to ledger database: {}", e);
                LedgerError::Unavailable(e.to_string())
            })?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("migration failed: {}", e)))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn ser_err(e: serde_json::Error) -> LedgerError {
    LedgerError::Serialization(e.to_string())
}

fn to_u32(value: i32, column: &str) -> Result<u32, LedgerError> {
    u32::try_from(value)
        .map_err(|_| LedgerError::Serialization(format!("negative {}: {}", column, value)))
}

fn record_from_row(row: &PgRow) -> Result<ExecutionRecord, LedgerError> {
    let step_index: i32 = row.try_get("step_index").map_err(db_err)?;
    let attempt: i32 = row.try_get("attempt").map_err(db_err)?;
    let outcome: serde_json::Value = row.try_get("outcome").map_err(db_err)?;
    let timestamp: DateTime<Utc> = row.try_get("recorded_at").map_err(db_err)?;

    Ok(ExecutionRecord {
        step_index: to_u32(step_index, "step_index")?,
        attempt: to_u32(attempt, "attempt")?,
        outcome: serde_json::from_value(outcome).map_err(ser_err)?,
        timestamp,
    })
}

#[async_trait]
impl ExecutionLedger for PostgresExecutionLedger {
    #[instrument(skip(self, envelope))]
    async fn create_execution(
        &self,
        identifier: &RequestIdentifier,
        run_id: Uuid,
        envelope: &RequestEnvelope,
    ) -> Result<ExecutionState, LedgerError> {
        let envelope_json = serde_json::to_value(envelope).map_err(ser_err)?;

        let row = sqlx::query(
            r#"
            INSERT INTO actflow_executions (identifier, run_id, envelope, status)
            VALUES ($1, $2, $3, 'CREATED')
            ON CONFLICT (identifier) DO NOTHING
            RETURNING created_at, updated_at
            "#,
        )
        .bind(identifier.as_str())
        .bind(run_id)
        .bind(&envelope_json)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create execution: {}", e);
            db_err(e)
        })?
        .ok_or_else(|| LedgerError::AlreadyExists(identifier.clone()))?;

        let mut state = ExecutionState::new(identifier.clone(), run_id, envelope.clone());
        state.created_at = row.try_get("created_at").map_err(db_err)?;
        state.updated_at = row.try_get("updated_at").map_err(db_err)?;

        debug!(%identifier, %run_id, "created execution");
        Ok(state)
    }

    #[instrument(skip(self, record), fields(step = record.step_index, attempt = record.attempt))]
    async fn append(
        &self,
        identifier: &RequestIdentifier,
        record: ExecutionRecord,
    ) -> Result<(), LedgerError> {
        let outcome = serde_json::to_value(&record.outcome).map_err(ser_err)?;
        let step_index = i32::try_from(record.step_index)
            .map_err(|_| LedgerError::Serialization("step_index out of range".into()))?;
        let attempt = i32::try_from(record.attempt)
            .map_err(|_| LedgerError::Serialization("attempt out of range".into()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock the execution row so appends for one identifier serialize
        sqlx::query("SELECT identifier FROM actflow_executions WHERE identifier = $1 FOR UPDATE")
            .bind(identifier.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| LedgerError::NotFound(identifier.clone()))?;

        let last = sqlx::query(
            r#"
            SELECT step_index, attempt
            FROM actflow_execution_records
            WHERE identifier = $1
            ORDER BY step_index DESC, attempt DESC
            LIMIT 1
            "#,
        )
        .bind(identifier.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .map(|row| -> Result<(u32, u32), LedgerError> {
            let step: i32 = row.try_get("step_index").map_err(db_err)?;
            let attempt: i32 = row.try_get("attempt").map_err(db_err)?;
            Ok((to_u32(step, "step_index")?, to_u32(attempt, "attempt")?))
        })
        .transpose()?;

        check_order(identifier, last, &record)?;

        sqlx::query(
            r#"
            INSERT INTO actflow_execution_records (identifier, step_index, attempt, outcome, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(identifier.as_str())
        .bind(step_index)
        .bind(attempt)
        .bind(&outcome)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to append execution record: {}", e);
            db_err(e)
        })?;

        sqlx::query("UPDATE actflow_executions SET updated_at = NOW() WHERE identifier = $1")
            .bind(identifier.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(%identifier, "appended execution record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read(
        &self,
        identifier: &RequestIdentifier,
    ) -> Result<Vec<ExecutionRecord>, LedgerError> {
        let exists = sqlx::query("SELECT 1 FROM actflow_executions WHERE identifier = $1")
            .bind(identifier.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(LedgerError::NotFound(identifier.clone()));
        }

        let rows = sqlx::query(
            r#"
            SELECT step_index, attempt, outcome, recorded_at
            FROM actflow_execution_records
            WHERE identifier = $1
            ORDER BY step_index, attempt
            "#,
        )
        .bind(identifier.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn read_state(
        &self,
        identifier: &RequestIdentifier,
    ) -> Result<Option<ExecutionState>, LedgerError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT run_id, envelope, status, result, cancel_requested, created_at, updated_at
            FROM actflow_executions
            WHERE identifier = $1
            "#,
        )
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(db_err)?;
        let envelope: serde_json::Value = row.try_get("envelope").map_err(db_err)?;
        let result: Option<serde_json::Value> = row.try_get("result").map_err(db_err)?;

        let ledger = self.read(identifier).await?;

        Ok(Some(ExecutionState {
            identifier: identifier.clone(),
            run_id: row.try_get("run_id").map_err(db_err)?,
            envelope: serde_json::from_value(envelope).map_err(ser_err)?,
            status: status.parse().map_err(LedgerError::Serialization)?,
            result: result
                .map(serde_json::from_value::<ExecutionResult>)
                .transpose()
                .map_err(ser_err)?,
            ledger,
            cancel_requested: row.try_get("cancel_requested").map_err(db_err)?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
        }))
    }

    #[instrument(skip(self, result))]
    async fn update_status(
        &self,
        identifier: &RequestIdentifier,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
    ) -> Result<(), LedgerError> {
        let result_json = result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(ser_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE actflow_executions
            SET status = $2,
                result = $3,
                cancel_requested = CASE WHEN $4 THEN FALSE ELSE cancel_requested END,
                updated_at = NOW()
            WHERE identifier = $1
            "#,
        )
        .bind(identifier.as_str())
        .bind(status.as_str())
        .bind(&result_json)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update execution status: {}", e);
            db_err(e)
        })?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound(identifier.clone()));
        }

        debug!(%identifier, %status, "updated execution status");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn request_cancel(&self, identifier: &RequestIdentifier) -> Result<bool, LedgerError> {
        let row = sqlx::query(
            r#"
            UPDATE actflow_executions
            SET cancel_requested = (status IN ('CREATED', 'PROCESSING')),
                updated_at = NOW()
            WHERE identifier = $1
            RETURNING cancel_requested
            "#,
        )
        .bind(identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| LedgerError::NotFound(identifier.clone()))?;

        row.try_get("cancel_requested").map_err(db_err)
    }

    #[instrument(skip(self))]
    async fn list_unfinished(&self) -> Result<Vec<RequestIdentifier>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT identifier
            FROM actflow_executions
            WHERE status IN ('CREATED', 'PROCESSING')
            ORDER BY created_at, run_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("identifier")
                    .map(RequestIdentifier::from)
                    .map_err(db_err)
            })
            .collect()
    }
}
