//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Uniqueness of `(machine_type, raw_id)` and `(machine_type, sequence)` is
//! enforced by the schema; violations surface as `StorageError::Conflict`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AbnormalEvent, MetricDefinition, MonitoredMachine, NewAbnormalEvent};
use crate::MachineType;
use crate::thresholds::BoundKind;

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_machine_type(row: &SqliteRow) -> StorageResult<MachineType> {
        let raw: String = row.get("machine_type");
        raw.parse().map_err(StorageError::SerializationError)
    }

    fn machine_from_row(row: &SqliteRow) -> StorageResult<MonitoredMachine> {
        Ok(MonitoredMachine {
            stable_id: row.get("stable_id"),
            machine_type: Self::parse_machine_type(row)?,
            raw_id: row.get("raw_id"),
            display_name: row.get("display_name"),
            sequence: row.get::<i64, _>("sequence") as u32,
        })
    }

    fn event_from_row(row: &SqliteRow) -> StorageResult<AbnormalEvent> {
        Ok(AbnormalEvent {
            sequence: row.get("sequence"),
            machine_type: Self::parse_machine_type(row)?,
            stable_id: row.get("stable_id"),
            display_name: row.get("display_name"),
            metric_name: row.get("metric_name"),
            threshold_at_violation: row.get("threshold_at_violation"),
            observed_value: row.get("observed_value"),
            occurred_at: Self::millis_to_timestamp(row.get("occurred_at")),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn find_machine(
        &self,
        machine_type: MachineType,
        raw_id: &str,
    ) -> StorageResult<Option<MonitoredMachine>> {
        let row = sqlx::query(
            r#"
            SELECT stable_id, machine_type, raw_id, display_name, sequence
            FROM monitored_machines
            WHERE machine_type = ? AND raw_id = ?
            "#,
        )
        .bind(machine_type.as_str())
        .bind(raw_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::machine_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_machine_by_stable_id(
        &self,
        stable_id: &str,
    ) -> StorageResult<Option<MonitoredMachine>> {
        let row = sqlx::query(
            r#"
            SELECT stable_id, machine_type, raw_id, display_name, sequence
            FROM monitored_machines
            WHERE stable_id = ?
            "#,
        )
        .bind(stable_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::machine_from_row).transpose()
    }

    async fn max_sequence(&self, machine_type: MachineType) -> StorageResult<Option<u32>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(sequence) FROM monitored_machines WHERE machine_type = ?")
                .bind(machine_type.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0.map(|v| v as u32))
    }

    #[instrument(skip(self, machine), fields(stable_id = %machine.stable_id))]
    async fn insert_machine(&self, machine: &MonitoredMachine) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_machines (
                stable_id, machine_type, raw_id, display_name, sequence, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&machine.stable_id)
        .bind(machine.machine_type.as_str())
        .bind(&machine.raw_id)
        .bind(&machine.display_name)
        .bind(machine.sequence as i64)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!("registered {} as {}", machine.raw_id, machine.stable_id);
        Ok(())
    }

    async fn update_display_name(&self, stable_id: &str, display_name: &str) -> StorageResult<()> {
        sqlx::query("UPDATE monitored_machines SET display_name = ? WHERE stable_id = ?")
            .bind(display_name)
            .bind(stable_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_definitions(&self) -> StorageResult<Vec<MetricDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT machine_type, metric_name, unit, over_threshold, under_threshold
            FROM metric_definitions
            ORDER BY machine_type, metric_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MetricDefinition {
                    machine_type: Self::parse_machine_type(row)?,
                    metric_name: row.get("metric_name"),
                    unit: row.get("unit"),
                    over_threshold: row.get("over_threshold"),
                    under_threshold: row.get("under_threshold"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn save_bound(
        &self,
        machine_type: MachineType,
        metric_name: &str,
        kind: BoundKind,
        value: f64,
        unit: Option<&str>,
    ) -> StorageResult<()> {
        let sql = match kind {
            BoundKind::Over => {
                r#"
                INSERT INTO metric_definitions (machine_type, metric_name, unit, over_threshold)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (machine_type, metric_name) DO UPDATE SET
                    unit = COALESCE(excluded.unit, metric_definitions.unit),
                    over_threshold = excluded.over_threshold
                "#
            }
            BoundKind::Under => {
                r#"
                INSERT INTO metric_definitions (machine_type, metric_name, unit, under_threshold)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (machine_type, metric_name) DO UPDATE SET
                    unit = COALESCE(excluded.unit, metric_definitions.unit),
                    under_threshold = excluded.under_threshold
                "#
            }
        };

        sqlx::query(sql)
            .bind(machine_type.as_str())
            .bind(metric_name)
            .bind(unit)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, event), fields(stable_id = %event.stable_id, metric = %event.metric_name))]
    async fn append_event(&self, event: NewAbnormalEvent) -> StorageResult<AbnormalEvent> {
        let result = sqlx::query(
            r#"
            INSERT INTO abnormal_events (
                machine_type, stable_id, display_name, metric_name,
                threshold_at_violation, observed_value, occurred_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.machine_type.as_str())
        .bind(&event.stable_id)
        .bind(&event.display_name)
        .bind(&event.metric_name)
        .bind(event.threshold_at_violation)
        .bind(event.observed_value)
        .bind(Self::timestamp_to_millis(&event.occurred_at))
        .execute(&self.pool)
        .await?;

        // stored with millisecond precision, mirror that in the returned row
        let mut event = event;
        event.occurred_at = Self::millis_to_timestamp(Self::timestamp_to_millis(&event.occurred_at));

        Ok(AbnormalEvent::from_new(result.last_insert_rowid(), event))
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<AbnormalEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, machine_type, stable_id, display_name, metric_name,
                   threshold_at_violation, observed_value, occurred_at
            FROM abnormal_events
            ORDER BY sequence DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn purge_events_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("purging violation events older than {}", before);

        let result = sqlx::query("DELETE FROM abnormal_events WHERE occurred_at < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old violation events", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
