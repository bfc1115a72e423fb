//! Reconciliation of normalized records against destination tables
//!
//! Incoming records are diffed against the destination by key and content
//! hash: unknown keys are inserted, known keys with a differing hash are
//! updated (upsert-on-id, carrying forward the existing row id), matching
//! hashes are left alone. Writes go out in bounded sequential batches; a
//! batch failure aborts the remaining batches for that source but does not
//! roll back batches already committed. The write path is at-least-once
//! and non-atomic across batches, and overlapping runs are not mutually
//! excluded in-process (external scheduling must serialize them).
//!
//! Every sync, including an empty one, records one audit row in
//! `sync_logs`. A failure to write that audit row is logged and swallowed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::mapper::NormalizedRecord;
use crate::source::SourceKind;

/// Maximum rows per write statement.
pub const WRITE_BATCH_SIZE: usize = 100;

/// Per-source counts for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SyncStats {
    pub total: i64,
    pub new: i64,
    pub updated: i64,
}

/// Minimal projection of a destination row, enough to drive diffing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExistingRow {
    pub id: Uuid,
    pub key: String,
    pub data_hash: String,
}

/// Outcome of partitioning incoming records against existing rows.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub inserts: Vec<NormalizedRecord>,
    pub updates: Vec<(Uuid, NormalizedRecord)>,
    pub unchanged: usize,
}

/// Partition incoming records into insert/update/unchanged sets.
///
/// Every record lands in exactly one set, so
/// `inserts + updates + unchanged == records.len()`.
pub fn partition(
    records: Vec<NormalizedRecord>,
    existing: &HashMap<String, ExistingRow>,
    key_fields: &[&str],
) -> Reconciliation {
    let mut outcome = Reconciliation::default();

    for record in records {
        let key = record.key_value(key_fields);
        match existing.get(&key) {
            None => outcome.inserts.push(record),
            Some(row) if row.data_hash != record.data_hash => {
                outcome.updates.push((row.id, record))
            },
            Some(_) => outcome.unchanged += 1,
        }
    }

    outcome
}

/// Persisted audit row describing one source's sync.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncLogEntry {
    pub id: Uuid,
    pub api_type: String,
    pub table_name: String,
    pub sync_date: NaiveDate,
    pub total_items: i64,
    pub new_items: i64,
    pub updated_items: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub execution_time_seconds: f64,
}

/// Reconciles mapped records into the destination tables.
pub struct Reconciler {
    db: PgPool,
}

impl Reconciler {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Sync one source's records and record the audit entry.
    ///
    /// Fails only when the destination read or a batch write errors;
    /// an empty input short-circuits to zero stats with a SUCCESS entry.
    pub async fn sync(
        &self,
        kind: SourceKind,
        records: Vec<NormalizedRecord>,
    ) -> Result<SyncStats, SyncError> {
        let started = Instant::now();
        let mut stats = SyncStats { total: records.len() as i64, ..Default::default() };

        info!(
            source = %kind,
            table = kind.table_name(),
            total = stats.total,
            "Syncing records"
        );

        if records.is_empty() {
            self.write_sync_log(kind, &stats, "SUCCESS", None, started.elapsed()).await;
            return Ok(stats);
        }

        match self.reconcile(kind, records, &mut stats).await {
            Ok(()) => {
                self.write_sync_log(kind, &stats, "SUCCESS", None, started.elapsed()).await;
                Ok(stats)
            },
            Err(e) => {
                self.write_sync_log(kind, &stats, "FAILED", Some(e.to_string()), started.elapsed())
                    .await;
                Err(e)
            },
        }
    }

    async fn reconcile(
        &self,
        kind: SourceKind,
        records: Vec<NormalizedRecord>,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        let existing = self.load_existing(kind).await?;
        debug!(source = %kind, existing = existing.len(), "Loaded existing rows");

        let outcome = partition(records, &existing, kind.key_fields());
        debug!(
            source = %kind,
            inserts = outcome.inserts.len(),
            updates = outcome.updates.len(),
            unchanged = outcome.unchanged,
            "Partitioned incoming records"
        );

        if !outcome.inserts.is_empty() {
            let rows: Vec<Value> = outcome.inserts.iter().map(|r| r.insert_row()).collect();
            self.write_batches(&insert_sql(kind), rows).await?;
            stats.new = outcome.inserts.len() as i64;
            info!(source = %kind, inserted = stats.new, "Inserted new records");
        }

        if !outcome.updates.is_empty() {
            let now = Utc::now();
            let rows: Vec<Value> =
                outcome.updates.iter().map(|(id, r)| r.update_row(*id, now)).collect();
            self.write_batches(&upsert_sql(kind), rows).await?;
            stats.updated = outcome.updates.len() as i64;
            info!(source = %kind, updated = stats.updated, "Updated changed records");
        }

        Ok(())
    }

    /// Project id, concatenated key, and hash for every destination row.
    async fn load_existing(
        &self,
        kind: SourceKind,
    ) -> Result<HashMap<String, ExistingRow>, SyncError> {
        let key_expr = kind
            .key_fields()
            .iter()
            .map(|field| format!("coalesce({}::text, '')", field))
            .collect::<Vec<_>>()
            .join(" || '_' || ");

        let sql = format!(
            "SELECT id, ({}) AS key, data_hash FROM {}",
            key_expr,
            kind.table_name()
        );

        let rows: Vec<ExistingRow> = sqlx::query_as(&sql).fetch_all(&self.db).await?;
        Ok(rows.into_iter().map(|row| (row.key.clone(), row)).collect())
    }

    /// Execute one statement per chunk, sequentially in ascending order.
    async fn write_batches(&self, sql: &str, rows: Vec<Value>) -> Result<(), SyncError> {
        for (index, chunk) in rows.chunks(WRITE_BATCH_SIZE).enumerate() {
            let payload = serde_json::to_value(chunk)?;
            sqlx::query(sql).bind(payload).execute(&self.db).await?;
            debug!(batch = index + 1, rows = chunk.len(), "Wrote batch");
        }
        Ok(())
    }

    /// Append the audit row for this sync. Never escalates: losing an audit
    /// row is preferable to failing a sync that already committed.
    async fn write_sync_log(
        &self,
        kind: SourceKind,
        stats: &SyncStats,
        status: &str,
        error_message: Option<String>,
        elapsed: Duration,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_logs (
                api_type, table_name, sync_date, total_items, new_items,
                updated_items, status, error_message, completed_at,
                execution_time_seconds
            )
            VALUES ($1, $2, CURRENT_DATE, $3, $4, $5, $6, $7, now(), $8)
            "#,
        )
        .bind(kind.as_str())
        .bind(kind.table_name())
        .bind(stats.total)
        .bind(stats.new)
        .bind(stats.updated)
        .bind(status)
        .bind(error_message)
        .bind(elapsed.as_secs_f64())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => debug!(source = %kind, status, "Recorded sync log"),
            Err(e) => warn!(source = %kind, error = %e, "Failed to record sync log"),
        }
    }
}

/// Cheap destination connectivity check used at pre-flight.
pub async fn check_connection(db: &PgPool) -> bool {
    sqlx::query("SELECT id FROM sync_logs LIMIT 1")
        .fetch_optional(db)
        .await
        .is_ok()
}

/// Audit entries from the last `days` days, newest first.
pub async fn recent_sync_stats(db: &PgPool, days: i64) -> Result<Vec<SyncLogEntry>, SyncError> {
    let rows = sqlx::query_as::<_, SyncLogEntry>(
        r#"
        SELECT id, api_type, table_name, sync_date, total_items, new_items,
               updated_items, status, error_message, completed_at,
               execution_time_seconds
        FROM sync_logs
        WHERE sync_date >= CURRENT_DATE - ($1::bigint * INTERVAL '1 day')
        ORDER BY sync_date DESC, completed_at DESC
        "#,
    )
    .bind(days)
    .fetch_all(db)
    .await?;

    Ok(rows)
}

// ============================================================================
// Per-source write statements
// ============================================================================

/// Destination columns, in insert order, with their SQL types for
/// `jsonb_to_recordset` unpacking. Always ends with the injected
/// `data_hash` and `raw_data` audit columns.
fn column_defs(kind: SourceKind) -> &'static [(&'static str, &'static str)] {
    const GREENTOUR: &[(&str, &str)] = &[
        ("contentid", "text"),
        ("areacode", "text"),
        ("sigungucode", "text"),
        ("title", "text"),
        ("addr", "text"),
        ("tel", "text"),
        ("telname", "text"),
        ("mainimage", "text"),
        ("summary", "text"),
        ("createdtime", "text"),
        ("modifiedtime", "text"),
        ("cpyrhtdivcd", "text"),
        ("data_hash", "text"),
        ("raw_data", "jsonb"),
    ];

    const BARRIER_FREE: &[(&str, &str)] = &[
        ("contentid", "text"),
        ("contenttypeid", "text"),
        ("areacode", "text"),
        ("sigungucode", "text"),
        ("cat1", "text"),
        ("cat2", "text"),
        ("cat3", "text"),
        ("title", "text"),
        ("addr1", "text"),
        ("addr2", "text"),
        ("tel", "text"),
        ("firstimage", "text"),
        ("firstimage2", "text"),
        ("mapx", "double precision"),
        ("mapy", "double precision"),
        ("mlevel", "bigint"),
        ("zipcode", "text"),
        ("createdtime", "text"),
        ("modifiedtime", "text"),
        ("cpyrhtdivcd", "text"),
        ("lclssystm1", "text"),
        ("lclssystm2", "text"),
        ("lclssystm3", "text"),
        ("ldongregn_cd", "text"),
        ("ldongsigngu_cd", "text"),
        ("data_hash", "text"),
        ("raw_data", "jsonb"),
    ];

    const BASE_TOUR: &[(&str, &str)] = &[
        ("hubtatscode", "text"),
        ("baseym", "text"),
        ("areacd", "text"),
        ("areanm", "text"),
        ("signgucd", "text"),
        ("signgunm", "text"),
        ("hubtatsname", "text"),
        ("hubctgrylclsnm", "text"),
        ("hubctgrymclsnm", "text"),
        ("hubrank", "bigint"),
        ("mapx", "double precision"),
        ("mapy", "double precision"),
        ("data_hash", "text"),
        ("raw_data", "jsonb"),
    ];

    match kind {
        SourceKind::Greentour => GREENTOUR,
        SourceKind::BarrierFree => BARRIER_FREE,
        SourceKind::BaseTour => BASE_TOUR,
    }
}

/// Batch insert: one statement per chunk, the chunk bound as a JSONB array
/// and unpacked server-side.
fn insert_sql(kind: SourceKind) -> String {
    let cols = column_defs(kind);
    let names = cols.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ");
    let typed = cols
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) SELECT {} FROM jsonb_to_recordset($1::jsonb) AS t({})",
        kind.table_name(),
        names,
        names,
        typed
    )
}

/// Batch update as an upsert keyed on the destination-assigned row id, so a
/// whole chunk updates in one statement.
fn upsert_sql(kind: SourceKind) -> String {
    let cols = column_defs(kind);
    let names = cols.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ");
    let typed = cols
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = cols
        .iter()
        .map(|(name, _)| format!("{} = EXCLUDED.{}", name, name))
        .chain(std::iter::once("updated_at = EXCLUDED.updated_at".to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} (id, {names}, updated_at) \
         SELECT id, {names}, updated_at \
         FROM jsonb_to_recordset($1::jsonb) AS t(id uuid, {typed}, updated_at timestamptz) \
         ON CONFLICT (id) DO UPDATE SET {assignments}",
        table = kind.table_name(),
        names = names,
        typed = typed,
    )
}
