//! Sequential orchestration of the full sync run
//!
//! One run walks the three sources in their declared order. Each source is
//! probed, fetched, mapped, and reconciled independently; any failure is
//! folded into that source's outcome and the run moves on, so a broken
//! upstream never blocks the remaining sources. The run report aggregates
//! the per-source outcomes the way operators read them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::fetch::TourApiClient;
use crate::mapper;
use crate::source::SourceKind;
use crate::sync::{Reconciler, SyncStats};

/// Outcome of syncing a single source, as it appears in the run report.
#[derive(Debug, Serialize)]
pub struct SourceOutcome {
    pub api_type: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    /// Wall-clock seconds spent on this source.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    fn succeeded(kind: SourceKind, stats: SyncStats, elapsed: Duration) -> Self {
        Self {
            api_type: kind.as_str().to_string(),
            status: "SUCCESS",
            total: Some(stats.total),
            new: Some(stats.new),
            updated: Some(stats.updated),
            execution_time: elapsed_secs(elapsed),
            error: None,
        }
    }

    fn failed(kind: SourceKind, error: String, elapsed: Duration) -> Self {
        Self {
            api_type: kind.as_str().to_string(),
            status: "FAILED",
            total: None,
            new: None,
            updated: None,
            execution_time: elapsed_secs(elapsed),
            error: Some(error),
        }
    }
}

/// Aggregated counts across all sources in a run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub total_apis: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_new_items: i64,
    pub total_updated_items: i64,
}

impl RunSummary {
    fn from_results(results: &[SourceOutcome]) -> Self {
        Self {
            total_apis: results.len(),
            successful: results.iter().filter(|r| r.status == "SUCCESS").count(),
            failed: results.iter().filter(|r| r.status == "FAILED").count(),
            total_new_items: results.iter().filter_map(|r| r.new).sum(),
            total_updated_items: results.iter().filter_map(|r| r.updated).sum(),
        }
    }
}

/// Full report for one sync run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock seconds for the whole run.
    pub total_execution_time: f64,
    pub summary: RunSummary,
    pub results: Vec<SourceOutcome>,
    /// Always present so callers can correlate invocations; `null` when the
    /// trigger carried no debug payload.
    pub debug_info: Value,
}

/// Drives a full sync run across all sources.
pub struct SyncRunner {
    client: TourApiClient,
    reconciler: Reconciler,
}

impl SyncRunner {
    pub fn new(client: TourApiClient, reconciler: Reconciler) -> Self {
        Self { client, reconciler }
    }

    /// Sync every source sequentially and assemble the run report.
    ///
    /// Never fails: per-source errors are carried inside the report.
    pub async fn run_all(&self, debug_info: Option<Value>) -> RunReport {
        let started = Instant::now();
        info!(sources = SourceKind::ALL.len(), "Starting sync run");

        let mut results = Vec::with_capacity(SourceKind::ALL.len());
        for kind in SourceKind::ALL {
            results.push(self.run_source(kind).await);
        }

        let summary = RunSummary::from_results(&results);
        info!(
            successful = summary.successful,
            failed = summary.failed,
            new = summary.total_new_items,
            updated = summary.total_updated_items,
            elapsed_secs = elapsed_secs(started.elapsed()),
            "Sync run finished"
        );

        RunReport {
            success: summary.failed == 0,
            timestamp: Utc::now(),
            total_execution_time: elapsed_secs(started.elapsed()),
            summary,
            results,
            debug_info: debug_info.unwrap_or(Value::Null),
        }
    }

    /// Probe, fetch, map, and reconcile one source.
    pub async fn run_source(&self, kind: SourceKind) -> SourceOutcome {
        let started = Instant::now();
        info!(source = %kind, "Starting source sync");

        let probe = self.client.probe(kind).await;
        if !probe.success {
            let reason = probe
                .error
                .unwrap_or_else(|| "Connectivity probe failed".to_string());
            warn!(source = %kind, status = ?probe.status, error = %reason, "Probe failed, skipping source");
            return SourceOutcome::failed(kind, reason, started.elapsed());
        }

        match self.sync_source(kind).await {
            Ok(stats) => {
                info!(
                    source = %kind,
                    total = stats.total,
                    new = stats.new,
                    updated = stats.updated,
                    "Source sync succeeded"
                );
                SourceOutcome::succeeded(kind, stats, started.elapsed())
            },
            Err(reason) => {
                error!(source = %kind, error = %reason, "Source sync failed");
                SourceOutcome::failed(kind, reason, started.elapsed())
            },
        }
    }

    async fn sync_source(&self, kind: SourceKind) -> Result<SyncStats, String> {
        let envelope = self.client.fetch(kind).await.map_err(|e| e.to_string())?;

        let records = mapper::map(kind, &envelope);
        if records.is_empty() {
            // An empty listing is a valid outcome. The reconciler is never
            // invoked for it, so no destination read and no audit row.
            warn!(source = %kind, "No records extracted, skipping reconciliation");
            return Ok(SyncStats::default());
        }

        self.reconciler.sync(kind, records).await.map_err(|e| e.to_string())
    }
}

fn elapsed_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn outcome(status: &'static str, new: Option<i64>, updated: Option<i64>) -> SourceOutcome {
        SourceOutcome {
            api_type: "greentour".to_string(),
            status,
            total: new.zip(updated).map(|(n, u)| n + u),
            new,
            updated,
            execution_time: 0.1,
            error: (status == "FAILED").then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_summary_aggregates_only_successful_counts() {
        let results = vec![
            outcome("SUCCESS", Some(5), Some(2)),
            outcome("FAILED", None, None),
            outcome("SUCCESS", Some(0), Some(3)),
        ];

        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.total_apis, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_new_items, 5);
        assert_eq!(summary.total_updated_items, 5);
    }

    #[test]
    fn test_failed_outcome_omits_counts_in_json() {
        let json = serde_json::to_value(outcome("FAILED", None, None)).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert!(json.get("total").is_none());
        assert!(json.get("new").is_none());
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_report_json_carries_summary_names_and_debug_info() {
        let results = vec![outcome("SUCCESS", Some(1), Some(0))];
        let summary = RunSummary::from_results(&results);
        let report = RunReport {
            success: true,
            timestamp: Utc::now(),
            total_execution_time: 1.23,
            summary,
            results,
            debug_info: Value::Null,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["total_apis"], 1);
        assert_eq!(json["summary"]["successful"], 1);
        assert_eq!(json["summary"]["failed"], 0);
        // debug_info is always present, null when nothing was provided
        assert!(json.as_object().unwrap().contains_key("debug_info"));
        assert_eq!(json["debug_info"], Value::Null);
        assert_eq!(json["total_execution_time"], 1.23);
        assert_eq!(json["results"][0]["execution_time"], 0.1);
    }

    #[test]
    fn test_elapsed_rounds_to_centiseconds() {
        assert_eq!(elapsed_secs(Duration::from_millis(1234)), 1.23);
        assert_eq!(elapsed_secs(Duration::ZERO), 0.0);
    }
}
