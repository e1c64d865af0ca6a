//! Per-run and per-target results.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scan::ScanOutcome;
use crate::types::{ObjectKind, ResolvedRef};

/// Terminal state of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Scanned { summary: serde_json::Value },
    NotApplicable { reason: String },
    Failed { error: String },
    Cancelled,
}

impl TargetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOutcome::Scanned { .. } => "scanned",
            TargetOutcome::NotApplicable { .. } => "not_applicable",
            TargetOutcome::Failed { .. } => "failed",
            TargetOutcome::Cancelled => "cancelled",
        }
    }
}

impl From<ScanOutcome> for TargetOutcome {
    fn from(outcome: ScanOutcome) -> Self {
        match outcome {
            ScanOutcome::Completed { summary } => TargetOutcome::Scanned { summary },
            ScanOutcome::NotApplicable { reason } => TargetOutcome::NotApplicable { reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Identifier as supplied.
    pub target: String,
    pub canonical_id: String,
    pub kind: ObjectKind,
    pub outcome: TargetOutcome,
    /// Where the target was mounted, if it got that far.
    pub mount_path: Option<PathBuf>,
    /// Set when teardown left resources behind.
    pub cleanup_error: Option<String>,
    pub duration_ms: u64,
}

impl TargetReport {
    pub(crate) fn new(target: &str, resolved: &ResolvedRef, outcome: TargetOutcome) -> Self {
        Self {
            target: target.to_string(),
            canonical_id: resolved.canonical_id.clone(),
            kind: resolved.kind,
            outcome,
            mount_path: None,
            cleanup_error: None,
            duration_ms: 0,
        }
    }

    /// Scanned or not applicable, and nothing leaked.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Scanned { .. } | TargetOutcome::NotApplicable { .. })
            && self.cleanup_error.is_none()
    }
}

/// Results of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Effective (clamped) concurrency.
    pub concurrency: usize,
    pub cancelled: bool,
    /// One report per target, in input order.
    pub reports: Vec<TargetReport>,
}

impl JobResults {
    pub fn succeeded(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| r.is_success())
    }

    /// Targets that failed or left resources behind.
    pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| {
            matches!(r.outcome, TargetOutcome::Failed { .. }) || r.cleanup_error.is_some()
        })
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed().next().is_none()
    }
}
