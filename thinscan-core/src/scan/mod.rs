//! Per-target scan collaborator.
//!
//! The orchestrator mounts a target and hands the mounted filesystem to a
//! [`Scanner`]. What a scan does with it (package inventory, vulnerability
//! matching, reporting) is up to the implementation.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use thinscan_core::scan::{ScanJob, ScanOutcome, Scanner};
//!
//! struct CountEntries;
//!
//! #[async_trait]
//! impl Scanner for CountEntries {
//!     async fn scan(&self, job: &ScanJob) -> thinscan_core::Result<ScanOutcome> {
//!         let entries = std::fs::read_dir(&job.handle.mount_path)
//!             .map_err(thinscan_core::ThinscanError::internal)?
//!             .count();
//!         Ok(ScanOutcome::Completed { summary: serde_json::json!({ "entries": entries }) })
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mount::MountHandle;
use crate::types::ResolvedRef;

mod release;

pub use release::ReleaseScanner;

/// Everything a scanner gets to see about one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    /// Target exactly as the operator supplied it.
    pub target: String,
    pub resolved: ResolvedRef,
    /// The live mount; read-only.
    pub handle: MountHandle,
    /// Containers created from the same image as the target.
    pub related_containers: Vec<String>,
}

/// Result of a scan that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The scanner understood the filesystem and produced a summary.
    Completed { summary: serde_json::Value },
    /// The filesystem is not something this scanner handles.
    NotApplicable { reason: String },
}

/// External scan logic run against a mounted target.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, job: &ScanJob) -> Result<ScanOutcome>;
}
