//! Built-in scanner reporting the target's OS release.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ScanJob, ScanOutcome, Scanner};
use crate::error::Result;

/// Where os-release may live inside a mounted thin device. Devicemapper
/// thin devices keep the container filesystem under `rootfs/`.
const RELEASE_CANDIDATES: &[&str] =
    &["rootfs/etc/os-release", "rootfs/usr/lib/os-release", "etc/os-release", "usr/lib/os-release"];

/// Reads `os-release` from the mounted filesystem.
///
/// Targets without one are reported as not applicable, like a scan that
/// only understands particular distributions.
#[derive(Debug, Clone, Default)]
pub struct ReleaseScanner {
    /// Restrict to these `ID=` values; empty accepts any distribution.
    pub accepted_ids: Vec<String>,
}

impl ReleaseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { accepted_ids: ids.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Scanner for ReleaseScanner {
    async fn scan(&self, job: &ScanJob) -> Result<ScanOutcome> {
        let Some(path) = find_release_file(&job.handle.mount_path).await else {
            return Ok(ScanOutcome::NotApplicable {
                reason: "no os-release file found".to_string(),
            });
        };
        debug!(path = %path.display(), "Reading os-release");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ScanOutcome::NotApplicable {
                    reason: format!("unreadable os-release: {}", e),
                })
            }
        };
        let fields = parse_os_release(&content);
        let id = fields.get("ID").cloned().unwrap_or_default();

        if !self.accepted_ids.is_empty() && !self.accepted_ids.iter().any(|a| a == &id) {
            return Ok(ScanOutcome::NotApplicable {
                reason: format!("distribution {} is not supported", id),
            });
        }

        Ok(ScanOutcome::Completed {
            summary: serde_json::json!({
                "id": id,
                "version_id": fields.get("VERSION_ID"),
                "pretty_name": fields.get("PRETTY_NAME"),
                "related_containers": job.related_containers.len(),
            }),
        })
    }
}

async fn find_release_file(root: &Path) -> Option<PathBuf> {
    for candidate in RELEASE_CANDIDATES {
        let path = root.join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }
    None
}

/// Parse `KEY=value` lines, stripping optional quotes.
fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').trim_matches('\'').to_string()))
        .collect()
}
