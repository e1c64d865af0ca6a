//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration
//!
//! Samples go to whatever `metrics` recorder the embedding binary installs;
//! without one they are dropped.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::error::CleanupStep;
use crate::types::ObjectKind;

/// Register all core metrics with descriptions.
pub fn register_metrics() {
    describe_histogram!("thinscan_mount_duration_seconds", "Time from resolve to mounted thin device");
    describe_counter!("thinscan_mounts_total", "Total number of successful thin-device mounts");
    describe_counter!("thinscan_mount_failures_total", "Total number of failed mounts");

    describe_histogram!("thinscan_cleanup_duration_seconds", "Time to tear down a mount");
    describe_counter!("thinscan_cleanups_total", "Total number of completed cleanups");
    describe_counter!(
        "thinscan_cleanup_failures_total",
        "Total number of cleanup failures (by step)"
    );
    describe_counter!("thinscan_unmount_retries_total", "Total number of failed umount attempts");

    describe_histogram!("thinscan_scan_duration_seconds", "Per-target scan job duration (by kind)");
    describe_counter!("thinscan_scan_jobs_total", "Total number of finished scan jobs (by outcome)");
    describe_gauge!("thinscan_active_workers", "Number of scan workers currently in flight");
}

pub fn record_mount(duration_secs: f64) {
    histogram!("thinscan_mount_duration_seconds").record(duration_secs);
    counter!("thinscan_mounts_total").increment(1);
}

pub fn record_mount_failure() {
    counter!("thinscan_mount_failures_total").increment(1);
}

pub fn record_cleanup(duration_secs: f64) {
    histogram!("thinscan_cleanup_duration_seconds").record(duration_secs);
    counter!("thinscan_cleanups_total").increment(1);
}

pub fn record_cleanup_failure(step: CleanupStep) {
    counter!("thinscan_cleanup_failures_total", "step" => step.as_str()).increment(1);
}

pub fn record_unmount_retry() {
    counter!("thinscan_unmount_retries_total").increment(1);
}

pub fn record_scan_job(kind: ObjectKind, outcome: &'static str, duration_secs: f64) {
    histogram!("thinscan_scan_duration_seconds", "kind" => kind.as_str()).record(duration_secs);
    counter!("thinscan_scan_jobs_total", "outcome" => outcome).increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!("thinscan_active_workers").set(count as f64);
}
