//! Bounded-concurrency scan orchestration.
//!
//! A run resolves every target up front (failing fast on unknown or dead
//! targets), then admits workers through a counting semaphore sized to the
//! clamped concurrency. Each worker owns one target end to end:
//! mount, scan, record, cleanup. Cleanup runs on every path out of a worker
//! that produced a [`MountHandle`](crate::mount::MountHandle), including a
//! scan that errors, panics or is aborted by cancellation.

mod cancel;
mod inventory;
mod progress;
mod report;

pub use cancel::CancelHandle;
pub use inventory::{HostInventory, TargetSelection};
pub use progress::{ProgressSnapshot, ScanProgress};
pub use report::{JobResults, TargetOutcome, TargetReport};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::devmapper::BlockTools;
use crate::error::{Result, ThinscanError};
use crate::mount::ThinMountManager;
use crate::observability::metrics;
use crate::resolver::IdentifierResolver;
use crate::runtime::ContainerRuntime;
use crate::scan::{ScanJob, Scanner};
use crate::types::{ObjectKind, ResolvedRef};

/// Fewest workers a run uses.
pub const MIN_WORKERS: usize = 2;
/// Most workers a run uses; device-mapper and udev misbehave beyond this.
pub const MAX_WORKERS: usize = 4;

/// Clamp a requested worker count to `[MIN_WORKERS, MAX_WORKERS]`.
///
/// With no request, the number of available CPUs is clamped instead.
pub fn effective_concurrency(requested: Option<usize>) -> usize {
    let wanted = requested.unwrap_or_else(|| {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(MIN_WORKERS)
    });
    wanted.clamp(MIN_WORKERS, MAX_WORKERS)
}

/// A target that passed resolution and the dead-container check.
#[derive(Debug, Clone)]
struct PendingTarget {
    target: String,
    resolved: ResolvedRef,
    related_containers: Vec<String>,
}

/// Drives scan runs over many targets.
pub struct ScanOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    resolver: IdentifierResolver,
    mounts: Arc<ThinMountManager>,
    scanner: Arc<dyn Scanner>,
    config: Arc<Config>,
    progress: Arc<ScanProgress>,
}

impl ScanOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tools: Arc<dyn BlockTools>,
        scanner: Arc<dyn Scanner>,
        config: Arc<Config>,
    ) -> Self {
        let resolver = IdentifierResolver::new(Arc::clone(&runtime));
        let mounts = Arc::new(ThinMountManager::new(
            Arc::clone(&runtime),
            tools,
            Arc::clone(&config),
        ));
        Self {
            runtime,
            resolver,
            mounts,
            scanner,
            config,
            progress: Arc::new(ScanProgress::new()),
        }
    }

    pub fn resolver(&self) -> &IdentifierResolver {
        &self.resolver
    }

    pub fn mounts(&self) -> &Arc<ThinMountManager> {
        &self.mounts
    }

    /// Shared progress counters; readable at any time during a run.
    pub fn progress(&self) -> Arc<ScanProgress> {
        Arc::clone(&self.progress)
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// Expand `selection` against the live host, then [`run`](Self::run) it.
    pub async fn run_selection(
        &self,
        selection: &TargetSelection,
        concurrency: Option<usize>,
        cancel: &CancelHandle,
    ) -> Result<JobResults> {
        let inventory = HostInventory::collect(self.runtime.as_ref()).await?;
        let targets = inventory.select(selection)?;
        self.run_with_inventory(&targets, &inventory, concurrency, cancel).await
    }

    /// Scan `targets` with at most `effective_concurrency(concurrency)`
    /// workers in flight. `None` falls back to the configured request.
    ///
    /// # Errors
    /// - `NoTargets` when `targets` is empty
    /// - `ResolutionError` naming the first target that does not resolve
    /// - `DeadTarget` when a target is a dead container
    ///
    /// All three are raised before anything is mounted. Per-target mount,
    /// scan and cleanup failures are recorded in the returned reports.
    pub async fn run(
        &self,
        targets: &[String],
        concurrency: Option<usize>,
        cancel: &CancelHandle,
    ) -> Result<JobResults> {
        let inventory = HostInventory::collect(self.runtime.as_ref()).await?;
        self.run_with_inventory(targets, &inventory, concurrency, cancel).await
    }

    #[instrument(skip_all, fields(targets = targets.len()))]
    async fn run_with_inventory(
        &self,
        targets: &[String],
        inventory: &HostInventory,
        concurrency: Option<usize>,
        cancel: &CancelHandle,
    ) -> Result<JobResults> {
        if targets.is_empty() {
            return Err(ThinscanError::NoTargets { message: "No targets were given".to_string() });
        }

        let pending = self.prepare(targets, inventory).await?;
        let limit = effective_concurrency(concurrency.or(self.config.concurrency));
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(%run_id, workers = limit, "Number of targets to scan: {}", pending.len());
        self.progress.begin(pending.len(), limit);

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut slots: Vec<Slot> = Vec::with_capacity(pending.len());
        let mut queue = pending.into_iter();

        while let Some(next) = queue.next() {
            // Blocks until a worker finishes or the operator cancels.
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                warn!("Cancellation requested, not admitting remaining targets");
                slots.push(Slot::Done(cancelled_report(&next)));
                for rest in queue.by_ref() {
                    slots.push(Slot::Done(cancelled_report(&rest)));
                }
                break;
            };

            let fallback = TargetReport::new(
                &next.target,
                &next.resolved,
                TargetOutcome::Failed { error: String::new() },
            );
            let worker = Worker {
                mounts: Arc::clone(&self.mounts),
                scanner: Arc::clone(&self.scanner),
                progress: Arc::clone(&self.progress),
                cancel: cancel.clone(),
            };
            slots.push(Slot::Running(tokio::spawn(worker.run(next, permit)), fallback));
        }

        let mut reports = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Done(report) => reports.push(report),
                Slot::Running(handle, mut fallback) => match handle.await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        error!(input = %fallback.target, "Worker terminated abnormally: {}", e);
                        fallback.outcome =
                            TargetOutcome::Failed { error: format!("worker terminated: {}", e) };
                        reports.push(fallback);
                    }
                },
            }
        }

        let results = JobResults {
            run_id,
            started_at,
            finished_at: Utc::now(),
            concurrency: limit,
            cancelled: cancel.is_cancelled(),
            reports,
        };

        info!(
            %run_id,
            succeeded = results.succeeded().count(),
            failed = results.failed().count(),
            cancelled = results.cancelled,
            "Scan run finished"
        );
        Ok(results)
    }

    /// Resolve every target and reject dead containers before any work.
    async fn prepare(
        &self,
        targets: &[String],
        inventory: &HostInventory,
    ) -> Result<Vec<PendingTarget>> {
        let mut pending = Vec::with_capacity(targets.len());
        for target in targets {
            let resolved = self.resolver.resolve(target).await.map_err(|e| {
                ThinscanError::ResolutionError { target: target.clone(), source: Box::new(e) }
            })?;

            if resolved.kind == ObjectKind::Container && inventory.is_dead(&resolved.canonical_id) {
                return Err(ThinscanError::DeadTarget { container_id: resolved.canonical_id });
            }

            pending.push(PendingTarget {
                target: target.clone(),
                related_containers: inventory.containers_for(&resolved.canonical_id),
                resolved,
            });
        }
        Ok(pending)
    }
}

enum Slot {
    Done(TargetReport),
    /// In-flight worker and the report to use if it dies.
    Running(JoinHandle<TargetReport>, TargetReport),
}

fn cancelled_report(pending: &PendingTarget) -> TargetReport {
    TargetReport::new(&pending.target, &pending.resolved, TargetOutcome::Cancelled)
}

/// One in-flight target.
struct Worker {
    mounts: Arc<ThinMountManager>,
    scanner: Arc<dyn Scanner>,
    progress: Arc<ScanProgress>,
    cancel: CancelHandle,
}

impl Worker {
    async fn run(self, pending: PendingTarget, permit: OwnedSemaphorePermit) -> TargetReport {
        // Dropped in reverse order: the active count falls before the slot frees.
        let _permit = permit;
        let _active = self.progress.enter();
        let started = Instant::now();

        let mut report = self.execute(&pending).await;
        report.duration_ms = started.elapsed().as_millis() as u64;

        metrics::record_scan_job(
            pending.resolved.kind,
            report.outcome.as_str(),
            started.elapsed().as_secs_f64(),
        );
        report
    }

    async fn execute(&self, pending: &PendingTarget) -> TargetReport {
        let mut report =
            TargetReport::new(&pending.target, &pending.resolved, TargetOutcome::Cancelled);

        if self.cancel.is_cancelled() {
            return report;
        }

        info!(input = %pending.target, "Mounting {}", pending.resolved);
        let handle = match self.mounts.mount(&pending.resolved).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(input = %pending.target, "Unable to mount: {}", e);
                report.outcome = TargetOutcome::Failed { error: e.to_string() };
                return report;
            }
        };
        report.mount_path = Some(handle.mount_path.clone());

        if !self.cancel.is_cancelled() {
            let job = ScanJob {
                target: pending.target.clone(),
                resolved: pending.resolved.clone(),
                handle: handle.clone(),
                related_containers: pending.related_containers.clone(),
            };
            report.outcome = self.scan(job).await;
        }

        if let Err(e) = self.mounts.cleanup(&handle).await {
            error!(
                input = %pending.target,
                path = %handle.mount_path.display(),
                "Cleanup left resources behind: {}",
                e
            );
            report.cleanup_error = Some(e.to_string());
        }

        report
    }

    /// Run the scan in its own task so a panic or cancellation cannot skip
    /// the caller's cleanup.
    async fn scan(&self, job: ScanJob) -> TargetOutcome {
        let scanner = Arc::clone(&self.scanner);
        let target = job.target.clone();
        let mut task = tokio::spawn(async move { scanner.scan(&job).await });

        let joined = tokio::select! {
            joined = &mut task => Some(joined),
            _ = self.cancel.cancelled() => None,
        };

        match joined {
            Some(Ok(Ok(outcome))) => outcome.into(),
            Some(Ok(Err(e))) => {
                warn!(input = %target, "Scan failed: {}", e);
                TargetOutcome::Failed { error: e.to_string() }
            }
            Some(Err(e)) if e.is_panic() => {
                error!(input = %target, "Scan panicked");
                TargetOutcome::Failed { error: "scan panicked".to_string() }
            }
            Some(Err(e)) => TargetOutcome::Failed { error: e.to_string() },
            None => {
                warn!(input = %target, "Scan cancelled");
                task.abort();
                TargetOutcome::Cancelled
            }
        }
    }
}
