//! Thin-device mount lifecycle.
//!
//! A mount walks `Unmounted → DeviceActivated → Mounted` and teardown walks
//! `Unmounting → DeviceRemoved → Cleaned`. Every forward step that fails
//! unwinds the steps already completed, in reverse order.
//!
//! Teardown order is fixed: unmount, remove device, remove directory,
//! remove ephemeral container. Each step is skippable when its resource is
//! already gone, so a failed cleanup can be retried with the same handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::devmapper::{self, BlockTools};
use crate::error::{CleanupStep, Result, ThinscanError};
use crate::observability::metrics;
use crate::orchestrator::CancelHandle;
use crate::paths;
use crate::resolver::IdentifierResolver;
use crate::runtime::ContainerRuntime;
use crate::types::{ObjectKind, ResolvedRef};

/// Lifecycle state of one thin-device exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    DeviceActivated,
    Mounted,
    Unmounting,
    DeviceRemoved,
    Cleaned,
}

impl MountState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MountState::Unmounted => "unmounted",
            MountState::DeviceActivated => "device_activated",
            MountState::Mounted => "mounted",
            MountState::Unmounting => "unmounting",
            MountState::DeviceRemoved => "device_removed",
            MountState::Cleaned => "cleaned",
        }
    }
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to tear a mount down again.
///
/// Returned by [`ThinMountManager::mount`] and consumed, unmodified, by
/// [`ThinMountManager::cleanup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountHandle {
    /// Ephemeral container (kind `Image`) or the scanned container itself.
    pub container_id: String,
    pub device_path: PathBuf,
    pub mount_path: PathBuf,
    pub device_name: String,
    pub kind: ObjectKind,
}

/// Resources acquired so far by an in-progress mount.
#[derive(Debug, Default)]
struct Acquired {
    ephemeral_container: Option<String>,
    device: Option<String>,
    directory: Option<PathBuf>,
}

/// Drives mount and teardown of thin devices.
pub struct ThinMountManager {
    runtime: Arc<dyn ContainerRuntime>,
    tools: Arc<dyn BlockTools>,
    config: Arc<Config>,
}

impl ThinMountManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tools: Arc<dyn BlockTools>,
        config: Arc<Config>,
    ) -> Self {
        Self { runtime, tools, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Device name for a canonical ID and the container pinning it.
    pub fn device_name_for(&self, canonical_id: &str, container_id: &str) -> String {
        devmapper::device_name(canonical_id, container_id, self.config.device_suffix_len)
    }

    /// Expose the root filesystem of `resolved` read-only under the mount root.
    #[instrument(skip(self), fields(id = %resolved.canonical_id, kind = %resolved.kind))]
    pub async fn mount(&self, resolved: &ResolvedRef) -> Result<MountHandle> {
        let started = Instant::now();
        let mut acquired = Acquired::default();

        match self.mount_inner(resolved, &mut acquired).await {
            Ok(handle) => {
                info!(
                    device = %handle.device_name,
                    path = %handle.mount_path.display(),
                    state = %MountState::Mounted,
                    "Thin device mounted"
                );
                metrics::record_mount(started.elapsed().as_secs_f64());
                Ok(handle)
            }
            Err(e) => {
                warn!("Mount failed: {}", e);
                metrics::record_mount_failure();
                self.unwind(acquired).await;
                Err(e)
            }
        }
    }

    /// Mount `resolved`, tearing it straight back down if `cancel` fired
    /// while the mount was in flight.
    ///
    /// Returns `None` when the mount was cancelled and cleaned up.
    pub async fn mount_unless_cancelled(
        &self,
        resolved: &ResolvedRef,
        cancel: &CancelHandle,
    ) -> Result<Option<MountHandle>> {
        let handle = self.mount(resolved).await?;
        if !cancel.is_cancelled() {
            return Ok(Some(handle));
        }
        info!(device = %handle.device_name, "Cancelled during mount, tearing down");
        self.cleanup(&handle).await?;
        Ok(None)
    }

    async fn mount_inner(
        &self,
        resolved: &ResolvedRef,
        acquired: &mut Acquired,
    ) -> Result<MountHandle> {
        let container_id = match resolved.kind {
            ObjectKind::Image => {
                let id = self
                    .runtime
                    .create_container(&resolved.canonical_id, &self.config.ephemeral_command)
                    .await
                    .map_err(|e| {
                        ThinscanError::mount_with("Unable to create ephemeral container", e.to_string())
                    })?;
                debug!(container = %id, "Created ephemeral container");
                acquired.ephemeral_container = Some(id.clone());
                id
            }
            ObjectKind::Container => resolved.canonical_id.clone(),
        };

        let descriptor = devmapper::describe(
            self.runtime.as_ref(),
            &self.config.driver_metadata_dir,
            resolved,
        )
        .await
        .map_err(|e| ThinscanError::mount_with("Unable to read thin device metadata", e.to_string()))?;

        let device_name = self.device_name_for(&resolved.canonical_id, &container_id);
        if device_name.len() > devmapper::MAX_DEVICE_NAME_LEN {
            return Err(ThinscanError::mount_with(
                "device name too long",
                format!("{} exceeds {} bytes", device_name, devmapper::MAX_DEVICE_NAME_LEN),
            ));
        }
        let device_path = paths::mapper_path(&device_name);
        let mount_path = self.config.mount_root.join(&device_name);

        // The active-device table is shared with other processes; always ask.
        if self.tools.is_device_active(&device_name).await.map_err(as_mount_error)? {
            return Err(ThinscanError::mount_with(
                "device already active",
                format!("Device {} is already active", device_name),
            ));
        }

        let activate = self
            .tools
            .create_device(&device_name, &descriptor.table())
            .await
            .map_err(as_mount_error)?;
        if !activate.success {
            return Err(ThinscanError::mount_with(
                "Activating thin pool failed",
                activate.diagnostic(),
            ));
        }
        acquired.device = Some(device_name.clone());
        debug!(device = %device_name, state = %MountState::DeviceActivated, "Thin device activated");

        let settle = self.tools.udev_settle(Some(&device_path)).await.map_err(as_mount_error)?;
        if !settle.success {
            warn!(device = %device_name, "udev settle failed: {}", settle.diagnostic());
        }

        self.prepare_mount_dir(&mount_path, acquired).await?;

        let fstype = self.tools.filesystem_type(&device_path).await.map_err(as_mount_error)?;
        let options = mount_options(fstype.stdout.trim());

        let mount = self
            .tools
            .mount(&device_path, &mount_path, options)
            .await
            .map_err(as_mount_error)?;
        if !mount.success {
            if !self.config.unwind_on_mount_failure {
                // Leave device, directory and container in place for inspection.
                *acquired = Acquired::default();
            }
            return Err(ThinscanError::mount_with(
                "Unable to mount the thin-pool",
                mount.diagnostic(),
            ));
        }

        Ok(MountHandle {
            container_id,
            device_path,
            mount_path,
            device_name,
            kind: resolved.kind,
        })
    }

    async fn prepare_mount_dir(&self, mount_path: &Path, acquired: &mut Acquired) -> Result<()> {
        let exists = tokio::fs::try_exists(mount_path).await.unwrap_or(false);
        if exists {
            if self.config.override_mount_path {
                debug!(path = %mount_path.display(), "Reusing existing mount directory");
                return Ok(());
            }
            return Err(ThinscanError::mount_with(
                "mount path already exists",
                format!(
                    "The directory {} already exists. Choose a different mount point or enable override",
                    mount_path.display()
                ),
            ));
        }

        tokio::fs::create_dir_all(mount_path).await.map_err(|e| {
            ThinscanError::mount_with(
                "Unable to create mount directory",
                format!("{}: {}", mount_path.display(), e),
            )
        })?;
        acquired.directory = Some(mount_path.to_path_buf());
        Ok(())
    }

    /// Release whatever a failed mount had acquired, most recent first.
    async fn unwind(&self, acquired: Acquired) {
        if let Some(dir) = acquired.directory {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                warn!(path = %dir.display(), "Unwind: failed to remove mount directory: {}", e);
            }
        }

        if let Some(device) = acquired.device {
            match self.tools.remove_device(&device).await {
                Ok(out) if out.success => debug!(device = %device, "Unwind: removed thin device"),
                Ok(out) => error!(device = %device, "Unwind: failed to remove thin device: {}", out.diagnostic()),
                Err(e) => error!(device = %device, "Unwind: failed to remove thin device: {}", e),
            }
        }

        if let Some(container) = acquired.ephemeral_container {
            match self.runtime.remove_container(&container).await {
                Ok(()) => debug!(container = %container, "Unwind: removed ephemeral container"),
                Err(e) => error!(container = %container, "Unwind: failed to remove ephemeral container: {}", e),
            }
        }
    }

    /// Tear down a mount in order: unmount, remove device, remove
    /// directory, remove ephemeral container.
    ///
    /// With `stop_on_first_cleanup_failure` (the default) the first failing
    /// step ends the call and later resources stay in place. Otherwise all
    /// steps are attempted and the first failure is returned.
    #[instrument(skip(self, handle), fields(device = %handle.device_name))]
    pub async fn cleanup(&self, handle: &MountHandle) -> Result<()> {
        let started = Instant::now();
        let stop_early = self.config.stop_on_first_cleanup_failure;
        let mut first_error: Option<ThinscanError> = None;

        let steps = [
            CleanupStep::Unmount,
            CleanupStep::RemoveDevice,
            CleanupStep::RemoveDirectory,
            CleanupStep::RemoveContainer,
        ];

        for step in steps {
            let result = match step {
                CleanupStep::Unmount => self.unmount_with_retry(&handle.mount_path).await,
                CleanupStep::RemoveDevice => self.remove_device(&handle.device_name).await,
                CleanupStep::RemoveDirectory => remove_mount_dir(&handle.mount_path).await,
                CleanupStep::RemoveContainer => self.remove_ephemeral(handle).await,
            };

            if let Err(e) = result {
                error!(step = %step, "Cleanup step failed: {}", e);
                metrics::record_cleanup_failure(step);
                if stop_early {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            path = %handle.mount_path.display(),
            state = %MountState::Cleaned,
            "Removed temporary mount in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        metrics::record_cleanup(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn unmount_with_retry(&self, mount_path: &Path) -> Result<()> {
        let mounted = self.tools.mounted_device(mount_path).await.map_err(|e| {
            ThinscanError::cleanup(CleanupStep::Unmount, "unmount failed", e.to_string())
        })?;
        if mounted.is_none() {
            debug!(path = %mount_path.display(), "Not mounted, skipping unmount");
            return Ok(());
        }

        debug!(path = %mount_path.display(), state = %MountState::Unmounting, "Unmounting");
        let max = self.config.unmount_attempts;
        let mut last_diagnostic = String::new();

        for attempt in 1..=max {
            match self.tools.unmount(mount_path).await {
                Ok(out) if out.success => return Ok(()),
                Ok(out) => last_diagnostic = out.diagnostic(),
                Err(e) => last_diagnostic = e.to_string(),
            }

            debug!(
                "Unable to unmount {} on attempt {} of {} due to {}",
                mount_path.display(),
                attempt,
                max,
                last_diagnostic
            );
            metrics::record_unmount_retry();

            if attempt < max {
                tokio::time::sleep(self.config.unmount_retry_delay()).await;
            }
        }

        Err(ThinscanError::cleanup(CleanupStep::Unmount, "unmount failed", last_diagnostic))
    }

    async fn remove_device(&self, device_name: &str) -> Result<()> {
        let to_err = |diagnostic: String| {
            ThinscanError::cleanup(CleanupStep::RemoveDevice, "device removal failed", diagnostic)
        };

        if !self.tools.is_device_active(device_name).await.map_err(|e| to_err(e.to_string()))? {
            debug!(device = %device_name, "Device not active, skipping removal");
            return Ok(());
        }

        let out = self.tools.remove_device(device_name).await.map_err(|e| to_err(e.to_string()))?;
        if !out.success {
            return Err(to_err(out.diagnostic()));
        }
        debug!(device = %device_name, state = %MountState::DeviceRemoved, "Thin device removed");
        Ok(())
    }

    async fn remove_ephemeral(&self, handle: &MountHandle) -> Result<()> {
        if handle.kind != ObjectKind::Image {
            return Ok(());
        }

        let to_err = |diagnostic: String| {
            ThinscanError::cleanup(
                CleanupStep::RemoveContainer,
                "container removal failed",
                diagnostic,
            )
        };

        let exists = self
            .runtime
            .container_exists(&handle.container_id)
            .await
            .map_err(|e| to_err(e.to_string()))?;
        if !exists {
            debug!(container = %handle.container_id, "Ephemeral container already gone");
            return Ok(());
        }

        self.runtime.remove_container(&handle.container_id).await.map_err(|e| to_err(e.to_string()))
    }

    /// Tear down a mount knowing only its path.
    ///
    /// Rebuilds the [`MountHandle`] from the live mount table: the backing
    /// device name encodes the canonical ID and a container-ID prefix.
    #[instrument(skip(self, resolver))]
    pub async fn unmount_standalone(
        &self,
        resolver: &IdentifierResolver,
        mount_path: &Path,
    ) -> Result<()> {
        let handle = self.recover_handle(resolver, mount_path).await?;
        info!(device = %handle.device_name, "Recovered mount handle");
        self.cleanup(&handle).await
    }

    /// Rebuild the handle for a live mount from the mount table.
    pub async fn recover_handle(
        &self,
        resolver: &IdentifierResolver,
        mount_path: &Path,
    ) -> Result<MountHandle> {
        let not_found = || ThinscanError::NotFound { input: mount_path.display().to_string() };

        let device_path = self.tools.mounted_device(mount_path).await?.ok_or_else(not_found)?;
        let device_name = device_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(not_found)?;
        let (canonical_id, prefix) = devmapper::parse_device_name(&device_name).ok_or_else(|| {
            ThinscanError::mount_with(
                "not a thinscan device",
                format!("{} is backed by {}", mount_path.display(), device_name),
            )
        })?;

        let resolved = resolver.resolve(canonical_id).await?;
        let container_id = self
            .runtime
            .list_containers(true)
            .await?
            .into_iter()
            .map(|c| c.id)
            .find(|id| id.starts_with(prefix))
            .ok_or_else(|| ThinscanError::NotFound { input: prefix.to_string() })?;

        Ok(MountHandle {
            container_id,
            device_path,
            mount_path: mount_path.to_path_buf(),
            device_name,
            kind: resolved.kind,
        })
    }
}

/// Read-only mount options; XFS needs `nouuid` since thin snapshots share
/// superblock UUIDs.
pub fn mount_options(fstype: &str) -> &'static str {
    if fstype.eq_ignore_ascii_case("xfs") {
        "ro,nouuid"
    } else {
        "ro"
    }
}

async fn remove_mount_dir(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Mount directory already removed");
            Ok(())
        }
        Err(e) => Err(ThinscanError::cleanup(
            CleanupStep::RemoveDirectory,
            "directory removal failed",
            format!("{}: {}", path.display(), e),
        )),
    }
}

fn as_mount_error(e: ThinscanError) -> ThinscanError {
    match e {
        e @ ThinscanError::MountError { .. } => e,
        other => ThinscanError::mount_with("block tool invocation failed", other.to_string()),
    }
}
