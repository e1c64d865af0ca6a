//! Device-mapper thin devices.
//!
//! This module provides:
//! - [`BlockTools`], the seam over the block-device and filesystem tools
//!   (`dmsetup`, `udevadm`, `lsblk`, `mount`, `umount`, `findmnt`)
//! - [`ThinDeviceDescriptor`] lookup from runtime graph-driver metadata,
//!   with the legacy JSON side-file fallback
//! - deterministic thin device naming and its inverse

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::command::CommandOutput;
use crate::error::{Result, ThinscanError};
use crate::runtime::ContainerRuntime;
use crate::types::{ObjectKind, ResolvedRef};

mod system;

pub use system::SystemBlockTools;

/// Sector size used by device-mapper tables.
pub const SECTOR_SIZE: u64 = 512;

/// Prefix of every device name thinscan creates.
pub const DEVICE_PREFIX: &str = "thin-";

/// Longest name device-mapper accepts (`DM_NAME_LEN` less the NUL).
pub const MAX_DEVICE_NAME_LEN: usize = 127;

/// `sha256:` followed by 64 hex digits.
const MAX_CANONICAL_ID_LEN: usize = 71;

/// Longest container-ID suffix that keeps every device name within
/// [`MAX_DEVICE_NAME_LEN`].
pub const MAX_SUFFIX_LEN: usize =
    MAX_DEVICE_NAME_LEN - DEVICE_PREFIX.len() - MAX_CANONICAL_ID_LEN - 1;

/// Block-device and filesystem tool interface.
///
/// Methods return the captured [`CommandOutput`]; a non-zero exit is a
/// normal `Ok` value and only spawn failures or timeouts are `Err`.
#[async_trait]
pub trait BlockTools: Send + Sync {
    /// `dmsetup info <name>`
    async fn device_info(&self, name: &str) -> Result<CommandOutput>;

    /// `dmsetup --noudevsync create <name> --table "<table>"`
    async fn create_device(&self, name: &str, table: &str) -> Result<CommandOutput>;

    /// `dmsetup --noudevsync remove <name>`
    async fn remove_device(&self, name: &str) -> Result<CommandOutput>;

    /// `udevadm settle [--exit-if-exists <path>]`
    async fn udev_settle(&self, wait_for: Option<&Path>) -> Result<CommandOutput>;

    /// `lsblk -o FSTYPE -n <device>`
    async fn filesystem_type(&self, device: &Path) -> Result<CommandOutput>;

    /// `mount -o <options> <device> <target>`
    async fn mount(&self, device: &Path, target: &Path, options: &str) -> Result<CommandOutput>;

    /// `umount <target>`
    async fn unmount(&self, target: &Path) -> Result<CommandOutput>;

    /// `findmnt -n -o SOURCE <target>`
    async fn mount_source(&self, target: &Path) -> Result<CommandOutput>;

    /// Whether the device-mapper table has `name` in state ACTIVE.
    ///
    /// Always queried live; the table is shared with other processes.
    async fn is_device_active(&self, name: &str) -> Result<bool> {
        let info = self.device_info(name).await?;
        Ok(info.success && reports_active(&info.stdout))
    }

    /// The device currently mounted at `target`, if any.
    async fn mounted_device(&self, target: &Path) -> Result<Option<PathBuf>> {
        let output = self.mount_source(target).await?;
        let source = output.stdout.trim();
        if !output.success || source.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(source)))
    }
}

/// Whether `dmsetup info` output contains a `State: ACTIVE` line.
pub fn reports_active(info: &str) -> bool {
    info.lines().any(|line| {
        line.split_once(':').is_some_and(|(key, value)| {
            key.trim() == "State" && value.trim().starts_with("ACTIVE")
        })
    })
}

/// Thin device coordinates for one image or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinDeviceDescriptor {
    pub pool_name: String,
    pub thin_device_id: u64,
    /// Declared device size in 512-byte sectors.
    pub size_sectors: u64,
    pub canonical_id: String,
    pub kind: ObjectKind,
}

impl ThinDeviceDescriptor {
    /// The device-mapper table line activating this thin device.
    pub fn table(&self) -> String {
        format!(
            "0 {} thin /dev/mapper/{} {}",
            self.size_sectors, self.pool_name, self.thin_device_id
        )
    }
}

/// Legacy devicemapper metadata side-file.
#[derive(Debug, Deserialize)]
struct DriverMetadata {
    size: u64,
    device_id: u64,
}

/// Look up the thin device backing `resolved`.
///
/// Uses runtime-reported graph-driver data when present, otherwise reads the
/// driver's metadata file `<metadata_dir>/<id>` (older runtimes).
#[instrument(skip(runtime, metadata_dir), fields(id = %resolved.canonical_id))]
pub async fn describe(
    runtime: &dyn ContainerRuntime,
    metadata_dir: &Path,
    resolved: &ResolvedRef,
) -> Result<ThinDeviceDescriptor> {
    let pool_name = runtime.thin_pool_name().await?;
    let id = &resolved.canonical_id;

    let driver = runtime.graph_driver(id, resolved.kind).await?;
    let (size_bytes, thin_device_id) = match driver {
        Some(driver) if driver.data.contains_key("DeviceId") => {
            debug!(driver = %driver.name, "Using runtime graph-driver metadata");
            let device_id = parse_number(id, "DeviceId", driver.data.get("DeviceId"))?;
            let size = parse_number(id, "DeviceSize", driver.data.get("DeviceSize"))?;
            (size, device_id)
        }
        _ => {
            debug!("No graph-driver device data, reading driver metadata file");
            read_driver_metadata(metadata_dir, id).await?
        }
    };

    Ok(ThinDeviceDescriptor {
        pool_name,
        thin_device_id,
        size_sectors: size_bytes / SECTOR_SIZE,
        canonical_id: id.clone(),
        kind: resolved.kind,
    })
}

fn parse_number(id: &str, field: &str, value: Option<&String>) -> Result<u64> {
    let value = value.ok_or_else(|| ThinscanError::Metadata {
        id: id.to_string(),
        reason: format!("graph driver data has no {}", field),
    })?;
    value.trim().parse().map_err(|e| ThinscanError::Metadata {
        id: id.to_string(),
        reason: format!("{} is not a number ({}): {}", field, value, e),
    })
}

async fn read_driver_metadata(metadata_dir: &Path, id: &str) -> Result<(u64, u64)> {
    let file_name = id.strip_prefix("sha256:").unwrap_or(id);
    let path = metadata_dir.join(file_name);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| ThinscanError::IoError { path: path.clone(), source: e })?;
    let meta: DriverMetadata = serde_json::from_str(&content).map_err(|e| {
        ThinscanError::Metadata { id: id.to_string(), reason: format!("{}: {}", path.display(), e) }
    })?;
    Ok((meta.size, meta.device_id))
}

/// Deterministic device name: `thin-<canonical_id>-<container_id prefix>`.
pub fn device_name(canonical_id: &str, container_id: &str, suffix_len: usize) -> String {
    let suffix: String = container_id.chars().take(suffix_len).collect();
    format!("{}{}-{}", DEVICE_PREFIX, canonical_id, suffix)
}

/// Split a device name back into canonical ID and container-ID prefix.
pub fn parse_device_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(DEVICE_PREFIX)?;
    let (canonical_id, prefix) = rest.rsplit_once('-')?;
    if canonical_id.is_empty() || prefix.is_empty() {
        return None;
    }
    Some((canonical_id, prefix))
}
