//! Configuration management.
//!
//! A `Config` is built once by the caller and passed down explicitly to the
//! mount manager and the orchestrator; nothing in the crate reads ambient
//! global configuration.

use crate::devmapper::MAX_SUFFIX_LEN;
use crate::error::{Result, ThinscanError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names or paths of the external tools thinscan drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub dmsetup: String,
    pub udevadm: String,
    pub lsblk: String,
    pub mount: String,
    pub umount: String,
    pub findmnt: String,
    pub docker: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            dmsetup: "dmsetup".to_string(),
            udevadm: "udevadm".to_string(),
            lsblk: "lsblk".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
            findmnt: "findmnt".to_string(),
            docker: "docker".to_string(),
        }
    }
}

/// Runtime configuration for thinscan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory under which `thin-*` mount directories are created.
    pub mount_root: PathBuf,
    /// Reuse an existing mount directory instead of failing.
    pub override_mount_path: bool,
    /// Requested worker count; clamped to [2, 4] by the orchestrator.
    pub concurrency: Option<usize>,
    pub unmount_attempts: u32,
    pub unmount_retry_delay_ms: u64,
    /// Upper bound on any single external command.
    pub command_timeout_secs: u64,
    /// Abort the remaining teardown steps after the first failing one.
    pub stop_on_first_cleanup_failure: bool,
    /// Tear down the device and ephemeral container when `mount` itself fails.
    pub unwind_on_mount_failure: bool,
    /// Number of container-ID characters appended to device names.
    pub device_suffix_len: usize,
    pub driver_metadata_dir: PathBuf,
    /// Command given to ephemeral containers; they are never started.
    pub ephemeral_command: String,
    pub tools: ToolPaths,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(paths::DEFAULT_MOUNT_ROOT),
            override_mount_path: false,
            concurrency: None,
            unmount_attempts: 10,
            unmount_retry_delay_ms: 1000,
            command_timeout_secs: 120,
            stop_on_first_cleanup_failure: true,
            unwind_on_mount_failure: true,
            device_suffix_len: 6,
            driver_metadata_dir: PathBuf::from(paths::DEFAULT_DRIVER_METADATA_DIR),
            ephemeral_command: "/bin/true".to_string(),
            tools: ToolPaths::default(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults.
    pub fn load_default() -> Result<Self> {
        let path = paths::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ThinscanError::IoError { path: path.to_path_buf(), source: e })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ThinscanError::InvalidConfig {
                reason: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the mount lifecycle cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.unmount_attempts == 0 {
            return Err(ThinscanError::InvalidConfig {
                reason: "unmount_attempts must be at least 1".into(),
            });
        }
        if self.command_timeout_secs == 0 {
            return Err(ThinscanError::InvalidConfig {
                reason: "command_timeout_secs must be at least 1".into(),
            });
        }
        if self.device_suffix_len == 0 || self.device_suffix_len > MAX_SUFFIX_LEN {
            return Err(ThinscanError::InvalidConfig {
                reason: format!(
                    "device_suffix_len must be between 1 and {}, got {}",
                    MAX_SUFFIX_LEN, self.device_suffix_len
                ),
            });
        }
        if !self.mount_root.is_absolute() {
            return Err(ThinscanError::InvalidConfig {
                reason: format!("mount_root must be absolute: {}", self.mount_root.display()),
            });
        }
        Ok(())
    }

    pub fn unmount_retry_delay(&self) -> Duration {
        Duration::from_millis(self.unmount_retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
