//! Centralized path defaults for thinscan.
//!
//! All default filesystem locations go through this module so the CLI and
//! library callers agree on them.

use std::path::PathBuf;

/// Default root under which thin devices are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Directory holding device-mapper mappings.
pub const DEV_MAPPER_DIR: &str = "/dev/mapper";

/// Legacy devicemapper graph-driver metadata directory, keyed by image ID.
pub const DEFAULT_DRIVER_METADATA_DIR: &str = "/var/lib/docker/devicemapper/metadata";

/// Get the configuration file path.
///
/// Resolution order:
/// 1. `THINSCAN_CONFIG` environment variable
/// 2. `/etc/thinscan/config.json` if it exists (system install)
/// 3. `<user config dir>/thinscan/config.json`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("THINSCAN_CONFIG") {
        return PathBuf::from(path);
    }

    let system_path = PathBuf::from("/etc/thinscan/config.json");
    if system_path.exists() {
        return system_path;
    }

    dirs::config_dir().map(|d| d.join("thinscan").join("config.json")).unwrap_or(system_path)
}

/// Device-mapper node path for a device name.
pub fn mapper_path(device_name: &str) -> PathBuf {
    PathBuf::from(DEV_MAPPER_DIR).join(device_name)
}
