//! Block tools backed by the host's dmsetup/udevadm/util-linux binaries.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::BlockTools;
use crate::command::{self, CommandOutput};
use crate::config::ToolPaths;
use crate::error::Result;

/// [`BlockTools`] implementation invoking the real host tools.
#[derive(Debug, Clone)]
pub struct SystemBlockTools {
    tools: ToolPaths,
    timeout: Duration,
}

impl SystemBlockTools {
    pub fn new(tools: ToolPaths, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    async fn exec<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Result<CommandOutput> {
        command::run(program, args, self.timeout).await
    }
}

#[async_trait]
impl BlockTools for SystemBlockTools {
    async fn device_info(&self, name: &str) -> Result<CommandOutput> {
        self.exec(&self.tools.dmsetup, &["info", name]).await
    }

    async fn create_device(&self, name: &str, table: &str) -> Result<CommandOutput> {
        self.exec(&self.tools.dmsetup, &["--noudevsync", "create", name, "--table", table]).await
    }

    async fn remove_device(&self, name: &str) -> Result<CommandOutput> {
        self.exec(&self.tools.dmsetup, &["--noudevsync", "remove", name]).await
    }

    async fn udev_settle(&self, wait_for: Option<&Path>) -> Result<CommandOutput> {
        let mut args = vec![OsStr::new("settle")];
        if let Some(path) = wait_for {
            args.push(OsStr::new("--exit-if-exists"));
            args.push(path.as_os_str());
        }
        self.exec(&self.tools.udevadm, &args[..]).await
    }

    async fn filesystem_type(&self, device: &Path) -> Result<CommandOutput> {
        let args = [OsStr::new("-o"), OsStr::new("FSTYPE"), OsStr::new("-n"), device.as_os_str()];
        self.exec(&self.tools.lsblk, &args).await
    }

    async fn mount(&self, device: &Path, target: &Path, options: &str) -> Result<CommandOutput> {
        let args = [OsStr::new("-o"), OsStr::new(options), device.as_os_str(), target.as_os_str()];
        self.exec(&self.tools.mount, &args).await
    }

    async fn unmount(&self, target: &Path) -> Result<CommandOutput> {
        self.exec(&self.tools.umount, &[target.as_os_str()]).await
    }

    async fn mount_source(&self, target: &Path) -> Result<CommandOutput> {
        let args = [OsStr::new("-n"), OsStr::new("-o"), OsStr::new("SOURCE"), target.as_os_str()];
        self.exec(&self.tools.findmnt, &args).await
    }
}
