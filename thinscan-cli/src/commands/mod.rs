//! CLI command implementations

pub mod mount;
pub mod resolve;
pub mod scan;

use std::sync::Arc;

use thinscan_core::{BlockTools, Config, ContainerRuntime, DockerCli, SystemBlockTools};

pub use mount::{mount, unmount};
pub use resolve::resolve;
pub use scan::scan;

/// Host collaborators built once from the loaded configuration.
pub struct Context {
    pub config: Arc<Config>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub tools: Arc<dyn BlockTools>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let timeout = config.command_timeout();
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCli::new(config.tools.docker.clone(), timeout));
        let tools: Arc<dyn BlockTools> = Arc::new(SystemBlockTools::new(config.tools.clone(), timeout));
        Self { config: Arc::new(config), runtime, tools }
    }
}

/// First 12 characters of an ID, without the algorithm prefix.
pub(crate) fn short_id(id: &str) -> String {
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    hex.chars().take(12).collect()
}
