//! Container domain types.

use serde::{Deserialize, Serialize};

/// A container as listed and inspected by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Full container ID
    pub id: String,

    /// Assigned names, without the leading `/`
    pub names: Vec<String>,

    /// ID of the image the container was created from
    pub image_id: String,

    pub running: bool,

    /// Runtime reports the container as dead (failed removal, crashed)
    pub dead: bool,
}

impl ContainerSummary {
    /// Whether `input` is a prefix of this container's ID or exactly one of
    /// its names.
    pub fn matches(&self, input: &str) -> bool {
        if input.is_empty() {
            return false;
        }
        let name = input.strip_prefix('/').unwrap_or(input);
        self.id.starts_with(input) || self.names.iter().any(|n| n == name)
    }
}
