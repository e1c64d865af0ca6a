//! Core domain types for thinscan.

pub mod container;
pub mod image;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// Re-exports
pub use container::ContainerSummary;
pub use image::{split_repo_tag, ImageSummary};

/// Whether a runtime object is an image or a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Image,
    Container,
}

impl ObjectKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Image => "image",
            ObjectKind::Container => "container",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-supplied identifier resolved to a canonical runtime object.
///
/// `canonical_id` is usable directly against the runtime's inspection API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedRef {
    pub canonical_id: String,
    pub kind: ObjectKind,
}

impl ResolvedRef {
    pub fn image(id: impl Into<String>) -> Self {
        Self { canonical_id: id.into(), kind: ObjectKind::Image }
    }

    pub fn container(id: impl Into<String>) -> Self {
        Self { canonical_id: id.into(), kind: ObjectKind::Container }
    }
}

impl fmt::Display for ResolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.canonical_id)
    }
}

/// Storage graph-driver metadata reported by the runtime.
///
/// For the devicemapper driver `data` carries `DeviceId`, `DeviceSize`
/// (bytes) and `DeviceName`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDriver {
    pub name: String,
    pub data: HashMap<String, String>,
}
