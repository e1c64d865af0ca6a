//! Image domain types.

use serde::{Deserialize, Serialize};

/// An image as listed by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    /// Image ID (as reported, possibly `sha256:`-prefixed)
    pub id: String,

    /// Repository tags, e.g. `["nginx:latest", "nginx:1.25"]`
    pub repo_tags: Vec<String>,

    /// Virtual size in bytes
    pub virtual_size: u64,
}

impl ImageSummary {
    /// Whether any of this image's tags belongs to repository `name`.
    pub fn has_repository(&self, name: &str) -> bool {
        self.repo_tags.iter().any(|t| split_repo_tag(t).0 == name)
    }

    /// Whether `prefix` is a prefix of this image's ID, with or without
    /// the `sha256:` algorithm prefix.
    pub fn id_has_prefix(&self, prefix: &str) -> bool {
        !prefix.is_empty()
            && (self.id.starts_with(prefix)
                || self.id.strip_prefix("sha256:").is_some_and(|hex| hex.starts_with(prefix)))
    }
}

/// Split an image reference into repository name and optional tag.
///
/// The tag separator is the last `:` not followed by a `/`, so registry
/// ports (`registry:5000/app`) stay part of the name.
pub fn split_repo_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') && !name.is_empty() => (name, Some(tag)),
        _ => (reference, None),
    }
}
