//! Identifier resolution.
//!
//! Turns an operator-supplied container ID/name, image ID, image name or
//! `name:tag` into a canonical [`ResolvedRef`]. Precedence:
//! 1. container ID prefix or exact container name
//! 2. image repository name (with tag disambiguation)
//! 3. image ID prefix

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{Result, ThinscanError};
use crate::runtime::ContainerRuntime;
use crate::types::{split_repo_tag, ResolvedRef};

/// Resolves user input against the live container runtime.
#[derive(Clone)]
pub struct IdentifierResolver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl IdentifierResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Resolve `input` to a canonical image or container reference.
    ///
    /// # Errors
    /// - `AmbiguousIdentifier` if several distinct images share the name and
    ///   the input does not single one out
    /// - `NotFound` if nothing matches
    #[instrument(skip(self))]
    pub async fn resolve(&self, input: &str) -> Result<ResolvedRef> {
        if input.is_empty() {
            return Err(ThinscanError::NotFound { input: input.to_string() });
        }

        // Containers shadow images.
        let containers = self.runtime.list_containers(true).await?;
        if let Some(container) = containers.iter().find(|c| c.matches(input)) {
            debug!(id = %container.id, "Resolved to container");
            return Ok(ResolvedRef::container(container.id.clone()));
        }

        if let Some(id) = self.search_by_name(input).await? {
            debug!(id = %id, "Resolved to image by name");
            return Ok(ResolvedRef::image(id));
        }

        let images = self.runtime.list_images(true).await?;
        if let Some(image) = images.iter().find(|i| i.id_has_prefix(input)) {
            debug!(id = %image.id, "Resolved to image by ID prefix");
            return Ok(ResolvedRef::image(image.id.clone()));
        }

        Err(ThinscanError::NotFound { input: input.to_string() })
    }

    async fn search_by_name(&self, input: &str) -> Result<Option<String>> {
        let (name, tag) = split_repo_tag(input);
        let candidates = self.runtime.images_by_name(name).await?;

        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.id.clone())),
            _ => {
                if let Some(exact) = candidates.iter().find(|i| i.repo_tags.iter().any(|t| t == input)) {
                    return Ok(Some(exact.id.clone()));
                }

                if tag.is_some() {
                    return Err(ThinscanError::AmbiguousIdentifier {
                        input: input.to_string(),
                        reason: format!("no image named {} among same-named images", input),
                    });
                }

                // Several tags of one image object are not ambiguous.
                let first = &candidates[0].id;
                if candidates.iter().all(|i| &i.id == first) {
                    return Ok(Some(first.clone()));
                }

                Err(ThinscanError::AmbiguousIdentifier {
                    input: input.to_string(),
                    reason: format!(
                        "found multiple images named {} with different image IDs; try again with the image name and tag",
                        input
                    ),
                })
            }
        }
    }
}
