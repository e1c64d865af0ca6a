//! Container runtime access.
//!
//! thinscan only needs a narrow slice of the runtime: listing and inspecting
//! containers and images, reading graph-driver metadata, and creating or
//! removing the ephemeral containers that pin an image's thin device.
//! - [`DockerCli`] drives the `docker` binary
//! - tests substitute in-memory implementations

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContainerSummary, GraphDriver, ImageSummary, ObjectKind};

mod docker;

pub use docker::DockerCli;

/// Platform-agnostic container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers; `all = false` returns only running ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// List images; `all = false` omits intermediate layers.
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>>;

    /// Images with at least one tag in repository `name`.
    async fn images_by_name(&self, name: &str) -> Result<Vec<ImageSummary>> {
        let images = self.list_images(true).await?;
        Ok(images.into_iter().filter(|i| i.has_repository(name)).collect())
    }

    /// Graph-driver metadata for an image or container, if the runtime
    /// reports any.
    async fn graph_driver(&self, id: &str, kind: ObjectKind) -> Result<Option<GraphDriver>>;

    /// Name of the device-mapper thin pool backing the runtime's storage.
    async fn thin_pool_name(&self) -> Result<String>;

    /// Create (but do not start) a container from `image_id` running `command`.
    ///
    /// Returns the new container's ID.
    async fn create_container(&self, image_id: &str, command: &str) -> Result<String>;

    /// Remove a stopped container.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Whether the runtime still knows a container with this ID.
    async fn container_exists(&self, id: &str) -> Result<bool>;
}
