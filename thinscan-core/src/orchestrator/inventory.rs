//! Snapshot of the host's containers and images, used for target
//! selection and for relating containers to the image they run.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ThinscanError};
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerSummary, ImageSummary};

/// Which objects a run should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelection {
    /// Identifiers given by the operator.
    Explicit(Vec<String>),
    /// Running containers.
    OnlyActive,
    AllContainers,
    /// Top-level images with content.
    Images,
    /// Every image with content, intermediate layers included.
    AllImages,
}

/// Containers and images as seen once at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct HostInventory {
    containers: Vec<ContainerSummary>,
    images: Vec<ImageSummary>,
    all_images: Vec<ImageSummary>,
}

impl HostInventory {
    pub async fn collect(runtime: &dyn ContainerRuntime) -> Result<Self> {
        let containers = runtime.list_containers(true).await?;
        let images = runtime.list_images(false).await?;
        let all_images = runtime.list_images(true).await?;
        let inventory = Self::from_parts(containers, images, all_images);
        debug!(
            containers = inventory.containers.len(),
            dead = ?inventory.dead_containers(),
            images = inventory.images.len(),
            all_images = inventory.all_images.len(),
            "Collected host inventory"
        );
        Ok(inventory)
    }

    pub fn from_parts(
        containers: Vec<ContainerSummary>,
        images: Vec<ImageSummary>,
        all_images: Vec<ImageSummary>,
    ) -> Self {
        Self { containers, images, all_images }
    }

    /// IDs of containers the runtime reports as dead.
    fn dead_containers(&self) -> Vec<&str> {
        self.containers.iter().filter(|c| c.dead).map(|c| c.id.as_str()).collect()
    }

    pub fn is_dead(&self, id: &str) -> bool {
        self.containers.iter().any(|c| c.dead && c.id == id)
    }

    /// Containers related to `id`.
    ///
    /// For an image, every container created from it. For a container,
    /// every container sharing its image, itself included.
    pub fn containers_for(&self, id: &str) -> Vec<String> {
        let image_id = self
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.image_id.as_str())
            .unwrap_or(id);

        self.containers.iter().filter(|c| c.image_id == image_id).map(|c| c.id.clone()).collect()
    }

    /// Expand a selection into target identifiers.
    pub fn select(&self, selection: &TargetSelection) -> Result<Vec<String>> {
        let (targets, empty_message): (Vec<String>, &str) = match selection {
            TargetSelection::Explicit(list) => (list.clone(), "No targets were given"),
            TargetSelection::OnlyActive => (
                self.containers.iter().filter(|c| c.running).map(|c| c.id.clone()).collect(),
                "There are no active containers on this system",
            ),
            TargetSelection::AllContainers => (
                self.containers.iter().map(|c| c.id.clone()).collect(),
                "There are no containers on this system",
            ),
            TargetSelection::Images => {
                (with_content(&self.images), "There are no images on this system")
            }
            TargetSelection::AllImages => {
                (with_content(&self.all_images), "There are no images on this system")
            }
        };

        if targets.is_empty() {
            return Err(ThinscanError::NoTargets { message: empty_message.to_string() });
        }
        Ok(targets)
    }
}

fn with_content(images: &[ImageSummary]) -> Vec<String> {
    images.iter().filter(|i| i.virtual_size > 0).map(|i| i.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, image: &str, running: bool, dead: bool) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            names: vec![format!("name-{}", id)],
            image_id: image.to_string(),
            running,
            dead,
        }
    }

    fn image(id: &str, size: u64) -> ImageSummary {
        ImageSummary { id: id.to_string(), repo_tags: Vec::new(), virtual_size: size }
    }

    fn inventory() -> HostInventory {
        HostInventory::from_parts(
            vec![
                container("c1", "sha256:aaa", true, false),
                container("c2", "sha256:aaa", false, false),
                container("c3", "sha256:bbb", false, true),
            ],
            vec![image("sha256:aaa", 100), image("sha256:bbb", 0)],
            vec![image("sha256:aaa", 100), image("sha256:bbb", 0), image("sha256:ccc", 5)],
        )
    }

    #[test]
    fn test_dead_containers() {
        let inv = inventory();
        assert_eq!(inv.dead_containers(), vec!["c3"]);
        assert!(inv.is_dead("c3"));
        assert!(!inv.is_dead("c1"));
    }

    #[test]
    fn test_containers_for_image_and_container() {
        let inv = inventory();
        assert_eq!(inv.containers_for("sha256:aaa"), vec!["c1", "c2"]);
        assert_eq!(inv.containers_for("c2"), vec!["c1", "c2"]);
        assert!(inv.containers_for("sha256:zzz").is_empty());
    }

    #[test]
    fn test_selection_modes() {
        let inv = inventory();
        assert_eq!(inv.select(&TargetSelection::OnlyActive).unwrap(), vec!["c1"]);
        assert_eq!(inv.select(&TargetSelection::AllContainers).unwrap().len(), 3);
        assert_eq!(inv.select(&TargetSelection::Images).unwrap(), vec!["sha256:aaa"]);
        assert_eq!(
            inv.select(&TargetSelection::AllImages).unwrap(),
            vec!["sha256:aaa", "sha256:ccc"]
        );
    }

    #[test]
    fn test_empty_selection_is_no_targets() {
        let inv = HostInventory::default();
        match inv.select(&TargetSelection::OnlyActive) {
            Err(ThinscanError::NoTargets { message }) => {
                assert_eq!(message, "There are no active containers on this system")
            }
            other => panic!("expected NoTargets, got {:?}", other),
        }
        assert!(inv.select(&TargetSelection::Explicit(Vec::new())).is_err());
        assert!(inv.select(&TargetSelection::Images).is_err());
    }
}
