//! Docker runtime access through the `docker` CLI.
//!
//! Listings use `-q --no-trunc` to get full IDs and are then expanded with
//! `inspect`, whose JSON carries everything the resolver and the mount
//! manager need (names, tags, state, graph-driver data).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::command::{self, CommandOutput};
use crate::error::{Result, ThinscanError};
use crate::types::{ContainerSummary, GraphDriver, ImageSummary, ObjectKind};

use super::ContainerRuntime;

/// Container runtime backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Path to the docker binary.
    binary: String,
    /// Bound on every docker invocation.
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }

    async fn exec(&self, args: &[&str]) -> Result<CommandOutput> {
        command::run(&self.binary, args, self.timeout).await
    }

    /// Execute a docker command and fail on non-zero exit.
    async fn exec_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.exec(args).await?;
        if !output.success {
            return Err(failure(args, &output));
        }
        Ok(output.stdout)
    }

    async fn list_ids(&self, args: &[&str]) -> Result<Vec<String>> {
        let stdout = self.exec_checked(args).await?;
        Ok(unique_lines(&stdout))
    }

    async fn inspect(&self, object: &str, ids: &[String]) -> Result<String> {
        let mut args = vec![object, "inspect"];
        args.extend(ids.iter().map(String::as_str));
        self.exec_checked(&args).await
    }

    /// Inspect objects taken from a listing.
    ///
    /// Objects removed after the listing ran are dropped rather than
    /// failing the whole inspect; docker still prints the survivors.
    async fn inspect_listed(&self, object: &str, ids: &[String]) -> Result<String> {
        let mut args = vec![object, "inspect"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.exec(&args).await?;
        if output.success {
            return Ok(output.stdout);
        }

        if !only_missing_objects(&output.stderr) {
            return Err(failure(&args, &output));
        }
        debug!(object, missing = %output.stderr.trim(), "Skipping objects removed since listing");
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok("[]".to_string());
        }
        Ok(stdout.to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    #[instrument(skip(self))]
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "-q", "--no-trunc"];
        if all {
            args.push("-a");
        }
        let ids = self.list_ids(&args).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let json = self.inspect_listed("container", &ids).await?;
        let containers = parse_container_inspect(&json)?;
        debug!("Found {} containers", containers.len());
        Ok(containers.into_iter().map(ContainerInspect::into_summary).collect())
    }

    #[instrument(skip(self))]
    async fn list_images(&self, all: bool) -> Result<Vec<ImageSummary>> {
        let mut args = vec!["images", "-q", "--no-trunc"];
        if all {
            args.push("-a");
        }
        let ids = self.list_ids(&args).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let json = self.inspect_listed("image", &ids).await?;
        let images = parse_image_inspect(&json)?;
        debug!("Found {} images", images.len());
        Ok(images.into_iter().map(ImageInspect::into_summary).collect())
    }

    #[instrument(skip(self))]
    async fn graph_driver(&self, id: &str, kind: ObjectKind) -> Result<Option<GraphDriver>> {
        let ids = [id.to_string()];
        match kind {
            ObjectKind::Image => {
                let json = self.inspect("image", &ids).await?;
                let image = parse_image_inspect(&json)?.into_iter().next();
                Ok(image.and_then(|i| i.graph_driver).map(InspectGraphDriver::into_driver))
            }
            ObjectKind::Container => {
                let json = self.inspect("container", &ids).await?;
                let container = parse_container_inspect(&json)?.into_iter().next();
                Ok(container.and_then(|c| c.graph_driver).map(InspectGraphDriver::into_driver))
            }
        }
    }

    async fn thin_pool_name(&self) -> Result<String> {
        let driver = self.exec_checked(&["info", "--format", "{{.Driver}}"]).await?;
        let driver = driver.trim();
        if driver != "devicemapper" {
            return Err(ThinscanError::runtime(format!(
                "Storage driver is {}, thin devices need devicemapper",
                driver
            )));
        }
        let stdout = self.exec_checked(&["info", "--format", "{{json .DriverStatus}}"]).await?;
        parse_pool_name(&stdout)
    }

    #[instrument(skip(self))]
    async fn create_container(&self, image_id: &str, command: &str) -> Result<String> {
        let stdout = self.exec_checked(&["create", image_id, command]).await?;
        let id = stdout.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(ThinscanError::runtime(format!(
                "docker create returned no container ID for {}",
                image_id
            )));
        }
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, id: &str) -> Result<()> {
        self.exec_checked(&["rm", id]).await.map(|_| ())
    }

    async fn container_exists(&self, id: &str) -> Result<bool> {
        let output = self.exec(&["container", "inspect", "--format", "{{.Id}}", id]).await?;
        Ok(output.success)
    }
}

/// Number of arguments shown in failure messages before eliding the rest.
const SHOWN_ARGS: usize = 4;

fn failure(args: &[&str], output: &CommandOutput) -> ThinscanError {
    let mut rendered = args.iter().take(SHOWN_ARGS).copied().collect::<Vec<_>>().join(" ");
    if args.len() > SHOWN_ARGS {
        rendered.push_str(&format!(" (+{} more)", args.len() - SHOWN_ARGS));
    }
    ThinscanError::runtime(format!("docker {} failed: {}", rendered, output.diagnostic()))
}

/// Whether every stderr line reports an object that no longer exists.
fn only_missing_objects(stderr: &str) -> bool {
    let mut lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    lines.peek().is_some() && lines.all(|l| l.contains("No such"))
}

fn unique_lines(stdout: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !seen.iter().any(|s: &String| s == line) {
            seen.push(line.to_string());
        }
    }
    seen
}

fn parse_container_inspect(json: &str) -> Result<Vec<ContainerInspect>> {
    serde_json::from_str(json).map_err(|e| {
        ThinscanError::runtime(format!("Failed to parse container inspect output: {}", e))
    })
}

fn parse_image_inspect(json: &str) -> Result<Vec<ImageInspect>> {
    serde_json::from_str(json)
        .map_err(|e| ThinscanError::runtime(format!("Failed to parse image inspect output: {}", e)))
}

/// Pick the thin pool from `docker info` driver status pairs.
fn parse_pool_name(json: &str) -> Result<String> {
    let status: Option<Vec<(String, String)>> = serde_json::from_str(json.trim())
        .map_err(|e| ThinscanError::runtime(format!("Failed to parse driver status: {}", e)))?;

    status
        .unwrap_or_default()
        .into_iter()
        .find(|(key, _)| key == "Pool Name")
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ThinscanError::runtime("Storage driver reports no thin pool (is it devicemapper?)")
        })
}

// docker inspect JSON structures

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: InspectState,
    graph_driver: Option<InspectGraphDriver>,
}

impl ContainerInspect {
    fn into_summary(self) -> ContainerSummary {
        let name = self.name.trim_start_matches('/').to_string();
        ContainerSummary {
            id: self.id,
            names: if name.is_empty() { Vec::new() } else { vec![name] },
            image_id: self.image,
            running: self.state.running,
            dead: self.state.dead.unwrap_or(false),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    dead: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageInspect {
    id: String,
    repo_tags: Option<Vec<String>>,
    virtual_size: Option<u64>,
    size: Option<u64>,
    graph_driver: Option<InspectGraphDriver>,
}

impl ImageInspect {
    fn into_summary(self) -> ImageSummary {
        ImageSummary {
            id: self.id,
            repo_tags: self
                .repo_tags
                .unwrap_or_default()
                .into_iter()
                .filter(|t| t != "<none>:<none>")
                .collect(),
            virtual_size: self.virtual_size.or(self.size).unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectGraphDriver {
    name: String,
    data: Option<HashMap<String, serde_json::Value>>,
}

impl InspectGraphDriver {
    fn into_driver(self) -> GraphDriver {
        let data = self
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
        GraphDriver { name: self.name, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_inspect() {
        let json = r#"[{
            "Id": "4f2a9c0d11e2aa",
            "Name": "/web",
            "Image": "sha256:1111",
            "State": {"Running": false, "Dead": true},
            "GraphDriver": {"Name": "devicemapper", "Data": {"DeviceId": "25", "DeviceSize": "10737418240"}}
        }]"#;

        let containers = parse_container_inspect(json).unwrap();
        assert_eq!(containers.len(), 1);
        let driver = containers[0].graph_driver.as_ref().map(|g| g.name.clone());
        assert_eq!(driver.as_deref(), Some("devicemapper"));

        let summary = parse_container_inspect(json).unwrap().remove(0).into_summary();
        assert_eq!(summary.names, vec!["web".to_string()]);
        assert!(summary.dead);
        assert!(!summary.running);
    }

    #[test]
    fn test_parse_container_without_dead_field() {
        let json = r#"[{"Id": "abc", "Name": "/x", "Image": "img", "State": {"Running": true}}]"#;
        let summary = parse_container_inspect(json).unwrap().remove(0).into_summary();
        assert!(summary.running);
        assert!(!summary.dead);
    }

    #[test]
    fn test_parse_image_inspect_graph_driver_numbers() {
        let json = r#"[{
            "Id": "sha256:abcdef",
            "RepoTags": ["rhel7:latest", "<none>:<none>"],
            "Size": 2048,
            "GraphDriver": {"Name": "devicemapper", "Data": {"DeviceId": 7, "DeviceSize": 10737418240}}
        }]"#;

        let mut images = parse_image_inspect(json).unwrap();
        let driver = images[0].graph_driver.take().unwrap().into_driver();
        assert_eq!(driver.data.get("DeviceId").map(String::as_str), Some("7"));
        assert_eq!(driver.data.get("DeviceSize").map(String::as_str), Some("10737418240"));

        let summary = images.remove(0).into_summary();
        assert_eq!(summary.repo_tags, vec!["rhel7:latest".to_string()]);
        assert_eq!(summary.virtual_size, 2048);
    }

    #[test]
    fn test_parse_pool_name() {
        let json = r#"[["Pool Name","docker-253:0-1234-pool"],["Pool Blocksize","65.54 kB"]]"#;
        assert_eq!(parse_pool_name(json).unwrap(), "docker-253:0-1234-pool");

        let json = r#"[["Root Dir","/var/lib/docker/overlay2"]]"#;
        assert!(parse_pool_name(json).is_err());

        assert!(parse_pool_name("null").is_err());
    }

    const FAKE_DOCKER: &str = r#"#!/bin/sh
case "$1 $2" in
  "ps -q")
    echo aaaa1111
    echo gone2222
    ;;
  "container inspect")
    if [ "$3" = "--format" ]; then exit 1; fi
    echo '[{"Id": "aaaa1111", "Name": "/web", "Image": "sha256:1111", "State": {"Running": true}}]'
    echo "Error: No such container: gone2222" >&2
    exit 1
    ;;
  "images -q")
    echo sha256:1111
    ;;
  "image inspect")
    echo '[{"Id": "sha256:1111", "RepoTags": ["nginx:latest"], "Size": 4096}]'
    ;;
  "info --format")
    case "$3" in
      "{{.Driver}}") echo overlay2 ;;
      *) echo '[["Root Dir","/var/lib/docker/overlay2"]]' ;;
    esac
    ;;
  "rm gone2222")
    echo "Error: No such container: gone2222" >&2
    exit 1
    ;;
  *)
    echo "unexpected: $*" >&2
    exit 2
    ;;
esac
"#;

    fn fake_docker(dir: &std::path::Path) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(&path, FAKE_DOCKER).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(path.to_string_lossy(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_list_containers_skips_container_removed_after_listing() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(dir.path());

        let containers = docker.list_containers(true).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].id, "aaaa1111");
        assert_eq!(containers[0].names, vec!["web".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_unaffected_by_vanished_container() {
        use std::sync::Arc;

        use crate::resolver::IdentifierResolver;

        let dir = tempfile::tempdir().unwrap();
        let resolver = IdentifierResolver::new(Arc::new(fake_docker(dir.path())));

        let resolved = resolver.resolve("nginx").await.unwrap();
        assert_eq!(resolved.kind, ObjectKind::Image);
        assert_eq!(resolved.canonical_id, "sha256:1111");
    }

    #[tokio::test]
    async fn test_thin_pool_requires_devicemapper_driver() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(dir.path());

        let err = docker.thin_pool_name().await.unwrap_err();
        assert!(err.to_string().contains("overlay2"), "{}", err);
    }

    #[tokio::test]
    async fn test_failure_names_subcommand() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(dir.path());

        let err = docker.remove_container("gone2222").await.unwrap_err();
        assert!(err.to_string().contains("docker rm gone2222 failed"), "{}", err);
    }

    #[test]
    fn test_failure_elides_long_argument_lists() {
        let args = ["container", "inspect", "a", "b", "c", "d"];
        let err = failure(&args, &CommandOutput::failed("boom"));
        assert!(err.to_string().contains("docker container inspect a b (+2 more) failed: boom"), "{}", err);
    }

    #[test]
    fn test_only_missing_objects() {
        assert!(only_missing_objects("Error: No such container: gone2222\n"));
        assert!(!only_missing_objects("Error: No such image: x\npermission denied\n"));
        assert!(!only_missing_objects(""));
    }

    #[test]
    fn test_unique_lines() {
        assert_eq!(unique_lines("a\nb\na\n\n"), vec!["a".to_string(), "b".to_string()]);
    }
}
