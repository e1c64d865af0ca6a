//! In-memory container runtime and block tools shared by the integration
//! tests. Neither touches docker or device-mapper; mount directories are
//! real directories under a temp mount root.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thinscan_core::command::CommandOutput;
use thinscan_core::error::{Result, ThinscanError};
use thinscan_core::scan::{ScanJob, ScanOutcome, Scanner};
use thinscan_core::types::{ContainerSummary, GraphDriver, ImageSummary, ObjectKind};
use thinscan_core::{BlockTools, Config, ContainerRuntime};

pub const POOL: &str = "docker-253:0-1234-pool";
/// 10 GiB
pub const DEVICE_SIZE: u64 = 10_737_418_240;

pub fn test_config(mount_root: &Path) -> Config {
    Config {
        mount_root: mount_root.to_path_buf(),
        unmount_attempts: 3,
        unmount_retry_delay_ms: 1,
        command_timeout_secs: 5,
        driver_metadata_dir: mount_root.join("metadata"),
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RuntimeState {
    containers: Vec<ContainerSummary>,
    images: Vec<ImageSummary>,
    /// IDs whose graph-driver data is withheld (forces the metadata file).
    no_graph_data: HashSet<String>,
    device_ids: HashMap<String, u64>,
    created: Vec<String>,
    removed: Vec<String>,
    next_id: usize,
    fail_create: bool,
}

/// Container runtime backed by in-memory lists.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<RuntimeState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, id: &str, tags: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let device_id = state.device_ids.len() as u64 + 1;
            state.device_ids.insert(id.to_string(), device_id);
            state.images.push(ImageSummary {
                id: id.to_string(),
                repo_tags: tags.iter().map(|t| t.to_string()).collect(),
                virtual_size: 1024,
            });
        }
        self
    }

    pub fn with_container(self, id: &str, name: &str, image: &str, running: bool) -> Self {
        self.push_container(id, name, image, running, false);
        self
    }

    pub fn with_dead_container(self, id: &str, name: &str, image: &str) -> Self {
        self.push_container(id, name, image, false, true);
        self
    }

    pub fn without_graph_data(self, id: &str) -> Self {
        self.state.lock().unwrap().no_graph_data.insert(id.to_string());
        self
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    fn push_container(&self, id: &str, name: &str, image: &str, running: bool, dead: bool) {
        let mut state = self.state.lock().unwrap();
        let device_id = state.device_ids.len() as u64 + 1;
        state.device_ids.insert(id.to_string(), device_id);
        state.containers.push(ContainerSummary {
            id: id.to_string(),
            names: vec![name.to_string()],
            image_id: image.to_string(),
            running,
            dead,
        });
    }

    pub fn device_id(&self, id: &str) -> u64 {
        self.state.lock().unwrap().device_ids.get(id).copied().unwrap_or_default()
    }

    /// Ephemeral containers created so far.
    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.state.lock().unwrap().containers.iter().any(|c| c.id == id)
    }

    /// Created but not yet removed.
    pub fn leaked_containers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.created.iter().filter(|id| !state.removed.contains(id)).cloned().collect()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.iter().filter(|c| all || c.running).cloned().collect())
    }

    async fn list_images(&self, _all: bool) -> Result<Vec<ImageSummary>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn graph_driver(&self, id: &str, _kind: ObjectKind) -> Result<Option<GraphDriver>> {
        let state = self.state.lock().unwrap();
        if state.no_graph_data.contains(id) {
            return Ok(Some(GraphDriver { name: "devicemapper".into(), data: HashMap::new() }));
        }
        let Some(device_id) = state.device_ids.get(id) else {
            return Ok(None);
        };
        let data = HashMap::from([
            ("DeviceId".to_string(), device_id.to_string()),
            ("DeviceSize".to_string(), DEVICE_SIZE.to_string()),
        ]);
        Ok(Some(GraphDriver { name: "devicemapper".into(), data }))
    }

    async fn thin_pool_name(&self) -> Result<String> {
        Ok(POOL.to_string())
    }

    async fn create_container(&self, image_id: &str, _command: &str) -> Result<String> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.fail_create {
            return Err(ThinscanError::runtime("docker create failed: no space left on device"));
        }
        state.next_id += 1;
        let id = format!("e{:05}{}", state.next_id, "f".repeat(58));
        state.containers.push(ContainerSummary {
            id: id.clone(),
            names: vec![format!("ephemeral_{}", state.next_id)],
            image_id: image_id.to_string(),
            running: false,
            dead: false,
        });
        state.created.push(id.clone());
        Ok(id)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(ThinscanError::runtime(format!("No such container: {}", id)));
        }
        state.removed.push(id.to_string());
        Ok(())
    }

    async fn container_exists(&self, id: &str) -> Result<bool> {
        Ok(self.has_container(id))
    }
}

// ---------------------------------------------------------------------------
// Block tools
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BlockState {
    active: HashSet<String>,
    /// mount path -> device path
    mounts: HashMap<PathBuf, PathBuf>,
    tables: Vec<(String, String)>,
    mount_options: Vec<String>,
    fstype: String,
    fail_create: bool,
    fail_mount: bool,
    fail_remove: bool,
    timeout_create: bool,
    timeout_remove: bool,
    umount_failures_left: u32,
    umount_timeouts_left: u32,
    create_calls: usize,
    umount_calls: usize,
    peak_mounts: usize,
}

/// Device-mapper and mount table simulation with fault injection.
#[derive(Default)]
pub struct MockBlockTools {
    state: Mutex<BlockState>,
}

impl MockBlockTools {
    pub fn new() -> Self {
        let tools = Self::default();
        tools.state.lock().unwrap().fstype = "ext4".to_string();
        tools
    }

    pub fn set_fstype(&self, fstype: &str) {
        self.state.lock().unwrap().fstype = fstype.to_string();
    }

    pub fn activate(&self, name: &str) {
        self.state.lock().unwrap().active.insert(name.to_string());
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_mount(&self, fail: bool) {
        self.state.lock().unwrap().fail_mount = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    /// Make dmsetup create time out instead of returning.
    pub fn timeout_create(&self, timeout: bool) {
        self.state.lock().unwrap().timeout_create = timeout;
    }

    pub fn timeout_remove(&self, timeout: bool) {
        self.state.lock().unwrap().timeout_remove = timeout;
    }

    /// Make the next `n` umount calls time out.
    pub fn timeout_umount_times(&self, n: u32) {
        self.state.lock().unwrap().umount_timeouts_left = n;
    }

    /// Make the next `n` umount calls report "target is busy".
    pub fn fail_umount_times(&self, n: u32) {
        self.state.lock().unwrap().umount_failures_left = n;
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state.lock().unwrap().active.contains(name)
    }

    pub fn active_devices(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounts.contains_key(path)
    }

    pub fn mount_count(&self) -> usize {
        self.state.lock().unwrap().mounts.len()
    }

    pub fn peak_mounts(&self) -> usize {
        self.state.lock().unwrap().peak_mounts
    }

    pub fn tables(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tables.clone()
    }

    pub fn mount_options(&self) -> Vec<String> {
        self.state.lock().unwrap().mount_options.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn umount_calls(&self) -> usize {
        self.state.lock().unwrap().umount_calls
    }
}

#[async_trait]
impl BlockTools for MockBlockTools {
    async fn device_info(&self, name: &str) -> Result<CommandOutput> {
        if self.is_active(name) {
            Ok(CommandOutput::ok(format!(
                "Name:              {}\nState:             ACTIVE\nRead Ahead:        8192\n",
                name
            )))
        } else {
            Ok(CommandOutput::failed("Device does not exist.\nCommand failed."))
        }
    }

    async fn create_device(&self, name: &str, table: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.timeout_create {
            return Err(timed_out(&format!("dmsetup create {}", name)));
        }
        if state.fail_create {
            return Ok(CommandOutput::failed("device-mapper: reload ioctl on  failed: No data available"));
        }
        state.active.insert(name.to_string());
        state.tables.push((name.to_string(), table.to_string()));
        Ok(CommandOutput::ok(""))
    }

    async fn remove_device(&self, name: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if state.timeout_remove {
            return Err(timed_out(&format!("dmsetup remove {}", name)));
        }
        if state.fail_remove {
            return Ok(CommandOutput::failed("device-mapper: remove ioctl failed: Device or resource busy"));
        }
        if state.active.remove(name) {
            Ok(CommandOutput::ok(""))
        } else {
            Ok(CommandOutput::failed("Device does not exist."))
        }
    }

    async fn udev_settle(&self, _wait_for: Option<&Path>) -> Result<CommandOutput> {
        Ok(CommandOutput::ok(""))
    }

    async fn filesystem_type(&self, _device: &Path) -> Result<CommandOutput> {
        let fstype = self.state.lock().unwrap().fstype.clone();
        Ok(CommandOutput::ok(format!("{}\n", fstype)))
    }

    async fn mount(&self, device: &Path, target: &Path, options: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mount {
            return Ok(CommandOutput::failed("mount: wrong fs type, bad option, bad superblock"));
        }
        state.mounts.insert(target.to_path_buf(), device.to_path_buf());
        state.mount_options.push(options.to_string());
        state.peak_mounts = state.peak_mounts.max(state.mounts.len());
        Ok(CommandOutput::ok(""))
    }

    async fn unmount(&self, target: &Path) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.umount_calls += 1;
        if state.umount_timeouts_left > 0 {
            state.umount_timeouts_left -= 1;
            return Err(timed_out(&format!("umount {}", target.display())));
        }
        if state.umount_failures_left > 0 {
            state.umount_failures_left -= 1;
            return Ok(CommandOutput::failed(format!("umount: {}: target is busy.", target.display())));
        }
        if state.mounts.remove(target).is_some() {
            Ok(CommandOutput::ok(""))
        } else {
            Ok(CommandOutput::failed(format!("umount: {}: not mounted.", target.display())))
        }
    }

    async fn mount_source(&self, target: &Path) -> Result<CommandOutput> {
        let state = self.state.lock().unwrap();
        match state.mounts.get(target) {
            Some(device) => Ok(CommandOutput::ok(format!("{}\n", device.display()))),
            None => Ok(CommandOutput { success: false, code: Some(1), ..CommandOutput::default() }),
        }
    }
}

fn timed_out(command: &str) -> ThinscanError {
    ThinscanError::CommandTimeout { command: command.to_string(), secs: 5 }
}

// ---------------------------------------------------------------------------
// Scanners
// ---------------------------------------------------------------------------

/// Records every job and how many scans ran at once.
#[derive(Default)]
pub struct RecordingScanner {
    pub jobs: Mutex<Vec<ScanJob>>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    /// Targets whose scan returns an error.
    pub fail_targets: Vec<String>,
    /// Targets whose scan panics.
    pub panic_targets: Vec<String>,
}

impl RecordingScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub fn jobs(&self) -> Vec<ScanJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scanner for RecordingScanner {
    async fn scan(&self, job: &ScanJob) -> Result<ScanOutcome> {
        self.jobs.lock().unwrap().push(job.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_targets.contains(&job.target) {
            panic!("scanner bug on {}", job.target);
        }
        if self.fail_targets.contains(&job.target) {
            return Err(ThinscanError::Internal(format!("unparseable package db in {}", job.target)));
        }

        Ok(ScanOutcome::Completed {
            summary: serde_json::json!({ "mount_path": job.handle.mount_path }),
        })
    }
}

pub fn arc_tools() -> Arc<MockBlockTools> {
    Arc::new(MockBlockTools::new())
}
