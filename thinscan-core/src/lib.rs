//! thinscan core library
//!
//! Resolves container and image identifiers, exposes their root
//! filesystems through read-only device-mapper thin devices, and runs
//! bounded-concurrency scans over many of them.

pub mod command;
pub mod config;
pub mod devmapper;
pub mod error;
pub mod mount;
pub mod observability;
pub mod orchestrator;
pub mod paths;
pub mod resolver;
pub mod runtime;
pub mod scan;
pub mod types;

// Re-export commonly used items
pub use config::Config;
pub use devmapper::{BlockTools, SystemBlockTools};
pub use error::{CleanupStep, ErrorReport, Result, ThinscanError};
pub use mount::{MountHandle, ThinMountManager};
pub use observability::init as init_observability;
pub use orchestrator::{
    effective_concurrency, CancelHandle, JobResults, ProgressSnapshot, ScanOrchestrator,
    TargetOutcome, TargetReport, TargetSelection,
};
pub use resolver::IdentifierResolver;
pub use runtime::{ContainerRuntime, DockerCli};
pub use scan::{ReleaseScanner, ScanJob, ScanOutcome, Scanner};
pub use types::{ObjectKind, ResolvedRef};
