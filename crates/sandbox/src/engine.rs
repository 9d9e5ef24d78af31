//! The container engine seam.
//!
//! Everything above this module talks to [`ContainerEngine`]; the Docker
//! adapter lives in [`crate::docker`] and tests use an in-memory fake.

use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::stream::BoxStream,
};

use crate::{error::EngineResult, transport::{ExecInput, Transport}};

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
}

/// One host-to-container mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Named volume or absolute host path.
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    #[must_use]
    pub fn bind_spec(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{mode}", self.source, self.target)
    }
}

/// Everything needed to create a session container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub working_dir: String,
    pub user: Option<String>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: i64,
    pub mounts: Vec<Mount>,
    pub network_disabled: bool,
    pub security_opt: Vec<String>,
}

/// A short-lived root container used for host-side preparation.
#[derive(Debug, Clone)]
pub struct HelperSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub mounts: Vec<Mount>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub attach_stdin: bool,
}

/// A demultiplexed piece of exec output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// Collected output of a buffered exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn push(&mut self, chunk: OutputChunk) {
        match chunk {
            OutputChunk::Stdout(b) => self.stdout.extend_from_slice(&b),
            OutputChunk::Stderr(b) => self.stderr.extend_from_slice(&b),
        }
    }
}

/// A started exec with its input side still open.
pub struct AttachedExec {
    pub output: BoxStream<'static, EngineResult<OutputChunk>>,
    pub input: Box<dyn ExecInput>,
}

/// Operations the sandbox needs from a container engine.
///
/// Implementations classify every failure into an [`crate::EngineError`]
/// before returning.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    fn transport(&self) -> Transport;

    async fn ping(&self) -> EngineResult<()>;

    /// `NotFound` when no container has this name or id.
    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerInfo>;

    /// Returns the new container id.
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String>;

    /// Starting an already running container succeeds.
    async fn start_container(&self, id: &str) -> EngineResult<()>;

    /// Force-remove. `NotFound` when there is nothing to remove.
    async fn remove_container(&self, name: &str) -> EngineResult<()>;

    /// Create, run to completion and remove a helper container. Returns its
    /// exit code.
    async fn run_helper(&self, spec: &HelperSpec) -> EngineResult<i64>;

    /// Returns the exec id.
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String>;

    /// Run the exec and collect demultiplexed output until it exits.
    async fn start_exec(&self, exec_id: &str) -> EngineResult<ExecOutput>;

    /// Run the exec with stdin attached.
    async fn start_exec_attached(&self, exec_id: &str) -> EngineResult<AttachedExec>;

    /// Run the exec in the background and return immediately.
    async fn start_exec_detached(&self, exec_id: &str) -> EngineResult<()>;

    /// Exit code of a finished exec, `None` while it is still running.
    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<Option<i64>>;
}
