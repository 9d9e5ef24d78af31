//! Docker engine adapter over the bollard client.
//!
//! Every bollard error is classified here, once, into an [`EngineError`].

use std::{error::Error as StdError, io, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    bollard::{
        API_DEFAULT_VERSION, Docker,
        container::{
            Config, CreateContainerOptions, InspectContainerOptions, LogOutput,
            RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
        },
        errors::Error as BollardError,
        exec::{CreateExecOptions, StartExecOptions, StartExecResults},
        models::{ContainerStateStatusEnum, HostConfig},
    },
    cubicle_config::EngineConfig,
    futures::{Stream, StreamExt, stream::BoxStream},
    tracing::{debug, info, warn},
};

use crate::{
    connection::Connector,
    engine::{
        AttachedExec, ContainerEngine, ContainerInfo, ContainerSpec, ContainerState, ExecOutput,
        ExecSpec, HelperSpec, OutputChunk,
    },
    error::{EngineError, EngineResult},
    transport::{ExecInput, Liveness, SocketInput, SshTunnel, Transport, TunnelInput, classify_io},
};

/// How long to wait for the forwarded socket after spawning ssh.
const TUNNEL_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Map a bollard error onto the engine taxonomy.
#[must_use]
pub fn classify(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => EngineError::Conflict(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Fatal(format!("engine returned {status_code}: {message}")),
        BollardError::IOError { err } => classify_io(&err),
        BollardError::RequestTimeoutError => {
            EngineError::Transient("request to container engine timed out".into())
        },
        BollardError::SocketNotFoundError(path) => {
            EngineError::Transient(format!("engine socket not found: {path}"))
        },
        other => {
            let mut source: Option<&(dyn StdError + 'static)> = other.source();
            while let Some(cause) = source {
                if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                    let classified = classify_io(io_err);
                    if classified.is_transient() {
                        return EngineError::Transient(other.to_string());
                    }
                }
                source = cause.source();
            }
            EngineError::Fatal(other.to_string())
        },
    }
}

fn map_state(status: Option<ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ => ContainerState::Unknown,
    }
}

/// Classify, reporting any failure on a dead tunnel as transient.
fn classify_on(tunnel: Option<&dyn Liveness>, err: BollardError) -> EngineError {
    let classified = classify(err);
    match tunnel {
        Some(tunnel) if !tunnel.is_alive() => {
            EngineError::Transient(format!("tunnel session not active: {classified}"))
        },
        _ => classified,
    }
}

fn map_output(item: LogOutput) -> OutputChunk {
    match item {
        LogOutput::StdErr { message } => OutputChunk::Stderr(message),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => OutputChunk::Stdout(message),
    }
}

/// Map an attached exec's output, with read failures checked against the
/// tunnel the same way request failures are.
fn attached_output<S>(
    output: S,
    tunnel: Option<Arc<dyn Liveness>>,
) -> BoxStream<'static, EngineResult<OutputChunk>>
where
    S: Stream<Item = Result<LogOutput, BollardError>> + Send + 'static,
{
    output
        .map(move |item| {
            item.map(map_output)
                .map_err(|e| classify_on(tunnel.as_deref(), e))
        })
        .boxed()
}

/// A connected Docker engine, local or through an SSH tunnel.
pub struct DockerEngine {
    docker: Docker,
    tunnel: Option<Arc<SshTunnel>>,
}

impl DockerEngine {
    #[must_use]
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            tunnel: None,
        }
    }

    #[must_use]
    pub fn with_tunnel(docker: Docker, tunnel: Arc<SshTunnel>) -> Self {
        Self {
            docker,
            tunnel: Some(tunnel),
        }
    }

    fn liveness(&self) -> Option<Arc<dyn Liveness>> {
        self.tunnel
            .as_ref()
            .map(|tunnel| Arc::clone(tunnel) as Arc<dyn Liveness>)
    }

    fn fail(&self, err: BollardError) -> EngineError {
        classify_on(self.liveness().as_deref(), err)
    }

    async fn wait_exit(&self, name: &str) -> EngineResult<i64> {
        let mut wait = Box::pin(
            self.docker
                .wait_container(name, None::<WaitContainerOptions<String>>),
        );
        match wait.next().await {
            Some(Ok(resp)) => Ok(resp.status_code),
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(self.fail(e)),
            None => Err(EngineError::Fatal(format!(
                "wait stream for {name} ended without a status"
            ))),
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn transport(&self) -> Transport {
        if self.tunnel.is_some() {
            Transport::Tunnel
        } else {
            Transport::Local
        }
    }

    async fn ping(&self) -> EngineResult<()> {
        if let Some(tunnel) = &self.tunnel
            && !tunnel.is_alive()
        {
            return Err(EngineError::Transient("tunnel session not active".into()));
        }
        self.docker.ping().await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerInfo> {
        let resp = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(ContainerInfo {
            id: resp.id.unwrap_or_else(|| name.to_string()),
            name: resp
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            state: map_state(resp.state.and_then(|s| s.status)),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let host_config = HostConfig {
            memory: spec.memory_bytes,
            nano_cpus: Some(spec.nano_cpus),
            binds: Some(spec.mounts.iter().map(|m| m.bind_spec()).collect()),
            security_opt: Some(spec.security_opt.clone()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            working_dir: Some(spec.working_dir.clone()),
            user: spec.user.clone(),
            network_disabled: spec.network_disabled.then_some(true),
            open_stdin: Some(true),
            tty: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let resp = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| self.fail(e))?;
        for warning in &resp.warnings {
            warn!(container = %spec.name, warning, "engine warning on create");
        }
        Ok(resp.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn remove_container(&self, name: &str) -> EngineResult<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| self.fail(e))
    }

    async fn run_helper(&self, spec: &HelperSpec) -> EngineResult<i64> {
        match self.remove_container(&spec.name).await {
            Ok(()) => debug!(helper = %spec.name, "removed stale helper container"),
            Err(EngineError::NotFound(_)) => {},
            Err(e) => return Err(e),
        }

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            user: Some("root".to_string()),
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(|m| m.bind_spec()).collect()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| self.fail(e))?;

        let result = match self.start_container(&spec.name).await {
            Ok(()) => self.wait_exit(&spec.name).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.remove_container(&spec.name).await {
            warn!(helper = %spec.name, error = %e, "failed to remove helper container");
        }
        result
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> EngineResult<ExecOutput> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| self.fail(e))?;
        let StartExecResults::Attached { mut output, .. } = started else {
            return Err(EngineError::Fatal("exec started detached".into()));
        };
        let mut collected = ExecOutput::default();
        while let Some(item) = output.next().await {
            collected.push(map_output(item.map_err(|e| self.fail(e))?));
        }
        Ok(collected)
    }

    async fn start_exec_attached(&self, exec_id: &str) -> EngineResult<AttachedExec> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| self.fail(e))?;
        let StartExecResults::Attached { output, input } = started else {
            return Err(EngineError::Fatal("exec started detached".into()));
        };

        let liveness = self.liveness();
        let input: Box<dyn ExecInput> = match &liveness {
            Some(tunnel) => Box::new(TunnelInput::new(input, Arc::clone(tunnel))),
            None => Box::new(SocketInput::new(input)),
        };
        Ok(AttachedExec {
            output: attached_output(output, liveness),
            input,
        })
    }

    async fn start_exec_detached(&self, exec_id: &str) -> EngineResult<()> {
        self.docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: true,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<Option<i64>> {
        let resp = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| self.fail(e))?;
        if resp.running == Some(true) {
            return Ok(None);
        }
        Ok(resp.exit_code)
    }
}

/// Builds [`DockerEngine`] handles from the `[engine]` config section.
pub struct DockerConnector {
    config: EngineConfig,
}

impl DockerConnector {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn connect_local(&self) -> EngineResult<Docker> {
        let endpoint = self.config.socket.as_str();
        let timeout = self.config.request_timeout_secs;
        if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, timeout, API_DEFAULT_VERSION).map_err(classify)
        } else if endpoint.starts_with('/') {
            Docker::connect_with_unix(endpoint, timeout, API_DEFAULT_VERSION).map_err(classify)
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, timeout, API_DEFAULT_VERSION).map_err(classify)
        } else {
            Err(EngineError::Fatal(format!(
                "unsupported engine endpoint \"{endpoint}\""
            )))
        }
    }
}

#[async_trait]
impl Connector for DockerConnector {
    fn describe(&self) -> String {
        match self.config.ssh_target() {
            Some((user, host)) => format!("ssh://{user}@{host}{}", self.config.remote_socket),
            None => self.config.socket.clone(),
        }
    }

    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>> {
        match self.config.ssh_target() {
            Some((user, host)) => {
                let tunnel = Arc::new(
                    SshTunnel::open(user, host, &self.config.remote_socket, TUNNEL_READY_TIMEOUT)
                        .await?,
                );
                let path = tunnel.socket_path().to_string_lossy().into_owned();
                let docker = Docker::connect_with_unix(
                    &path,
                    self.config.request_timeout_secs,
                    API_DEFAULT_VERSION,
                )
                .map_err(classify)?;
                info!(ssh_target = tunnel.target(), "connected to container engine over ssh tunnel");
                Ok(Arc::new(DockerEngine::with_tunnel(docker, tunnel)))
            },
            None => {
                let docker = self.connect_local()?;
                info!(endpoint = %self.config.socket, "connected to local container engine");
                Ok(Arc::new(DockerEngine::new(docker)))
            },
        }
    }
}
