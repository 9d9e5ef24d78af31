//! Get-or-create for per-session containers.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use {
    cubicle_config::ContainerConfig,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use cubicle_metrics::{containers as container_metrics, counter};

use crate::{
    connection::ConnectionManager,
    engine::{ContainerInfo, ContainerSpec, HelperSpec, Mount},
    env::SessionEnv,
    error::{EngineError, Error, Result},
    session::SessionId,
};

/// Container-side mount points for the host data directories.
pub const UPLOADS_MOUNT: &str = "/mnt/user-data/uploads";
pub const OUTPUTS_MOUNT: &str = "/mnt/user-data/outputs";

const MANAGED_BY: &str = "cubicle";
const TOOL_LABEL: &str = "computer-use";

/// Keeps the container alive with no foreground workload until signalled.
const KEEPALIVE: &str = "trap 'exit 0' SIGTERM SIGINT; tail -f /dev/null & wait $!";

/// A running session container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub session: SessionId,
}

/// Container policy resolved from config.
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub image: String,
    pub name_prefix: String,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: i64,
    pub working_dir: String,
    pub user: Option<String>,
    pub entrypoint: Option<String>,
    pub enable_network: bool,
    pub data_base_path: PathBuf,
    pub labels: BTreeMap<String, String>,
}

impl TryFrom<&ContainerConfig> for ContainerSettings {
    type Error = Error;

    fn try_from(config: &ContainerConfig) -> Result<Self> {
        let memory_bytes = config.memory_bytes().ok_or_else(|| {
            Error::Config(format!("cannot parse memory limit \"{}\"", config.memory_limit))
        })?;
        Ok(Self {
            image: config.image.clone(),
            name_prefix: config.name_prefix.clone(),
            memory_bytes: Some(memory_bytes),
            nano_cpus: config.nano_cpus(),
            working_dir: config.working_dir.clone(),
            user: config.user.clone().filter(|u| !u.is_empty()),
            entrypoint: config.entrypoint.clone().filter(|e| !e.is_empty()),
            enable_network: config.enable_network,
            data_base_path: PathBuf::from(&config.data_base_path),
            labels: config.labels.clone(),
        })
    }
}

/// Command for the main container: optional init script, then block until
/// SIGTERM.
pub fn keepalive_command(entrypoint: Option<&str>) -> Result<Vec<String>> {
    let script = match entrypoint {
        Some(entrypoint) => {
            let quoted_entry = shlex::try_quote(entrypoint)
                .map_err(|e| Error::Config(format!("entrypoint: {e}")))?;
            let quoted_loop = shlex::try_quote(KEEPALIVE)
                .map_err(|e| Error::Config(format!("keepalive: {e}")))?;
            format!("{quoted_entry} bash -c {quoted_loop}")
        },
        None => KEEPALIVE.to_string(),
    };
    Ok(vec!["bash".into(), "-c".into(), script])
}

pub struct LifecycleManager {
    conn: Arc<ConnectionManager>,
    settings: ContainerSettings,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(conn: Arc<ConnectionManager>, settings: ContainerSettings) -> Self {
        Self { conn, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Return a running container for `session`, creating or starting it as
    /// needed. State is always re-read from the engine; nothing is cached.
    pub async fn get_or_create(
        &self,
        session: &SessionId,
        env: &SessionEnv,
    ) -> Result<ContainerHandle> {
        if !self.conn.ensure_connection().await {
            return Err(Error::NotConnected);
        }

        let name = session.container_name(&self.settings.name_prefix);
        match self.inspect(&name).await {
            Ok(info) => self.ensure_running(session, info).await,
            Err(Error::Engine(EngineError::NotFound(_))) => {
                self.create(session, env, &name).await
            },
            Err(e) => Err(e),
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        self.conn
            .execute_with_retry(|engine| {
                let name = name.to_string();
                async move { engine.inspect_container(&name).await }
            })
            .await
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.conn
            .execute_with_retry(|engine| {
                let id = id.to_string();
                async move { engine.start_container(&id).await }
            })
            .await
    }

    async fn ensure_running(
        &self,
        session: &SessionId,
        info: ContainerInfo,
    ) -> Result<ContainerHandle> {
        if info.state.is_running() {
            debug!(container = %info.name, "reusing running container");
            #[cfg(feature = "metrics")]
            counter!(container_metrics::REUSED_TOTAL).increment(1);
        } else {
            info!(container = %info.name, state = %info.state, "starting existing container");
            self.start(&info.id).await?;
            #[cfg(feature = "metrics")]
            counter!(container_metrics::STARTED_TOTAL).increment(1);
        }
        Ok(ContainerHandle {
            id: info.id,
            name: info.name,
            session: session.clone(),
        })
    }

    async fn create(
        &self,
        session: &SessionId,
        env: &SessionEnv,
        name: &str,
    ) -> Result<ContainerHandle> {
        info!(
            container = name,
            session = %session,
            image = %self.settings.image,
            env_keys = ?env.keys().collect::<Vec<_>>(),
            "creating container"
        );
        self.prepare_host_dirs(session, name).await;

        let spec = self.container_spec(session, env, name)?;
        let created = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                async move { engine.create_container(&spec).await }
            })
            .await;

        let id = match created {
            Ok(id) => id,
            Err(Error::Engine(EngineError::Conflict(msg))) => {
                // Lost a create race; use whatever won.
                warn!(container = name, reason = %msg, "container appeared during create, reusing it");
                let info = self.inspect(name).await?;
                return self.ensure_running(session, info).await;
            },
            Err(e) => return Err(e),
        };

        self.start(&id).await?;
        #[cfg(feature = "metrics")]
        counter!(container_metrics::CREATED_TOTAL).increment(1);
        info!(container = name, id = %id, "created and started container");

        Ok(ContainerHandle {
            id,
            name: name.to_string(),
            session: session.clone(),
        })
    }

    /// Create the host upload/output directories from a root helper
    /// container so the session user can write to them. Failures only warn:
    /// the bind mount creates missing directories anyway.
    async fn prepare_host_dirs(&self, session: &SessionId, name: &str) {
        let base = &self.settings.data_base_path;
        let uploads = session.uploads_dir(base);
        let outputs = session.outputs_dir(base);
        let data_dir = session.data_dir(base);

        let quoted: std::result::Result<Vec<String>, _> = [&uploads, &outputs, &data_dir]
            .iter()
            .map(|p| shlex::try_quote(&p.to_string_lossy()).map(|q| q.into_owned()))
            .collect();
        let Ok(quoted) = quoted else {
            warn!(container = name, "host data path cannot be quoted, skipping preparation");
            return;
        };
        let base_str = base.to_string_lossy().into_owned();
        let spec = HelperSpec {
            name: format!("{name}-prep"),
            image: self.settings.image.clone(),
            cmd: vec![
                "bash".into(),
                "-c".into(),
                format!(
                    "mkdir -p {} {} && chmod -R 777 {}",
                    quoted[0], quoted[1], quoted[2]
                ),
            ],
            mounts: vec![Mount {
                source: base_str.clone(),
                target: base_str,
                read_only: false,
            }],
        };

        let result = self
            .conn
            .execute_with_retry(|engine| {
                let spec = spec.clone();
                async move { engine.run_helper(&spec).await }
            })
            .await;
        match result {
            Ok(0) => debug!(container = name, path = %data_dir.display(), "host directories ready"),
            Ok(code) => {
                warn!(container = name, exit_code = code, "host directory preparation exited non-zero");
                #[cfg(feature = "metrics")]
                counter!(container_metrics::PREPARE_FAILURES_TOTAL).increment(1);
            },
            Err(e) => {
                warn!(container = name, error = %e, "host directory preparation failed");
                #[cfg(feature = "metrics")]
                counter!(container_metrics::PREPARE_FAILURES_TOTAL).increment(1);
            },
        }
    }

    fn container_spec(
        &self,
        session: &SessionId,
        env: &SessionEnv,
        name: &str,
    ) -> Result<ContainerSpec> {
        let s = &self.settings;
        let mut labels = s.labels.clone();
        labels.insert("managed-by".into(), MANAGED_BY.into());
        labels.insert("chat-id".into(), session.as_str().to_string());
        labels.insert("tool".into(), TOOL_LABEL.into());

        let mounts = vec![
            Mount {
                source: session.workspace_volume(),
                target: s.working_dir.clone(),
                read_only: false,
            },
            Mount {
                source: session
                    .uploads_dir(&s.data_base_path)
                    .to_string_lossy()
                    .into_owned(),
                target: UPLOADS_MOUNT.into(),
                read_only: true,
            },
            Mount {
                source: session
                    .outputs_dir(&s.data_base_path)
                    .to_string_lossy()
                    .into_owned(),
                target: OUTPUTS_MOUNT.into(),
                read_only: false,
            },
        ];

        Ok(ContainerSpec {
            name: name.to_string(),
            image: s.image.clone(),
            hostname: session.hostname(),
            cmd: keepalive_command(s.entrypoint.as_deref())?,
            env: env.to_vars(),
            labels,
            working_dir: s.working_dir.clone(),
            user: s.user.clone(),
            memory_bytes: s.memory_bytes,
            nano_cpus: s.nano_cpus,
            mounts,
            network_disabled: !s.enable_network,
            security_opt: vec!["no-new-privileges:true".into()],
        })
    }
}
