//! Engine transports: a local socket, or a socket forwarded over SSH.
//!
//! The two differ in how the write half of an attached exec is closed and in
//! how a dead link is detected, so exec input goes through [`ExecInput`] with
//! one adapter per transport, chosen when the engine handle is built.

use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
        process::{Child, Command},
    },
    tracing::{debug, info, warn},
};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Local,
    Tunnel,
}

impl Transport {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Tunnel => "tunnel",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an I/O failure on the engine link.
#[must_use]
pub fn classify_io(err: &io::Error) -> EngineError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => EngineError::Transient(err.to_string()),
        _ => EngineError::Fatal(err.to_string()),
    }
}

/// Write side of an attached exec.
#[async_trait]
pub trait ExecInput: Send {
    async fn write_all(&mut self, data: &[u8]) -> EngineResult<()>;

    /// Close only the write direction so the remote process sees end of
    /// input while output can still be read.
    async fn close_write_side(&mut self) -> EngineResult<()>;
}

/// Raw writer handed out by the engine client for an attached exec.
pub type RawInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Exec input over a local engine socket.
pub struct SocketInput {
    inner: RawInput,
}

impl SocketInput {
    #[must_use]
    pub fn new(inner: RawInput) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ExecInput for SocketInput {
    async fn write_all(&mut self, data: &[u8]) -> EngineResult<()> {
        self.inner.write_all(data).await.map_err(|e| classify_io(&e))
    }

    async fn close_write_side(&mut self) -> EngineResult<()> {
        self.inner.shutdown().await.map_err(|e| classify_io(&e))
    }
}

/// Something that can tell whether a tunnel is still up.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Exec input carried over an SSH-forwarded socket.
///
/// Any failure while the tunnel process is gone is reported as a transient
/// "tunnel session not active" error.
pub struct TunnelInput {
    inner: RawInput,
    tunnel: Arc<dyn Liveness>,
}

impl TunnelInput {
    #[must_use]
    pub fn new(inner: RawInput, tunnel: Arc<dyn Liveness>) -> Self {
        Self { inner, tunnel }
    }

    fn map_err(&self, err: &io::Error) -> EngineError {
        if self.tunnel.is_alive() {
            classify_io(err)
        } else {
            EngineError::Transient(format!("tunnel session not active: {err}"))
        }
    }
}

#[async_trait]
impl ExecInput for TunnelInput {
    async fn write_all(&mut self, data: &[u8]) -> EngineResult<()> {
        if !self.tunnel.is_alive() {
            return Err(EngineError::Transient("tunnel session not active".into()));
        }
        match self.inner.write_all(data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_err(&e)),
        }
    }

    async fn close_write_side(&mut self) -> EngineResult<()> {
        if let Err(e) = self.inner.flush().await {
            return Err(self.map_err(&e));
        }
        match self.inner.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_err(&e)),
        }
    }
}

/// A background `ssh -L` forwarding a local unix socket to the remote
/// engine socket.
///
/// The ssh process is killed and the local socket removed on drop.
pub struct SshTunnel {
    child: Mutex<Child>,
    socket: PathBuf,
    target: String,
}

impl SshTunnel {
    /// Spawn the tunnel and wait until the forwarded socket appears.
    pub async fn open(
        user: &str,
        host: &str,
        remote_socket: &str,
        ready_timeout: Duration,
    ) -> EngineResult<Self> {
        let socket = std::env::temp_dir().join(format!(
            "cubicle-{}.sock",
            uuid::Uuid::new_v4().simple()
        ));
        let target = format!("{user}@{host}");
        let forward = format!("{}:{remote_socket}", socket.display());

        info!(ssh_target = %target, remote_socket, "opening ssh tunnel to container engine");
        let mut child = Command::new("ssh")
            .args([
                "-nNT",
                "-o",
                "BatchMode=yes",
                "-o",
                "ExitOnForwardFailure=yes",
                "-o",
                "StreamLocalBindUnlink=yes",
                "-o",
                "ServerAliveInterval=30",
                "-L",
                forward.as_str(),
                target.as_str(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    EngineError::Fatal("ssh binary not found on PATH".into())
                },
                _ => EngineError::Fatal(format!("failed to spawn ssh: {e}")),
            })?;

        let deadline = tokio::time::Instant::now() + ready_timeout;
        loop {
            if socket.exists() {
                debug!(socket = %socket.display(), "tunnel socket ready");
                return Ok(Self {
                    child: Mutex::new(child),
                    socket,
                    target,
                });
            }
            if let Ok(Some(status)) = child.try_wait() {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                return Err(EngineError::Transient(format!(
                    "ssh tunnel to {target} exited ({status}): {}",
                    stderr.trim()
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.start_kill();
                let _ = std::fs::remove_file(&socket);
                return Err(EngineError::Transient(format!(
                    "timed out waiting for ssh tunnel to {target}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Liveness for SshTunnel {
    fn is_alive(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock()
            && let Err(e) = child.start_kill()
        {
            debug!(error = %e, "ssh tunnel already gone");
        }
        if let Err(e) = std::fs::remove_file(&self.socket)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(socket = %self.socket.display(), error = %e, "failed to remove tunnel socket");
        }
    }
}
