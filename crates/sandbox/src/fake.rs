//! In-memory engine and connector for tests.
//!
//! All engine handles built by one [`FakeConnector`] share a [`FakeState`],
//! so a reconnect sees the same containers. Failures are injected per
//! operation, and exec behaviour is scripted through a handler.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::{StreamExt, stream},
    tokio::io::AsyncReadExt,
};

use crate::{
    connection::Connector,
    engine::{
        AttachedExec, ContainerEngine, ContainerInfo, ContainerSpec, ContainerState, ExecOutput,
        ExecSpec, HelperSpec, OutputChunk,
    },
    error::{EngineError, EngineResult},
    idle,
    transport::{SocketInput, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Ping,
    Inspect,
    Create,
    Start,
    Helper,
    CreateExec,
    StartExec,
}

/// What a scripted exec produces.
#[derive(Debug, Clone, Default)]
pub struct FakeRun {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
}

/// Decides the outcome of an exec from its argv and stdin.
pub type ExecHandler = Arc<dyn Fn(&[String], &[u8]) -> FakeRun + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub state: ContainerState,
    pub spec: ContainerSpec,
}

struct FakeExec {
    spec: ExecSpec,
    exit_code: Option<i64>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    creates: u32,
    starts: u32,
    helpers: Vec<HelperSpec>,
    execs: HashMap<String, FakeExec>,
    exec_log: Vec<ExecSpec>,
    transient: HashMap<Op, u32>,
    fatal: HashSet<Op>,
    conflict_on_create: bool,
    next_pid: u32,
    timer_marker: Option<u32>,
    live_timers: HashSet<u32>,
    max_live_timers: usize,
    next_id: u32,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:04}", self.next_id)
    }

    fn check(&mut self, op: Op) -> EngineResult<()> {
        if let Some(remaining) = self.transient.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(EngineError::Transient(format!("broken pipe during {op:?}")));
        }
        if self.fatal.contains(&op) {
            return Err(EngineError::Fatal(format!("{op:?} rejected")));
        }
        Ok(())
    }

    /// Emulate the idle-timer scripts against the shared marker.
    fn apply_idle_script(&mut self, cmd: &[String], detached: bool) {
        let Some(script) = cmd.last() else {
            return;
        };
        if !detached && *script == idle::kill_script() {
            if let Some(pid) = self.timer_marker {
                self.live_timers.remove(&pid);
            }
        } else if detached && script.contains(idle::MARKER_FILE) {
            self.next_pid += 1;
            let pid = self.next_pid;
            self.timer_marker = Some(pid);
            self.live_timers.insert(pid);
            self.max_live_timers = self.max_live_timers.max(self.live_timers.len());
        }
    }
}

/// Shared, inspectable state behind every fake handle.
#[derive(Clone)]
pub struct FakeState {
    inner: Arc<Mutex<Inner>>,
    handler: Arc<Mutex<ExecHandler>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            handler: Arc::new(Mutex::new(Arc::new(echo_handler))),
        }
    }
}

/// Default handler: exit 0, echo stdin to stdout.
fn echo_handler(_cmd: &[String], stdin: &[u8]) -> FakeRun {
    FakeRun {
        stdout: stdin.to_vec(),
        ..Default::default()
    }
}

impl FakeState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handler(&self) -> ExecHandler {
        match self.handler.lock() {
            Ok(h) => Arc::clone(&h),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn set_handler(&self, handler: impl Fn(&[String], &[u8]) -> FakeRun + Send + Sync + 'static) {
        if let Ok(mut h) = self.handler.lock() {
            *h = Arc::new(handler);
        }
    }

    /// Fail the next `count` calls of `op` with a transient error.
    pub fn fail_next(&self, op: Op, count: u32) {
        self.lock().transient.insert(op, count);
    }

    /// Fail every call of `op` with a fatal error.
    pub fn fail_fatal(&self, op: Op) {
        self.lock().fatal.insert(op);
    }

    /// Make the next create lose a race: the name appears, running, and the
    /// create returns a conflict.
    pub fn conflict_on_create(&self) {
        self.lock().conflict_on_create = true;
    }

    /// Simulate an external stop (idle shutdown, `docker stop`).
    pub fn set_state(&self, name: &str, state: ContainerState) {
        if let Some(c) = self.lock().containers.get_mut(name) {
            c.state = state;
        }
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn creates(&self) -> u32 {
        self.lock().creates
    }

    pub fn starts(&self) -> u32 {
        self.lock().starts
    }

    pub fn helpers(&self) -> Vec<HelperSpec> {
        self.lock().helpers.clone()
    }

    pub fn exec_log(&self) -> Vec<ExecSpec> {
        self.lock().exec_log.clone()
    }

    pub fn live_timers(&self) -> usize {
        self.lock().live_timers.len()
    }

    pub fn max_live_timers(&self) -> usize {
        self.lock().max_live_timers
    }
}

pub struct FakeEngine {
    state: FakeState,
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn transport(&self) -> Transport {
        Transport::Local
    }

    async fn ping(&self) -> EngineResult<()> {
        self.state.lock().check(Op::Ping)
    }

    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerInfo> {
        let mut inner = self.state.lock();
        inner.check(Op::Inspect)?;
        let found = inner
            .containers
            .get(name)
            .or_else(|| inner.containers.values().find(|c| c.id == name));
        match found {
            Some(c) => Ok(ContainerInfo {
                id: c.id.clone(),
                name: c.spec.name.clone(),
                state: c.state,
            }),
            None => Err(EngineError::NotFound(format!("No such container: {name}"))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let mut inner = self.state.lock();
        inner.check(Op::Create)?;
        if std::mem::take(&mut inner.conflict_on_create) {
            let id = inner.next_id("c");
            inner.containers.insert(spec.name.clone(), FakeContainer {
                id,
                state: ContainerState::Running,
                spec: spec.clone(),
            });
            return Err(EngineError::Conflict(format!(
                "name \"{}\" is already in use",
                spec.name
            )));
        }
        if inner.containers.contains_key(&spec.name) {
            return Err(EngineError::Conflict(format!(
                "name \"{}\" is already in use",
                spec.name
            )));
        }
        let id = inner.next_id("c");
        inner.creates += 1;
        inner.containers.insert(spec.name.clone(), FakeContainer {
            id: id.clone(),
            state: ContainerState::Created,
            spec: spec.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        let mut inner = self.state.lock();
        inner.check(Op::Start)?;
        inner.starts += 1;
        match inner.containers.values_mut().find(|c| c.id == id || c.spec.name == id) {
            Some(c) => {
                c.state = ContainerState::Running;
                Ok(())
            },
            None => Err(EngineError::NotFound(format!("No such container: {id}"))),
        }
    }

    async fn remove_container(&self, name: &str) -> EngineResult<()> {
        match self.state.lock().containers.remove(name) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(format!("No such container: {name}"))),
        }
    }

    async fn run_helper(&self, spec: &HelperSpec) -> EngineResult<i64> {
        let mut inner = self.state.lock();
        inner.helpers.push(spec.clone());
        inner.check(Op::Helper)?;
        Ok(0)
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String> {
        let mut inner = self.state.lock();
        inner.check(Op::CreateExec)?;
        let running = inner
            .containers
            .values()
            .any(|c| (c.id == container || c.spec.name == container) && c.state.is_running());
        if !running {
            return Err(EngineError::Fatal(format!("container {container} is not running")));
        }
        let id = inner.next_id("e");
        inner.exec_log.push(spec.clone());
        inner.execs.insert(id.clone(), FakeExec {
            spec: spec.clone(),
            exit_code: None,
        });
        Ok(id)
    }

    async fn start_exec(&self, exec_id: &str) -> EngineResult<ExecOutput> {
        let cmd = {
            let mut inner = self.state.lock();
            inner.check(Op::StartExec)?;
            let cmd = inner
                .execs
                .get(exec_id)
                .map(|e| e.spec.cmd.clone())
                .ok_or_else(|| EngineError::NotFound(exec_id.to_string()))?;
            inner.apply_idle_script(&cmd, false);
            cmd
        };
        let run = (self.state.handler())(&cmd, &[]);
        if let Some(exec) = self.state.lock().execs.get_mut(exec_id) {
            exec.exit_code = Some(run.exit_code);
        }
        Ok(ExecOutput {
            stdout: run.stdout,
            stderr: run.stderr,
        })
    }

    async fn start_exec_attached(&self, exec_id: &str) -> EngineResult<AttachedExec> {
        let cmd = {
            let mut inner = self.state.lock();
            inner.check(Op::StartExec)?;
            inner
                .execs
                .get(exec_id)
                .map(|e| e.spec.cmd.clone())
                .ok_or_else(|| EngineError::NotFound(exec_id.to_string()))?
        };

        // Small buffer so large payloads only get through if the caller
        // reads output while it writes.
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        let state = self.state.clone();
        let exec_id = exec_id.to_string();
        let output = stream::once(async move {
            let mut stdin = Vec::new();
            if let Err(e) = server.read_to_end(&mut stdin).await {
                return vec![Err(EngineError::Transient(e.to_string()))];
            }
            let run = (state.handler())(&cmd, &stdin);
            if let Some(exec) = state.lock().execs.get_mut(&exec_id) {
                exec.exit_code = Some(run.exit_code);
            }
            let mut chunks = Vec::new();
            for piece in run.stdout.chunks(8 * 1024) {
                chunks.push(Ok(OutputChunk::Stdout(Bytes::copy_from_slice(piece))));
            }
            if !run.stderr.is_empty() {
                chunks.push(Ok(OutputChunk::Stderr(Bytes::from(run.stderr))));
            }
            chunks
        })
        .flat_map(stream::iter)
        .boxed();

        Ok(AttachedExec {
            output,
            input: Box::new(SocketInput::new(Box::pin(client))),
        })
    }

    async fn start_exec_detached(&self, exec_id: &str) -> EngineResult<()> {
        let mut inner = self.state.lock();
        inner.check(Op::StartExec)?;
        let cmd = inner
            .execs
            .get(exec_id)
            .map(|e| e.spec.cmd.clone())
            .ok_or_else(|| EngineError::NotFound(exec_id.to_string()))?;
        inner.apply_idle_script(&cmd, true);
        Ok(())
    }

    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<Option<i64>> {
        self.state
            .lock()
            .execs
            .get(exec_id)
            .map(|e| e.exit_code)
            .ok_or_else(|| EngineError::NotFound(exec_id.to_string()))
    }
}

/// Hands out [`FakeEngine`]s over one shared state.
pub struct FakeConnector {
    state: FakeState,
    connect_failures: Mutex<u32>,
    connects: Mutex<u32>,
    last: Mutex<Option<Arc<FakeEngine>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: FakeState::default(),
            connect_failures: Mutex::new(0),
            connects: Mutex::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn state(&self) -> FakeState {
        self.state.clone()
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_connects(&self, count: u32) {
        if let Ok(mut f) = self.connect_failures.lock() {
            *f = count;
        }
    }

    /// Connection attempts so far, failed ones included.
    pub fn connects(&self) -> u32 {
        self.connects.lock().map(|c| *c).unwrap_or_default()
    }

    pub fn last_handle_id(&self) -> usize {
        self.last
            .lock()
            .ok()
            .and_then(|l| l.as_ref().map(|e| Arc::as_ptr(e) as *const () as usize))
            .unwrap_or_default()
    }
}

/// Address of the engine behind a handle, for identity checks.
pub fn handle_id(engine: &dyn ContainerEngine) -> usize {
    engine as *const dyn ContainerEngine as *const () as usize
}

#[async_trait]
impl Connector for FakeConnector {
    fn describe(&self) -> String {
        "fake://engine".into()
    }

    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>> {
        // Yield so concurrent reconnects actually overlap.
        tokio::task::yield_now().await;
        if let Ok(mut c) = self.connects.lock() {
            *c += 1;
        }
        if let Ok(mut f) = self.connect_failures.lock()
            && *f > 0
        {
            *f -= 1;
            return Err(EngineError::Transient("connection refused".into()));
        }
        let engine = Arc::new(FakeEngine {
            state: self.state.clone(),
        });
        if let Ok(mut last) = self.last.lock() {
            *last = Some(Arc::clone(&engine));
        }
        Ok(engine)
    }
}
