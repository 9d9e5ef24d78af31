//! Scripted sandbox for tool tests.

use std::sync::{Arc, Mutex};

use {async_trait::async_trait, cubicle_common::ExecutionResult};

use crate::{backend::SessionSandbox, context::ToolContext, error::Result};

/// One recorded sandbox call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Command {
        command: String,
        timeout_secs: Option<u64>,
    },
    Input {
        program: Vec<String>,
        payload: Vec<u8>,
    },
}

type Responder = Arc<dyn Fn(&Call) -> ExecutionResult + Send + Sync>;

pub struct ScriptedSandbox {
    calls: Mutex<Vec<Call>>,
    respond: Responder,
}

impl ScriptedSandbox {
    pub fn new(respond: impl Fn(&Call) -> ExecutionResult + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond: Arc::new(respond),
        })
    }

    /// Every call succeeds with the given output.
    pub fn replying(output: &str) -> Arc<Self> {
        let output = output.to_string();
        Self::new(move |_| ExecutionResult::new(0, output.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: Call) -> ExecutionResult {
        let result = (self.respond)(&call);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        result
    }
}

#[async_trait]
impl SessionSandbox for ScriptedSandbox {
    async fn exec_command(
        &self,
        _ctx: &ToolContext,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        Ok(self.record(Call::Command {
            command: command.to_string(),
            timeout_secs,
        }))
    }

    async fn exec_with_input(
        &self,
        _ctx: &ToolContext,
        program: &[String],
        payload: &[u8],
    ) -> Result<ExecutionResult> {
        Ok(self.record(Call::Input {
            program: program.to_vec(),
            payload: payload.to_vec(),
        }))
    }
}
