//! Delegation to an autonomous `claude` CLI run inside the sandbox.
//!
//! A new run writes the task to a plan file first and tells the agent to
//! read it, so the task survives context compaction. A resumed run keeps
//! the original plan and passes the caller's new instruction inline.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    tracing::{info, warn},
};

use crate::{
    backend::SessionSandbox,
    context::ToolContext,
    error::{Error, Result, parse_params},
    registry::SandboxTool,
};

pub const PLAN_FILE: &str = "/home/assistant/task_plan.md";
const DEFAULT_MAX_TURNS: u32 = 50;
const DEFAULT_WORKING_DIRECTORY: &str = "/home/assistant";

/// Tools that need an interactive user and hang a headless run.
const DISALLOWED_TOOLS: &str = "AskUserQuestion,ExitPlanMode";

const ENVIRONMENT_PROMPT: &str = "<environment>
You are working in a Linux container (Ubuntu 24) as an autonomous sub-agent.
FILE LOCATIONS:
- User uploads: /mnt/user-data/uploads (read-only)
- Workspace: /home/assistant
- Outputs: /mnt/user-data/outputs
</environment>

<available_skills>
IMPORTANT: Read the relevant SKILL.md BEFORE starting any task!

- docx: /mnt/skills/public/docx/SKILL.md - Word documents creation and editing
- pdf: /mnt/skills/public/pdf/SKILL.md - PDF manipulation, forms, text extraction
- pptx: /mnt/skills/public/pptx/SKILL.md - PowerPoint presentations
- xlsx: /mnt/skills/public/xlsx/SKILL.md - Excel spreadsheets with formulas
- gitlab-explorer: /mnt/skills/public/gitlab-explorer/SKILL.md - GitLab operations (clone, MR, issues)
- skill-creator: /mnt/skills/public/skill-creator/SKILL.md - Creating new skills

Use `cat /mnt/skills/public/<skill>/SKILL.md` to read skill instructions.
</available_skills>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Sonnet,
    Opus,
}

impl Model {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sonnet => "sonnet",
            Self::Opus => "opus",
        }
    }

    /// Unknown names fall back to the default.
    fn lenient(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("opus") => Self::Opus,
            _ => Self::Sonnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Act,
    Plan,
}

impl Mode {
    fn lenient(raw: Option<&str>) -> Self {
        match raw {
            Some("plan") => Self::Plan,
            _ => Self::Act,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubAgentParams {
    task: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    max_turns: Option<i64>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    working_directory: Option<String>,
    #[serde(default)]
    resume_session_id: Option<String>,
}

/// A validated sub-agent request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Run {
    task: String,
    model: Model,
    max_turns: u32,
    mode: Mode,
    working_directory: String,
    resume: Option<String>,
}

impl From<SubAgentParams> for Run {
    fn from(p: SubAgentParams) -> Self {
        Self {
            task: p.task,
            model: Model::lenient(p.model.as_deref()),
            max_turns: p
                .max_turns
                .and_then(|t| u32::try_from(t).ok())
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_MAX_TURNS),
            mode: Mode::lenient(p.mode.as_deref()),
            working_directory: p
                .working_directory
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_WORKING_DIRECTORY.into()),
            resume: p.resume_session_id.filter(|s| !s.is_empty()),
        }
    }
}

fn quote(s: &str) -> Result<String> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .map_err(|e| Error::invalid_params(e.to_string()))
}

fn system_prompt(mode: Mode) -> String {
    let mut prompt = format!(
        "<critical_instruction>
Your task plan is saved at {PLAN_FILE}

BEFORE ANY ACTION:
1. Read {PLAN_FILE} to understand your full task
2. If context becomes compacted, re-read {PLAN_FILE} - it is your source of truth
3. The plan file contains all details you need

Never forget: {PLAN_FILE} has your complete instructions.
</critical_instruction>

{ENVIRONMENT_PROMPT}"
    );
    if mode == Mode::Plan {
        prompt.push_str(
            "\n\n<mode>PLAN ONLY: investigate and write a step-by-step plan. Do not modify files outside /mnt/user-data/outputs.</mode>",
        );
    }
    prompt
}

/// The shell command that starts or resumes the agent.
fn claude_command(run: &Run, user_email: Option<&str>) -> Result<String> {
    let mut cmd = format!("cd {} && ", quote(&run.working_directory)?);
    if let Some(email) = user_email {
        cmd.push_str(&format!(
            "ANTHROPIC_CUSTOM_HEADERS={} ",
            quote(&format!("x-openwebui-user-email: {email}"))?
        ));
    }
    match &run.resume {
        Some(session) => {
            let prompt = format!(
                "Your original task is saved at {PLAN_FILE}. Read it if your context was compacted. New instruction from caller: {}",
                run.task
            );
            cmd.push_str(&format!(
                "claude -p {} --resume {} ",
                quote(&prompt)?,
                quote(session)?
            ));
        },
        None => {
            let prompt = format!("Read and execute your task plan from {PLAN_FILE}");
            cmd.push_str(&format!(
                "claude -p {} --model {} --append-system-prompt {} ",
                quote(&prompt)?,
                run.model.as_str(),
                quote(&system_prompt(run.mode))?
            ));
        },
    }
    cmd.push_str(&format!(
        "--max-turns {} --permission-mode bypassPermissions --disallowedTools '{DISALLOWED_TOOLS}' --output-format json",
        run.max_turns
    ));
    Ok(cmd)
}

/// The final `{"type": "result"}` record printed by `--output-format json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultRecord {
    #[serde(rename = "type")]
    kind: String,
    result: String,
    total_cost_usd: f64,
    num_turns: u32,
    is_error: bool,
    session_id: String,
}

fn parse_result(output: &str) -> Option<ResultRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("\"type\"") && line.contains("\"result\""))
        .filter_map(|line| serde_json::from_str::<ResultRecord>(line).ok())
        .find(|record| record.kind == "result")
}

fn format_result(output: &str, run: &Run, duration: Duration) -> String {
    let record = parse_result(output).unwrap_or_default();
    let response = if record.result.is_empty() {
        output
    } else {
        record.result.as_str()
    };
    let status = if record.is_error { "error" } else { "success" };
    let session_info = if record.session_id.is_empty() {
        String::new()
    } else {
        format!(" | **Session:** `{}`", record.session_id)
    };
    let resume_hint = if !record.session_id.is_empty() && record.num_turns >= run.max_turns {
        format!(
            "\n\n> To resume this session, use `resume_session_id=\"{}\"`",
            record.session_id
        )
    } else {
        String::new()
    };
    format!(
        "**Sub-Agent Completed** ({status})\n**Model:** {} | **Turns:** {}/{} | **Cost:** ${:.4} | **Duration:** {:.1}s{session_info}\n\n{response}{resume_hint}",
        run.model.as_str(),
        record.num_turns,
        run.max_turns,
        record.total_cost_usd,
        duration.as_secs_f64(),
    )
}

/// Hands a multi-step task to an autonomous agent in the same container.
pub struct SubAgentTool {
    sandbox: Arc<dyn SessionSandbox>,
    timeout: Duration,
}

impl SubAgentTool {
    #[must_use]
    pub fn new(sandbox: Arc<dyn SessionSandbox>, timeout: Duration) -> Self {
        Self { sandbox, timeout }
    }

    async fn write_plan(&self, ctx: &ToolContext, task: &str) -> Result<()> {
        let program = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("cat > {PLAN_FILE}"),
        ];
        let result = self
            .sandbox
            .exec_with_input(ctx, &program, task.as_bytes())
            .await?;
        if !result.success {
            return Err(Error::message(format!(
                "could not write task plan: {}",
                result.into_display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxTool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn description(&self) -> &str {
        "Delegate complex, multi-step tasks (documents, multi-file refactoring, test-fix cycles, research) to an autonomous sub-agent. Do not use for tasks that take one or two tool calls."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "Detailed task for the sub-agent"},
                "description": {"type": "string", "description": "Why you are delegating this task"},
                "model": {"type": "string", "enum": ["sonnet", "opus"], "description": "sonnet (fast, default) or opus (powerful)"},
                "max_turns": {"type": "integer", "description": "Maximum agentic turns (default 50)"},
                "mode": {"type": "string", "enum": ["act", "plan"], "description": "act (execute, default) or plan (plan only)"},
                "working_directory": {"type": "string", "description": "Working directory (default /home/assistant)"},
                "resume_session_id": {"type": "string", "description": "Session id from a previous result, to continue it"}
            },
            "required": ["task", "description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String> {
        let params: SubAgentParams = parse_params(params)?;
        let description = params.description.clone();
        let run = Run::from(params);
        info!(
            session = %ctx.session_id,
            model = run.model.as_str(),
            max_turns = run.max_turns,
            resume = run.resume.is_some(),
            why = %description,
            "starting sub-agent"
        );

        if run.resume.is_none() {
            self.write_plan(ctx, &run.task).await?;
        }
        let command = claude_command(&run, ctx.user_email.as_deref())?;

        let started = Instant::now();
        let result = self
            .sandbox
            .exec_command(ctx, &command, Some(self.timeout.as_secs()))
            .await?;
        let duration = started.elapsed();
        if result.timed_out() {
            warn!(session = %ctx.session_id, "sub-agent hit its timeout");
        }
        Ok(format_result(&result.output, &run, duration))
    }
}
