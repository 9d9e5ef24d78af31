//! File editing tools. Content travels through the exec's stdin as JSON, so
//! neither size nor quoting is a concern.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{
    backend::SessionSandbox,
    context::ToolContext,
    error::{Result, parse_params},
    registry::SandboxTool,
};

const STR_REPLACE_SCRIPT: &str = r#"
import sys
import json

try:
    data = json.loads(sys.stdin.read())
    path = data['path']
    old_str = data['old_str']
    new_str = data['new_str']

    with open(path, 'r') as f:
        content = f.read()

    if old_str not in content:
        print(f"Error: old_str not found in {path}")
        sys.exit(1)

    with open(path, 'w') as f:
        f.write(content.replace(old_str, new_str, 1))

    print(f"Successfully replaced text in {path}")
except Exception as e:
    print(f"Error: {e}")
    sys.exit(1)
"#;

const CREATE_FILE_SCRIPT: &str = r#"
import sys
import json
import os

try:
    data = json.loads(sys.stdin.read())
    path = data['path']
    parent = os.path.dirname(path)
    if parent:
        os.makedirs(parent, exist_ok=True)

    with open(path, 'w') as f:
        f.write(data['file_text'])

    print(f"Successfully created {path}")
except Exception as e:
    print(f"Error: {e}")
    sys.exit(1)
"#;

fn python(script: &str) -> Vec<String> {
    vec!["python3".into(), "-c".into(), script.into()]
}

#[derive(Debug, Deserialize, Serialize)]
struct StrReplaceParams {
    path: String,
    old_str: String,
    #[serde(default)]
    new_str: String,
}

/// Replaces the first occurrence of a string in a file.
pub struct StrReplaceTool {
    sandbox: Arc<dyn SessionSandbox>,
}

impl StrReplaceTool {
    #[must_use]
    pub fn new(sandbox: Arc<dyn SessionSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl SandboxTool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace a unique string in a file with another string. The string to replace must appear exactly once in the file."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Why I'm making this edit"},
                "path": {"type": "string", "description": "Path to the file to edit"},
                "old_str": {"type": "string", "description": "String to replace (must be unique in file)"},
                "new_str": {"type": "string", "description": "String to replace with (empty to delete)"}
            },
            "required": ["description", "path", "old_str"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String> {
        let params: StrReplaceParams = parse_params(params)?;
        if params.old_str == params.new_str {
            return Ok(
                "Error: old_str and new_str are identical. No changes would be made.".into(),
            );
        }
        let payload = serde_json::to_vec(&params)?;
        let result = self
            .sandbox
            .exec_with_input(ctx, &python(STR_REPLACE_SCRIPT), &payload)
            .await?;
        Ok(result.into_display())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateFileParams {
    path: String,
    file_text: String,
}

/// Writes a file, creating parent directories.
pub struct CreateFileTool {
    sandbox: Arc<dyn SessionSandbox>,
}

impl CreateFileTool {
    #[must_use]
    pub fn new(sandbox: Arc<dyn SessionSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl SandboxTool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with content in the container."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Why I'm creating this file"},
                "file_text": {"type": "string", "description": "Content to write to the file"},
                "path": {"type": "string", "description": "Path to the file to create"}
            },
            "required": ["description", "file_text", "path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String> {
        let params: CreateFileParams = parse_params(params)?;
        let payload = serde_json::to_vec(&params)?;
        let result = self
            .sandbox
            .exec_with_input(ctx, &python(CREATE_FILE_SCRIPT), &payload)
            .await?;
        if result.success || result.output.starts_with("Error: ") {
            Ok(result.output)
        } else {
            Ok(format!("Error: {}", result.output))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{Call, ScriptedSandbox},
        cubicle_common::ExecutionResult,
    };

    fn payload_of(call: &Call) -> Value {
        match call {
            Call::Input { payload, .. } => serde_json::from_slice(payload).unwrap(),
            Call::Command { .. } => panic!("expected stdin exec"),
        }
    }

    #[tokio::test]
    async fn identical_strings_are_rejected_without_exec() {
        let sandbox = ScriptedSandbox::replying("");
        let out = StrReplaceTool::new(sandbox.clone())
            .execute(
                &ToolContext::new("c"),
                serde_json::json!({"path": "/a", "old_str": "x", "new_str": "x", "description": "d"}),
            )
            .await
            .unwrap();
        assert!(out.starts_with("Error: old_str and new_str are identical"));
        assert!(sandbox.calls().is_empty());
    }

    #[tokio::test]
    async fn str_replace_sends_json_over_stdin() {
        let sandbox = ScriptedSandbox::replying("Successfully replaced text in /a.txt");
        let out = StrReplaceTool::new(sandbox.clone())
            .execute(
                &ToolContext::new("c"),
                serde_json::json!({
                    "path": "/a.txt",
                    "old_str": "it's \"quoted\"\n$HOME",
                    "description": "delete"
                }),
            )
            .await
            .unwrap();
        assert_eq!(out, "Successfully replaced text in /a.txt");

        let calls = sandbox.calls();
        let Call::Input { program, .. } = &calls[0] else {
            panic!("expected stdin exec");
        };
        assert_eq!(program[..2], ["python3", "-c"]);
        assert!(program[2].contains("content.replace(old_str, new_str, 1)"));
        let payload = payload_of(&calls[0]);
        assert_eq!(payload["old_str"], "it's \"quoted\"\n$HOME");
        assert_eq!(payload["new_str"], "");
    }

    #[tokio::test]
    async fn str_replace_passes_script_errors_through() {
        let sandbox = ScriptedSandbox::new(|_| {
            ExecutionResult::new(1, "Error: old_str not found in /a.txt".into())
        });
        let out = StrReplaceTool::new(sandbox)
            .execute(
                &ToolContext::new("c"),
                serde_json::json!({"path": "/a.txt", "old_str": "zzz", "description": "d"}),
            )
            .await
            .unwrap();
        assert_eq!(out, "Error: old_str not found in /a.txt");
    }

    #[tokio::test]
    async fn create_file_large_content() {
        let sandbox = ScriptedSandbox::replying("Successfully created /out/big.txt");
        let text = "line\n".repeat(200_000);
        let out = CreateFileTool::new(sandbox.clone())
            .execute(
                &ToolContext::new("c"),
                serde_json::json!({"path": "/out/big.txt", "file_text": text, "description": "d"}),
            )
            .await
            .unwrap();
        assert_eq!(out, "Successfully created /out/big.txt");
        let payload = payload_of(&sandbox.calls()[0]);
        assert_eq!(payload["file_text"].as_str().map(str::len), Some(1_000_000));
    }

    #[tokio::test]
    async fn create_file_failure_is_prefixed() {
        let sandbox = ScriptedSandbox::new(|_| {
            ExecutionResult::failed("Connection to container engine failed")
        });
        let out = CreateFileTool::new(sandbox)
            .execute(
                &ToolContext::new("c"),
                serde_json::json!({"path": "/a", "file_text": "", "description": "d"}),
            )
            .await
            .unwrap();
        assert_eq!(out, "Error: Connection to container engine failed");
    }
}
