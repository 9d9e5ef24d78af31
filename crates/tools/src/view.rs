use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
};

use crate::{
    backend::SessionSandbox,
    context::ToolContext,
    error::{Error, Result, parse_params},
    registry::SandboxTool,
};

/// Outputs longer than this (in chars) are cut unless a range was asked for.
const MAX_OUTPUT_CHARS: usize = 16_000;
const KEEP_CHARS: usize = 8_000;

/// Extensions `cat` would mangle, with what to do instead. `{path}` is
/// replaced by the requested path.
const BINARY_HINTS: &[(&str, &str)] = &[
    (".xlsx", "Excel spreadsheet. Read SKILL first:\n  view /mnt/skills/public/xlsx/SKILL.md"),
    (".xls", "Excel spreadsheet (old). Read SKILL first:\n  view /mnt/skills/public/xlsx/SKILL.md"),
    (".docx", "Word document. Read SKILL first:\n  view /mnt/skills/public/docx/SKILL.md"),
    (".pptx", "PowerPoint. Read SKILL first:\n  view /mnt/skills/public/pptx/SKILL.md"),
    (".pdf", "PDF document. Read SKILL first:\n  view /mnt/skills/public/pdf/SKILL.md"),
    (".zip", "ZIP archive. Use: unzip -l {path}"),
    (".tar", "TAR archive. Use: tar -tvf {path}"),
    (".gz", "Gzip file. Use: gunzip -c {path} | head -n 100"),
    (".jpg", "JPEG image. This is a binary file."),
    (".jpeg", "JPEG image. This is a binary file."),
    (".png", "PNG image. This is a binary file."),
    (".gif", "GIF image. This is a binary file."),
    (".bmp", "Bitmap image. This is a binary image file."),
    (".tiff", "TIFF image. This is a binary image file."),
    (".mp4", "MP4 video. This is a binary video file."),
    (".avi", "AVI video. This is a binary video file."),
    (".mkv", "MKV video. This is a binary video file."),
];

#[derive(Debug, Deserialize)]
struct ViewParams {
    path: String,
    #[serde(default)]
    view_range: Option<Vec<i64>>,
}

/// Line range for `sed -n`. `end == None` reads to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineRange {
    start: u64,
    end: Option<u64>,
}

impl LineRange {
    fn parse(raw: &[i64]) -> Result<Self> {
        let [start, end] = raw else {
            return Err(Error::invalid_params(
                "view_range must be [start_line, end_line]",
            ));
        };
        let start = u64::try_from(*start)
            .ok()
            .filter(|s| *s >= 1)
            .ok_or_else(|| Error::invalid_params("view_range start must be >= 1"))?;
        let end = match *end {
            -1 => None,
            e => Some(
                u64::try_from(e)
                    .ok()
                    .filter(|e| *e >= start)
                    .ok_or_else(|| {
                        Error::invalid_params("view_range end must be -1 or >= start")
                    })?,
            ),
        };
        Ok(Self { start, end })
    }

    fn sed_expr(self) -> String {
        match self.end {
            Some(end) => format!("{},{end}p", self.start),
            None => format!("{},$p", self.start),
        }
    }
}

fn binary_hint(path: &str) -> Option<(&'static str, String)> {
    let lower = path.to_lowercase();
    BINARY_HINTS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(ext, hint)| (*ext, hint.replace("{path}", path)))
}

/// Shell script that lists a directory, prints a file, or explains why not.
fn view_script(path: &str, range: Option<LineRange>) -> Result<String> {
    let quoted = shlex::try_quote(path).map_err(|e| Error::invalid_params(e.to_string()))?;
    let file_branch = match binary_hint(path) {
        Some((ext, hint)) => {
            let message = format!(
                "Error: Cannot view binary file with 'cat'. This is a {ext} file.\n\n{hint}"
            );
            let message =
                shlex::try_quote(&message).map_err(|e| Error::invalid_params(e.to_string()))?;
            format!("printf '%s\\n' {message}; exit 1")
        },
        None => match range {
            Some(range) => format!("sed -n '{}' {quoted} | cat -n", range.sed_expr()),
            None => format!("cat -n {quoted}"),
        },
    };
    Ok(format!(
        "if [ -f {quoted} ]; then\n    {file_branch}\nelif [ -d {quoted} ]; then\n    ls -lah {quoted}\nelse\n    echo \"Error: path not found\"\n    exit 1\nfi"
    ))
}

/// Keep the first and last [`KEEP_CHARS`] characters of an oversized output.
fn truncate_middle(output: String) -> String {
    let total = output.chars().count();
    if total <= MAX_OUTPUT_CHARS {
        return output;
    }
    let head: String = output.chars().take(KEEP_CHARS).collect();
    let tail: String = output.chars().skip(total - KEEP_CHARS).collect();
    format!(
        "{head}\n\n... [File truncated - middle omitted. Total: {total} chars. Use view_range.] ...\n\n{tail}"
    )
}

/// Shows text files with line numbers, or lists directories.
pub struct ViewTool {
    sandbox: Arc<dyn SessionSandbox>,
}

impl ViewTool {
    #[must_use]
    pub fn new(sandbox: Arc<dyn SessionSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl SandboxTool for ViewTool {
    fn name(&self) -> &str {
        "view"
    }

    fn description(&self) -> &str {
        "View text files or directory listings. Binary files are rejected with instructions to read the matching SKILL documentation."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Why I need to view this"},
                "path": {"type": "string", "description": "Absolute path to file or directory"},
                "view_range": {
                    "type": "array",
                    "items": {"type": "integer"},
                    "minItems": 2,
                    "maxItems": 2,
                    "description": "Optional line range [start_line, end_line]. Use [start, -1] to view from start to end."
                }
            },
            "required": ["description", "path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<String> {
        let params: ViewParams = parse_params(params)?;
        let range = params
            .view_range
            .as_deref()
            .map(LineRange::parse)
            .transpose()?;
        let script = view_script(&params.path, range)?;
        let result = self.sandbox.exec_command(ctx, &script, None).await?;
        let output = if result.output.is_empty() {
            "Error: No output".to_string()
        } else {
            result.output
        };
        Ok(if range.is_some() {
            output
        } else {
            truncate_middle(output)
        })
    }
}
