use std::path::PathBuf;
use std::process::Stdio;

use serde_json::json;
use sprint_core::EventBus;
use sprint_store::StateStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::parser::{parse_csv_log_line, parse_ldjson_line, StreamRecord};

/// Fixed base arguments identifying the streaming protocol. See the
/// subagent invocation contract.
const BASE_ARGS: &[&str] = &["-p", "--output-format", "stream-json"];

pub struct RunRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub injection: Option<String>,
    pub cwd: PathBuf,
}

pub struct RunOutcome {
    pub stdout: String,
    pub exit_code: Option<i32>,
}

/// Dependencies the runner needs to log and broadcast structured records it
/// extracts from a subagent's tool-result output, independent of whether
/// the lines came from a real child process or a synthetic test fixture.
pub struct RunContext<'a> {
    pub store: &'a StateStore,
    pub bus: &'a EventBus,
    pub batch_id: i64,
}

pub struct SubagentRunner {
    binary: String,
}

impl SubagentRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args: Vec<String> = BASE_ARGS.iter().map(|s| s.to_string()).collect();
        if let Some(model) = &request.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(injection) = &request.injection {
            args.push("--prompt-system-append".to_string());
            args.push(injection.clone());
        }
        args
    }

    /// Spawns the subagent, writes `request.prompt` to stdin and closes it,
    /// then consumes stdout as LDJSON until EOF. The caller decides whether
    /// to await this directly (foreground) or hand the future to a tracked
    /// background task (fire-and-forget); this method itself always runs to
    /// completion.
    pub async fn run(&self, request: &RunRequest, ctx: &RunContext<'_>) -> anyhow::Result<RunOutcome> {
        let mut child = Command::new(&self.binary)
            .args(self.build_args(request))
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        if let Err(err) = stdin.write_all(request.prompt.as_bytes()).await {
            let _ = child.kill().await;
            return Err(anyhow::anyhow!("failed to write subagent stdin: {err}"));
        }
        if let Err(err) = stdin.shutdown().await {
            let _ = child.kill().await;
            return Err(anyhow::anyhow!("failed to close subagent stdin: {err}"));
        }
        drop(stdin);

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut lines = BufReader::new(stdout).lines();
        let mut aggregate = String::new();

        while let Some(line) = lines.next_line().await? {
            handle_line(&line, ctx, &mut aggregate);
        }

        let status = child.wait().await?;
        Ok(RunOutcome {
            stdout: aggregate,
            exit_code: status.code(),
        })
    }
}

/// Processes one line of subagent stdout: accumulates assistant text into
/// `aggregate` and, for tool-result lines, attempts CSV task-record
/// extraction, logging and broadcasting any accepted record. Exposed
/// separately from `run` so tests can drive it with synthetic lines without
/// spawning a child process.
pub fn handle_line(line: &str, ctx: &RunContext<'_>, aggregate: &mut String) {
    let Some(record) = parse_ldjson_line(line) else {
        return;
    };
    match record {
        StreamRecord::AssistantText(text) => aggregate.push_str(&text),
        StreamRecord::ToolResult(content) => {
            let now = chrono::Utc::now().timestamp();
            for csv_line in content.lines() {
                if let Some(task_record) = parse_csv_log_line(csv_line, now) {
                    if let Err(err) = ctx.store.create_event(
                        ctx.batch_id,
                        None,
                        None,
                        task_record.timestamp * 1000,
                        task_record.event_type(),
                        Some(&task_record.epic_id),
                        Some(&task_record.story_key),
                        Some(&task_record.command),
                        Some(&task_record.task_id),
                        Some(&task_record.status),
                        Some(&task_record.message),
                        None,
                    ) {
                        tracing::warn!(error = %err, "failed to persist task event");
                    }
                    ctx.bus.emit(
                        task_record.event_type(),
                        json!({
                            "story_key": task_record.story_key,
                            "command": task_record.command,
                            "task_id": task_record.task_id,
                            "status": task_record.status,
                            "message": task_record.message,
                        }),
                    );
                }
            }
        }
        StreamRecord::Other => {}
    }
}
