//! Starts the external sentiment tool.
//!
//! Three invocation shapes are kept in one ordered chain. Each attempt owns its
//! own temporary prompt file through the returned [`ProcessHandle`], so the file
//! disappears together with the process whatever happens to the attempt.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::error::{PipelineError, PipelineResult};
use crate::config::agent_profile::ToolSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStrategy {
    /// Prompt written to a temp file which becomes the tool's stdin.
    TempFilePipe,
    /// Prompt passed as the last command-line argument.
    InlineArgument,
    /// Prompt (and payload) piped through `sh -c`.
    ShellPipe,
}

impl fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TempFilePipe => "temp-file pipe",
            Self::InlineArgument => "inline argument",
            Self::ShellPipe => "shell pipe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSchema {
    MarketSentiment,
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub prompt_text: String,
    /// Pre-existing file whose contents go to the tool's stdin.
    pub input_payload: Option<PathBuf>,
    pub schema_hint: ResultSchema,
}

impl InvocationRequest {
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            input_payload: None,
            schema_hint: ResultSchema::MarketSentiment,
        }
    }

    pub fn with_payload(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_payload = Some(path.into());
        self
    }

    fn prompt_chars(&self) -> usize {
        self.prompt_text.chars().count()
    }
}

/// One live subprocess plus the temp file feeding it.
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    strategy: LaunchStrategy,
    prompt_file: Option<NamedTempFile>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn strategy(&self) -> LaunchStrategy {
        self.strategy
    }

    pub fn prompt_file_path(&self) -> Option<&Path> {
        self.prompt_file.as_ref().map(|f| f.path())
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Sends the kill signal and reaps the process.
    pub async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("kill on pid {} ignored: {}", self.pid, e);
        }
    }

    /// Exit code, `None` when the process died from a signal.
    pub async fn wait(&mut self) -> PipelineResult<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // kill first; the temp file field is dropped (and deleted) right after
        let _ = self.child.start_kill();
        if let Some(file) = &self.prompt_file {
            debug!("🧹 Removing prompt file {}", file.path().display());
        }
    }
}

pub struct ProcessLauncher {
    tool: ToolSettings,
}

impl ProcessLauncher {
    pub fn new(tool: ToolSettings) -> Self {
        Self { tool }
    }

    /// Order in which the strategies are tried for this request. Long prompts go
    /// through a file first; short ones are passed inline first.
    pub fn strategy_chain(&self, request: &InvocationRequest) -> Vec<LaunchStrategy> {
        if request.prompt_chars() > self.tool.inline_threshold_chars {
            vec![
                LaunchStrategy::TempFilePipe,
                LaunchStrategy::InlineArgument,
                LaunchStrategy::ShellPipe,
            ]
        } else {
            vec![
                LaunchStrategy::InlineArgument,
                LaunchStrategy::TempFilePipe,
                LaunchStrategy::ShellPipe,
            ]
        }
    }

    pub fn launch(
        &self,
        strategy: LaunchStrategy,
        request: &InvocationRequest,
    ) -> PipelineResult<ProcessHandle> {
        debug!("launching {:?} request via {}", request.schema_hint, strategy);
        match strategy {
            LaunchStrategy::TempFilePipe => self.launch_with_file(request),
            LaunchStrategy::InlineArgument => self.launch_inline(request),
            LaunchStrategy::ShellPipe => self.launch_via_shell(request),
        }
    }

    fn launch_with_file(&self, request: &InvocationRequest) -> PipelineResult<ProcessHandle> {
        let strategy = LaunchStrategy::TempFilePipe;
        let mut file = tempfile::Builder::new()
            .prefix("sentiment_prompt_")
            .suffix(".txt")
            .tempfile()?;

        if let Some(payload) = &request.input_payload {
            let bytes = std::fs::read(payload)?;
            file.write_all(&bytes)?;
            if !bytes.ends_with(b"\n") {
                file.write_all(b"\n")?;
            }
        }
        file.write_all(request.prompt_text.as_bytes())?;
        file.flush()?;

        let stdin = file.reopen()?;
        info!(
            "📝 Prompt ({} chars) written to {}",
            request.prompt_chars(),
            file.path().display()
        );

        let mut cmd = self.base_command(&self.tool.command);
        cmd.args(&self.tool.args).stdin(Stdio::from(stdin));
        self.spawn(cmd, strategy, Some(file))
    }

    fn launch_inline(&self, request: &InvocationRequest) -> PipelineResult<ProcessHandle> {
        let strategy = LaunchStrategy::InlineArgument;
        if request.prompt_chars() > self.tool.inline_max_chars {
            return Err(PipelineError::StrategyUnavailable {
                strategy,
                reason: format!(
                    "prompt of {} chars exceeds inline limit {}",
                    request.prompt_chars(),
                    self.tool.inline_max_chars
                ),
            });
        }

        let stdin = match &request.input_payload {
            Some(payload) => Stdio::from(std::fs::File::open(payload)?),
            None => Stdio::null(),
        };

        // argv element, not a shell word: no quoting needed here
        let mut cmd = self.base_command(&self.tool.command);
        cmd.args(&self.tool.args).arg(&request.prompt_text).stdin(stdin);
        self.spawn(cmd, strategy, None)
    }

    fn launch_via_shell(&self, request: &InvocationRequest) -> PipelineResult<ProcessHandle> {
        let strategy = LaunchStrategy::ShellPipe;
        if cfg!(windows) {
            return Err(PipelineError::StrategyUnavailable {
                strategy,
                reason: "no POSIX shell on this platform".into(),
            });
        }

        let script = shell_script(&self.tool, request);
        let mut cmd = self.base_command("sh");
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        self.spawn(cmd, strategy, None)
    }

    fn base_command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(dir) = &self.tool.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(
        &self,
        mut cmd: Command,
        strategy: LaunchStrategy,
        prompt_file: Option<NamedTempFile>,
    ) -> PipelineResult<ProcessHandle> {
        // on failure prompt_file is dropped here, deleting it before the next attempt
        let child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                warn!("❌ External tool '{}' not found on PATH", self.tool.command);
            }
            PipelineError::ProcessSpawnFailed { strategy, source }
        })?;

        let pid = child.id().unwrap_or(0);
        info!("🚀 Spawned '{}' via {} (pid {})", self.tool.command, strategy, pid);

        Ok(ProcessHandle {
            child,
            pid,
            strategy,
            prompt_file,
        })
    }
}

/// Wraps `s` in single quotes for `sh`, escaping embedded single quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn shell_script(tool: &ToolSettings, request: &InvocationRequest) -> String {
    let producer = format!("printf '%s' {}", shell_quote(&request.prompt_text));
    let producer = match &request.input_payload {
        Some(payload) => format!(
            "{{ cat {}; echo; {}; }}",
            shell_quote(&payload.to_string_lossy()),
            producer
        ),
        None => producer,
    };

    let consumer = std::iter::once(&tool.command)
        .chain(tool.args.iter())
        .map(|part| shell_quote(part))
        .collect::<Vec<_>>()
        .join(" ");

    format!("{} | {}", producer, consumer)
}
