//! Turns the tool's NDJSON event log into a response candidate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use super::error::{PipelineError, PipelineResult};
use super::launcher::ProcessHandle;
use super::record::RECOGNIZED_FIELDS;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("invalid ANSI regex"));

const STDERR_KEEP_BYTES: usize = 16 * 1024;
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Removes ESC-bracket (CSI) sequences: colors, cursor moves, line clears.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Metadata,
    Completion,
    Text,
    Say,
    Reasoning,
    Ask,
    Heartbeat,
    Unknown,
}

/// One decoded line of the event stream.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: EventKind,
    pub content: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    /// `say` or `ask` sub-kind.
    pub sub_kind: Option<String>,
}

impl EventRecord {
    /// Returns `None` when the line is not a single JSON object.
    pub fn parse(line: &str) -> Option<Self> {
        let Value::Object(mut obj) = serde_json::from_str::<Value>(line).ok()? else {
            return None;
        };

        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);
        let metadata = match obj.remove("metadata") {
            Some(Value::Object(m)) => Some(m),
            _ => None,
        };
        let event_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
        let say = obj.get("say").and_then(Value::as_str);
        let ask = obj.get("ask").and_then(Value::as_str);

        let (kind, sub_kind) = if metadata.as_ref().map_or(false, looks_like_verdict) {
            (EventKind::Metadata, None)
        } else {
            match event_type {
                "completion_result" => (EventKind::Completion, None),
                "text" => (EventKind::Text, None),
                "reasoning" => (EventKind::Reasoning, None),
                "heartbeat" | "ping" | "keepalive" => (EventKind::Heartbeat, None),
                "ask" => (EventKind::Ask, ask.map(str::to_string)),
                "say" => match say {
                    Some("reasoning") => (EventKind::Reasoning, Some("reasoning".to_string())),
                    Some("completion_result") => {
                        (EventKind::Completion, Some("completion_result".to_string()))
                    }
                    other => (EventKind::Say, other.map(str::to_string)),
                },
                _ if metadata.is_some() => (EventKind::Metadata, None),
                _ => (EventKind::Unknown, None),
            }
        };

        Some(Self {
            kind,
            content,
            metadata,
            sub_kind,
        })
    }

    /// Metadata that already carries verdict fields.
    pub fn has_verdict_metadata(&self) -> bool {
        self.metadata.as_ref().map_or(false, looks_like_verdict)
    }

    fn non_empty_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

pub fn looks_like_verdict(fields: &Map<String, Value>) -> bool {
    RECOGNIZED_FIELDS.iter().any(|f| fields.contains_key(*f))
}

/// Provenance of the chosen blob. Variant order is the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    RawOutput,
    RawLine,
    Say,
    Text,
    CompletionResult,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCandidate {
    pub source: CandidateSource,
    pub text: String,
}

/// What the caller should do after a line was fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A terminal candidate was captured.
    Complete,
    /// The tool asks for confirmation and would block forever.
    ConfirmationRequested,
}

/// Candidates in the order the extractor should try them.
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    pub candidates: Vec<ResponseCandidate>,
    pub exit_code: Option<i32>,
    pub terminated_early: bool,
}

impl DecodedResponse {
    pub fn primary(&self) -> Option<&ResponseCandidate> {
        self.candidates.first()
    }
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    candidate: Option<ResponseCandidate>,
    stray_lines: Vec<String>,
    raw: String,
    lines_seen: usize,
    pending: Vec<u8>,
    halted: Option<Flow>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds an arbitrary chunk of stdout; complete lines are decoded as they
    /// appear and the remainder is buffered.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Flow {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let flow = self.feed_line(&String::from_utf8_lossy(&line));
            if flow != Flow::Continue {
                return flow;
            }
        }
        Flow::Continue
    }

    /// Decodes one line. Once a terminal flow was returned every later line is
    /// ignored and the same flow is returned again.
    pub fn feed_line(&mut self, raw_line: &str) -> Flow {
        if let Some(flow) = self.halted {
            return flow;
        }

        let cleaned = strip_ansi(raw_line);
        let line = cleaned.trim();
        if line.is_empty() {
            return Flow::Continue;
        }
        self.lines_seen += 1;

        let Some(event) = EventRecord::parse(line) else {
            self.keep_raw(line);
            if line.contains('{') {
                debug!("non-event line kept as raw JSON candidate ({} chars)", line.len());
                self.stray_lines.push(line.to_string());
            }
            return Flow::Continue;
        };

        let flow = match event.kind {
            EventKind::Metadata if event.has_verdict_metadata() => {
                let fields = event.metadata.unwrap_or_default();
                self.offer(CandidateSource::Metadata, Value::Object(fields).to_string());
                info!("📦 Verdict found in event metadata");
                Flow::Complete
            }
            EventKind::Completion => match event.non_empty_content() {
                Some(content) => {
                    self.offer(CandidateSource::CompletionResult, content.to_string());
                    info!("🏁 completion_result captured");
                    Flow::Complete
                }
                None => Flow::Continue,
            },
            EventKind::Text => {
                if let Some(content) = event.non_empty_content() {
                    self.offer(CandidateSource::Text, content.to_string());
                }
                Flow::Continue
            }
            EventKind::Say => {
                if let Some(content) = event.non_empty_content() {
                    self.offer(CandidateSource::Say, content.to_string());
                }
                Flow::Continue
            }
            EventKind::Ask if event.sub_kind.as_deref() == Some("completion_result") => {
                info!("✋ Tool is asking to confirm completion, stopping it");
                Flow::ConfirmationRequested
            }
            EventKind::Metadata | EventKind::Unknown => {
                self.keep_raw(line);
                Flow::Continue
            }
            // drafts and keepalives never reach the fallback text
            EventKind::Ask | EventKind::Reasoning | EventKind::Heartbeat => Flow::Continue,
        };

        if flow != Flow::Continue {
            self.halted = Some(flow);
        }
        flow
    }

    fn keep_raw(&mut self, line: &str) {
        self.raw.push_str(line);
        self.raw.push('\n');
    }

    // The tool sends full snapshots, so an equal-priority event replaces the old one.
    fn offer(&mut self, source: CandidateSource, text: String) {
        let replace = self
            .candidate
            .as_ref()
            .map_or(true, |current| source >= current.source);
        if replace {
            debug!("candidate <- {:?} ({} chars)", source, text.len());
            self.candidate = Some(ResponseCandidate { source, text });
        }
    }

    pub fn candidate(&self) -> Option<&ResponseCandidate> {
        self.candidate.as_ref()
    }

    /// Closes the stream. Fails only when nothing usable came out and the
    /// process reported an error.
    pub fn finish(
        mut self,
        exit_code: Option<i32>,
        terminated_early: bool,
        stderr: &str,
    ) -> PipelineResult<DecodedResponse> {
        let tail = std::mem::take(&mut self.pending);
        match self.halted {
            Some(flow) if !tail.is_empty() => {
                debug!("dropping {} bytes read after {:?}", tail.len(), flow);
            }
            _ => {
                for line in String::from_utf8_lossy(&tail).lines() {
                    if self.feed_line(line) != Flow::Continue {
                        break;
                    }
                }
            }
        }

        let captured = self.candidate.take();
        let undecoded = captured.is_none() && !self.raw.trim().is_empty();
        let mut candidates: Vec<ResponseCandidate> = captured.into_iter().collect();
        candidates.extend(self.stray_lines.into_iter().rev().map(|text| ResponseCandidate {
            source: CandidateSource::RawLine,
            text,
        }));
        if undecoded {
            candidates.push(ResponseCandidate {
                source: CandidateSource::RawOutput,
                text: self.raw,
            });
        }

        if candidates.is_empty() {
            let failed = !terminated_early && exit_code != Some(0);
            return Err(if failed {
                PipelineError::ProcessExitedWithError {
                    code: exit_code,
                    stderr: stderr.trim().chars().take(500).collect(),
                }
            } else {
                PipelineError::NoRecoverablePayload("tool produced no output".into())
            });
        }

        if exit_code != Some(0) && !terminated_early {
            warn!(
                "⚠️ Tool exited with {:?} but output was captured; using it",
                exit_code
            );
        }
        debug!(
            "decoded {} event lines into {} candidates",
            self.lines_seen,
            candidates.len()
        );

        Ok(DecodedResponse {
            candidates,
            exit_code,
            terminated_early,
        })
    }
}

/// Reads the process output until the decoder is satisfied or the stream ends.
///
/// stderr is drained on its own task so a chatty tool cannot block on a full
/// pipe while stdout is being read. A process that is still alive once a
/// terminal candidate is known gets killed.
pub async fn decode_process(handle: &mut ProcessHandle) -> PipelineResult<DecodedResponse> {
    let stdout = handle
        .take_stdout()
        .ok_or_else(|| PipelineError::NoRecoverablePayload("stdout not captured".into()))?;
    let stderr_task = handle.take_stderr().map(|stderr| tokio::spawn(drain_stderr(stderr)));

    debug!("reading {} output of pid {}", handle.strategy(), handle.pid());
    let mut decoder = StreamDecoder::new();
    let flow = read_events(stdout, &mut decoder).await?;

    let terminated_early = flow != Flow::Continue;
    if terminated_early {
        debug!("{:?} on pid {}, stopping it", flow, handle.pid());
        handle.terminate().await;
    }
    let exit_code = handle.wait().await?;

    let stderr = match stderr_task {
        // stray grandchildren may keep the pipe open after a kill
        Some(task) if terminated_early => {
            task.abort();
            String::new()
        }
        Some(task) => tokio::time::timeout(STDERR_GRACE, task)
            .await
            .ok()
            .and_then(|joined| joined.ok())
            .unwrap_or_default(),
        None => String::new(),
    };

    decoder.finish(exit_code, terminated_early, &stderr)
}

/// Line loop shared by the process driver and tests. Returns the flow that
/// ended it; `Flow::Continue` means end of stream.
pub async fn read_events<R>(reader: R, decoder: &mut StreamDecoder) -> PipelineResult<Flow>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(Flow::Continue);
        }
        let flow = decoder.feed_bytes(&buf);
        if flow != Flow::Continue {
            return Ok(flow);
        }
    }
}

async fn drain_stderr<R>(stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut collected = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                debug!("[tool stderr] {}", line.trim_end());
                if collected.len() < STDERR_KEEP_BYTES {
                    collected.push_str(&line);
                }
            }
        }
    }
    collected
}
