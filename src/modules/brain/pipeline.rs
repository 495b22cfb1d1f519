use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::decoder::{decode_process, looks_like_verdict, CandidateSource, DecodedResponse};
use super::error::{PipelineError, PipelineResult};
use super::extractor;
use super::heuristic;
use super::launcher::{InvocationRequest, LaunchStrategy, ProcessLauncher};
use super::prompt::build_prompt;
use super::record::{Provenance, SentimentRecord};
use super::validator;
use crate::config::agent_profile::ToolSettings;
use crate::modules::perception::NewsRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Invoking,
    Streaming,
    Extracting,
    Validating,
    Done,
    TimedOut,
}

#[derive(Debug)]
struct StateTrack(PipelineState);

impl StateTrack {
    fn advance(&mut self, next: PipelineState) {
        debug!("pipeline {:?} -> {:?}", self.0, next);
        self.0 = next;
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub record: SentimentRecord,
    pub provenance: Provenance,
}

/// Drives the external tool end to end and always comes back with a verdict.
pub struct SentimentPipeline {
    launcher: ProcessLauncher,
    deadline: Duration,
}

impl SentimentPipeline {
    pub fn new(tool: ToolSettings) -> Self {
        let deadline = tool.deadline();
        Self {
            launcher: ProcessLauncher::new(tool),
            deadline,
        }
    }

    /// Never fails. Empty input short-circuits to the "not available" verdict;
    /// any tool failure (spawn, exit status, timeout, unreadable output) falls
    /// back to the keyword heuristic.
    pub async fn analyze(&self, news: &[NewsRecord]) -> AnalysisOutcome {
        if news.is_empty() {
            info!("📭 No headlines to analyze");
            return AnalysisOutcome {
                record: SentimentRecord::not_available("No news data from any source"),
                provenance: Provenance::Unavailable,
            };
        }

        let request = InvocationRequest::new(build_prompt(news));
        match self.invoke(&request).await {
            Ok((record, provenance)) => {
                info!(
                    "✅ Verdict {} ({:?}) via {}",
                    record.sentiment, record.score, provenance.method_name()
                );
                AnalysisOutcome { record, provenance }
            }
            Err(e) => {
                warn!("⚠️ External analysis unusable ({}). Falling back to keyword heuristic.", e);
                AnalysisOutcome {
                    record: heuristic::analyze(news),
                    provenance: Provenance::Heuristic { reason: e.to_string() },
                }
            }
        }
    }

    /// One deadline covers every strategy attempt. When it fires, the attempt's
    /// future is dropped, which kills the child and removes its prompt file.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> PipelineResult<(SentimentRecord, Provenance)> {
        let mut state = StateTrack(PipelineState::Idle);
        let result = tokio::time::timeout(self.deadline, self.run_strategies(request, &mut state)).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                state.advance(PipelineState::TimedOut);
                Err(PipelineError::ProcessTimedOut(self.deadline))
            }
        }
    }

    async fn run_strategies(
        &self,
        request: &InvocationRequest,
        state: &mut StateTrack,
    ) -> PipelineResult<(SentimentRecord, Provenance)> {
        let mut last_error = None;
        for strategy in self.launcher.strategy_chain(request) {
            match self.attempt(strategy, request, state).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    warn!("❌ Strategy {} failed: {}", strategy, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| PipelineError::NoRecoverablePayload("no launch strategy".into())))
    }

    async fn attempt(
        &self,
        strategy: LaunchStrategy,
        request: &InvocationRequest,
        state: &mut StateTrack,
    ) -> PipelineResult<(SentimentRecord, Provenance)> {
        state.advance(PipelineState::Invoking);
        let mut handle = self.launcher.launch(strategy, request)?;

        state.advance(PipelineState::Streaming);
        let decoded = decode_process(&mut handle).await?;
        drop(handle);

        state.advance(PipelineState::Extracting);
        let (value, source) = pick_payload(&decoded)?;

        state.advance(PipelineState::Validating);
        let record = validator::normalize(&value);

        state.advance(PipelineState::Done);
        Ok((record, Provenance::ExternalTool { strategy, source }))
    }
}

/// First candidate that yields an object. Objects dug out of undifferentiated
/// output must carry at least one verdict field, otherwise any stray event
/// line would pass.
fn pick_payload(decoded: &DecodedResponse) -> PipelineResult<(Value, CandidateSource)> {
    let mut last_error = None;
    for candidate in &decoded.candidates {
        match extractor::extract(&candidate.text) {
            Ok(value) if is_acceptable(candidate.source, &value) => {
                debug!("payload taken from {:?} candidate", candidate.source);
                return Ok((value, candidate.source));
            }
            Ok(_) => debug!("{:?} candidate held no verdict fields", candidate.source),
            Err(e) => {
                debug!("{:?} candidate: {}", candidate.source, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        PipelineError::NoRecoverablePayload("no candidate carried verdict fields".into())
    }))
}

fn is_acceptable(source: CandidateSource, value: &Value) -> bool {
    match source {
        CandidateSource::RawOutput | CandidateSource::RawLine => {
            value.as_object().map_or(false, looks_like_verdict)
        }
        _ => true,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::modules::brain::record::{RiskLevel, Sentiment};
    use chrono::Utc;
    use std::path::Path;
    use std::time::Instant;

    fn headlines() -> Vec<NewsRecord> {
        vec![
            NewsRecord::new("Stocks rally after Fed rate cut", "CNBC", "https://x/1", Utc::now()),
            NewsRecord::new("Bitcoin jumps to record", "ZeroHedge", "https://x/2", Utc::now()),
        ]
    }

    // Run through `sh` so the script never has to be executable.
    fn pipeline_for(script: &Path, deadline_sec: u64) -> SentimentPipeline {
        SentimentPipeline::new(ToolSettings {
            command: "sh".into(),
            args: vec![script.to_string_lossy().into_owned()],
            deadline_sec,
            ..ToolSettings::default()
        })
    }

    fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("tool.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn completion_result_payload_wins_over_reasoning() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"cat > /dev/null
printf '%s\n' '{"type":"say","say":"reasoning","content":"thinking... {\"sentiment\":\"BEARISH\"}"}'
printf '%s\n' '{"type":"completion_result","content":"{\"sentiment\":\"BULLISH\",\"score\":60,\"catalysts\":[\"Fed cut\"],\"risk_level\":\"LOW\",\"summary\":\"ok\"}"}'
sleep 30
"#,
        );
        let started = Instant::now();
        let outcome = pipeline_for(&script, 20).analyze(&headlines()).await;

        assert_eq!(outcome.record.sentiment, Sentiment::Bullish);
        assert_eq!(outcome.record.score, Some(60));
        assert_eq!(outcome.record.catalysts, vec!["Fed cut"]);
        assert_eq!(outcome.record.risk_level, RiskLevel::Low);
        assert_eq!(outcome.record.summary, "ok");
        assert_eq!(
            outcome.provenance,
            Provenance::ExternalTool {
                strategy: LaunchStrategy::InlineArgument,
                source: CandidateSource::CompletionResult,
            }
        );
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn confirmation_prompt_keeps_the_text_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo '{"type":"text","content":"Here you go: {\"sentiment\":\"bearish\",\"score\":-20,\"risk_level\":\"high\"}"}'
printf '%s\n' '{"type":"ask","ask":"completion_result","content":""}'
sleep 30
"#,
        );
        let started = Instant::now();
        let outcome = pipeline_for(&script, 20).analyze(&headlines()).await;

        assert_eq!(outcome.record.sentiment, Sentiment::Bearish);
        assert_eq!(outcome.record.score, Some(-20));
        assert!(matches!(
            outcome.provenance,
            Provenance::ExternalTool { source: CandidateSource::Text, .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_beats_a_failing_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"printf '\033[32m{"sentiment":"NEUTRAL","score":5,"catalysts":[],"risk_level":"MEDIUM","summary":"calm"}\033[0m\n'
exit 1
"#,
        );
        let outcome = pipeline_for(&script, 20).analyze(&headlines()).await;
        assert_eq!(outcome.record.sentiment, Sentiment::Neutral);
        assert_eq!(outcome.record.summary, "calm");
        assert!(matches!(outcome.provenance, Provenance::ExternalTool { .. }));
    }

    #[tokio::test]
    async fn silent_failure_falls_back_to_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'model overloaded' >&2\nexit 3\n");
        let outcome = pipeline_for(&script, 20).analyze(&headlines()).await;

        assert_eq!(outcome.record.sentiment, Sentiment::Bullish);
        assert!(outcome.record.summary.starts_with("Pattern-based analysis"));
        match outcome.provenance {
            Provenance::Heuristic { reason } => assert!(reason.contains("model overloaded"), "{}", reason),
            other => panic!("unexpected provenance {:?}", other),
        }
    }

    #[tokio::test]
    async fn deadline_kills_the_tool_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'still thinking'\nsleep 30\n");
        let started = Instant::now();
        let outcome = pipeline_for(&script, 1).analyze(&headlines()).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.record.is_available());
        assert_eq!(
            outcome.provenance,
            Provenance::Heuristic {
                reason: PipelineError::ProcessTimedOut(Duration::from_secs(1)).to_string()
            }
        );
    }

    #[tokio::test]
    async fn completion_without_payload_ignores_reasoning_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"printf '%s\n' '{"type":"say","say":"reasoning","content":"draft: {\"sentiment\":\"BEARISH\",\"score\":-90,\"risk_level\":\"HIGH\",\"summary\":\"draft\"}"}'
printf '%s\n' '{"type":"completion_result","content":"Analysis complete."}'
"#,
        );
        let outcome = pipeline_for(&script, 20).analyze(&headlines()).await;

        assert_eq!(outcome.record.sentiment, Sentiment::Bullish);
        assert_ne!(outcome.record.score, Some(-90));
        assert!(outcome.record.summary.starts_with("Pattern-based analysis"));
        assert_eq!(outcome.provenance.method_name(), "keyword_heuristic");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn deadline_removes_the_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("stdin_path");
        let script = write_script(
            dir.path(),
            &format!("readlink /proc/$$/fd/0 > '{}'\nsleep 30\n", seen.display()),
        );
        let pipeline = SentimentPipeline::new(ToolSettings {
            command: "sh".into(),
            args: vec![script.to_string_lossy().into_owned()],
            inline_threshold_chars: 0,
            deadline_sec: 2,
            ..ToolSettings::default()
        });

        let started = Instant::now();
        let outcome = pipeline.analyze(&headlines()).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            outcome.provenance,
            Provenance::Heuristic {
                reason: PipelineError::ProcessTimedOut(Duration::from_secs(2)).to_string()
            }
        );

        let prompt_path = std::fs::read_to_string(&seen).unwrap();
        let prompt_path = Path::new(prompt_path.trim());
        assert!(
            prompt_path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("sentiment_prompt_")),
            "tool stdin was {}",
            prompt_path.display()
        );
        assert!(!prompt_path.exists());
    }

    #[tokio::test]
    async fn missing_tool_falls_back() {
        let pipeline = SentimentPipeline::new(ToolSettings {
            command: "definitely-not-an-analysis-tool".into(),
            args: vec![],
            deadline_sec: 20,
            ..ToolSettings::default()
        });
        let outcome = pipeline.analyze(&headlines()).await;
        assert_eq!(outcome.provenance.method_name(), "keyword_heuristic");
        assert!(outcome.record.is_available());
    }

    #[tokio::test]
    async fn empty_input_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let script = write_script(dir.path(), &format!("touch '{}'\n", marker.display()));
        let outcome = pipeline_for(&script, 20).analyze(&[]).await;

        assert_eq!(outcome.record.sentiment, Sentiment::NotAvailable);
        assert_eq!(outcome.record.risk_level, RiskLevel::NotAvailable);
        assert_eq!(outcome.record.score, None);
        assert_eq!(outcome.provenance, Provenance::Unavailable);
        assert!(!marker.exists());
    }
}
