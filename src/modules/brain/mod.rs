//! Turning a batch of headlines into a validated market verdict.
//!
//! `launcher` starts the external analysis tool, `decoder` reads its event
//! stream, `extractor` digs the JSON verdict out of whatever text came back and
//! `validator` forces it into shape. `pipeline` ties them together under one
//! deadline and falls back to `heuristic` when the tool is unusable.

pub mod agent;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod heuristic;
pub mod launcher;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod validator;

pub use agent::{AnalysisReport, DataSource, SentimentAgent};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{AnalysisOutcome, SentimentPipeline};
pub use record::{Provenance, RiskLevel, Sentiment, SentimentRecord};
