//! Output formatting for the Support Helper CLI
//!
//! The result document has the same shape in every format:
//! `request_id`, `outcome`, `response`, `error` and `metrics`.

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Result, SupportError};
use crate::orchestrator::{QueryOutcome, QueryResult};
use crate::telemetry::MetricsRecord;
use crate::validator::StructuredResponse;

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// JSON format for machine processing
    #[default]
    Json,
    /// YAML format
    Yaml,
    /// Human-readable table format with colors
    Table,
}

/// Machine-readable error description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorOutput {
    /// `safety_blocked`, `transport_error`, `schema_error` or `prompt_too_large`
    pub kind: String,
    pub message: String,
}

/// Result document printed or written by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub request_id: Uuid,
    /// `completed`, `blocked` or `failed`
    pub outcome: String,
    pub response: Option<StructuredResponse>,
    pub error: Option<ErrorOutput>,
    pub metrics: MetricsRecord,
}

impl QueryOutput {
    pub fn from_result(result: &QueryResult) -> Self {
        let (response, error) = match &result.outcome {
            QueryOutcome::Completed(response) => (Some(response.clone()), None),
            QueryOutcome::Blocked(verdict) => (
                None,
                Some(ErrorOutput {
                    kind: "safety_blocked".to_string(),
                    message: verdict.to_string(),
                }),
            ),
            QueryOutcome::Failed(err) => (
                None,
                Some(ErrorOutput {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
            ),
        };

        Self {
            request_id: result.request_id,
            outcome: result.final_state().to_string(),
            response,
            error,
            metrics: result.metrics.clone(),
        }
    }

    /// Render in the given format
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(self)?),
            OutputFormat::Table => Ok(self.render_table()),
        }
    }

    /// Print to stdout
    pub fn print(&self, format: OutputFormat) -> Result<()> {
        let rendered = self.render(format)?;
        println!("{}", rendered.trim_end());
        Ok(())
    }

    /// Write to a file, without terminal colors
    pub fn write_to(&self, path: &Path, format: OutputFormat) -> Result<()> {
        if format == OutputFormat::Table {
            colored::control::set_override(false);
        }
        let rendered = self.render(format)?;
        std::fs::write(path, format!("{}\n", rendered.trim_end())).map_err(|e| {
            SupportError::file_error(format!(
                "Failed to write output file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn render_table(&self) -> String {
        let mut out = String::new();

        writeln!(out).ok();
        writeln!(out, "{}", "Support Query Result".cyan().bold()).ok();
        writeln!(out, "{}", "=".repeat(60)).ok();
        writeln!(out).ok();

        let outcome = match self.outcome.as_str() {
            "completed" => format!("+ {}", self.outcome).green(),
            "blocked" => format!("! {}", self.outcome).yellow(),
            _ => format!("x {}", self.outcome).red(),
        };
        writeln!(out, "{} ({})", outcome, self.request_id.to_string().dimmed()).ok();
        writeln!(out).ok();

        if let Some(response) = &self.response {
            writeln!(out, "{}", "Response:".cyan().bold()).ok();
            writeln!(out, "{}", "-".repeat(60)).ok();
            writeln!(out, "  {:<12} {}", "Answer:", response.answer).ok();
            writeln!(out, "  {:<12} {}", "Confidence:", response.confidence).ok();
            writeln!(out, "  {:<12} {}", "Category:", response.category).ok();
            let actions: Vec<&str> = response.actions.iter().map(|a| a.as_str()).collect();
            writeln!(out, "  {:<12} {}", "Actions:", actions.join(", ")).ok();
            writeln!(out).ok();
        }

        if let Some(error) = &self.error {
            writeln!(out, "{}", "Error:".cyan().bold()).ok();
            writeln!(out, "{}", "-".repeat(60)).ok();
            writeln!(out, "  {:<12} {}", "Kind:", error.kind.red()).ok();
            writeln!(out, "  {:<12} {}", "Message:", error.message).ok();
            writeln!(out).ok();
        }

        let m = &self.metrics;
        writeln!(out, "{}", "Metrics:".cyan().bold()).ok();
        writeln!(out, "{}", "-".repeat(60)).ok();
        writeln!(out, "  {:<12} {}", "Model:", m.model).ok();
        writeln!(
            out,
            "  {:<12} {} prompt + {} completion = {}",
            "Tokens:", m.tokens_prompt, m.tokens_completion, m.total_tokens
        )
        .ok();
        writeln!(out, "  {:<12} {:.2} ms", "Latency:", m.latency_ms).ok();
        writeln!(out, "  {:<12} ${:.6}", "Cost:", m.estimated_cost_usd).ok();
        writeln!(out, "  {:<12} {}", "Timestamp:", m.timestamp).ok();

        out
    }
}
