//! Support Helper Agent
//!
//! Answers a single customer support query with a structured, schema-checked
//! reply from a hosted language model, and records per-query metrics.
//!
//! ## Features
//!
//! - **Safety Screen**: Pattern-based pre-filter for prompt injection, data
//!   exfiltration, spam and oversize input; blocked queries never leave the
//!   process
//! - **Prompt Assembly**: Fixed instructions and few-shot examples with token
//!   ceilings
//! - **Schema Enforcement**: Strict JSON validation with bounded recovery of
//!   payloads wrapped in prose or code fences
//! - **Metrics**: One CSV row per query with tokens, latency and estimated cost
//! - **Retry Logic**: Optional exponential backoff for transient API failures
//!
//! ## Architecture
//!
//! 1. **Safety** (`safety/`): Ordered rule chain producing a `SafetyVerdict`.
//!
//! 2. **Prompt** (`prompt/`): Builds chat messages and estimates tokens.
//!
//! 3. **Client** (`client/`): `ModelClient` trait and the chat-completions
//!    HTTP client.
//!
//! 4. **Validator** (`validator/`): Turns raw model text into a
//!    `StructuredResponse` or a `SchemaError`.
//!
//! 5. **Orchestrator** (`orchestrator/`): State machine tying the stages
//!    together and emitting metrics.
//!
//! 6. **Telemetry** (`telemetry/`): Metrics records, pricing and sinks.
//!
//! 7. **CLI** (`cli/`): Argument parsing and result rendering.
//!
//! ## CLI Usage
//!
//! ```bash
//! export OPENROUTER_API_KEY=sk-or-...
//! support-helper --query "How do I reset my password?"
//! support-helper --query "Where is my order?" --format table
//! support-helper --query "Do you offer team plans?" --output result.json
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use support_helper::{
//!     ChatCompletionsClient, CsvMetricsSink, HelperConfig, QueryOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HelperConfig::load(None)?;
//!     let client = ChatCompletionsClient::builder()
//!         .api_key(config.require_api_key()?)
//!         .build()?;
//!     let sink = CsvMetricsSink::new(&config.metrics_file);
//!
//!     let orchestrator =
//!         QueryOrchestrator::from_config(&config, Arc::new(client), Arc::new(sink))?;
//!     let result = orchestrator.process("How do I reset my password?").await;
//!     println!("{:?}", result.outcome);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod safety;
pub mod telemetry;
pub mod validator;

pub use cli::{ExitCode, HelperCli, OutputFormat, QueryOutput};
pub use client::{ChatCompletionsClient, ModelClient, ModelReply, TokenUsage};
pub use config::HelperConfig;
pub use error::{QueryError, Result, SchemaError, SupportError, TransportError};
pub use orchestrator::{QueryOrchestrator, QueryOutcome, QueryResult, QueryState};
pub use prompt::{PromptAssembler, PromptPayload};
pub use safety::{BlockReason, SafetyScreen, SafetyVerdict};
pub use telemetry::{
    CsvMetricsSink, MemoryMetricsSink, MetricsRecord, MetricsSink, SafetyDecision,
};
pub use validator::{ActionTag, Confidence, ResponseValidator, StructuredResponse};

/// Agent version (from Cargo.toml)
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent identifier
pub const AGENT_ID: &str = "support-helper-agent";

/// Run the CLI application
///
/// This is the main entry point for the CLI binary.
///
/// # Example
///
/// ```rust,no_run
/// use clap::Parser;
/// use support_helper::{HelperCli, run_cli};
///
/// fn main() {
///     let cli = HelperCli::parse();
///     let exit_code = run_cli(cli);
///     std::process::exit(exit_code.into());
/// }
/// ```
pub fn run_cli(cli: HelperCli) -> ExitCode {
    match cli::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from_error(&e)
        }
    }
}
