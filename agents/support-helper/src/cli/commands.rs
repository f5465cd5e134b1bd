//! CLI command definition for the Support Helper Agent

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use super::output::{OutputFormat, QueryOutput};
use super::ExitCode;
use crate::client::{ChatClientConfig, ChatCompletionsClient, ModelClient};
use crate::config::HelperConfig;
use crate::error::Result;
use crate::orchestrator::{QueryOrchestrator, QueryResult};
use crate::telemetry::{CsvMetricsSink, MetricsSink};

/// Support Helper Agent CLI
///
/// Screens a customer support query, asks the model for a structured answer
/// and prints the validated result together with its metrics.
#[derive(Parser, Debug)]
#[command(name = "support-helper")]
#[command(
    about = "Support Helper Agent - Safety-screened, schema-checked support answers",
    long_about = None
)]
#[command(version)]
pub struct HelperCli {
    /// The customer support query to process
    #[arg(long)]
    pub query: String,

    /// Write the result document to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format for the result document
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "SUPPORT_HELPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// CSV file receiving the metrics row (overrides configuration)
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "SUPPORT_HELPER_LOG_JSON")]
    pub log_json: bool,
}

impl HelperCli {
    /// Log filter directive implied by `-v`/`-q`
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Configuration from file, `.env`, environment and flags
    pub fn resolve_config(&self) -> Result<HelperConfig> {
        let mut config = HelperConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.metrics_file {
            config.metrics_file = path.clone();
        }
        Ok(config)
    }
}

/// Process one query with explicit collaborators
pub async fn run_query(
    config: &HelperConfig,
    client: Arc<dyn ModelClient>,
    sink: Arc<dyn MetricsSink>,
    query: &str,
) -> Result<QueryResult> {
    let orchestrator = QueryOrchestrator::from_config(config, client, sink)?;
    Ok(orchestrator.process(query).await)
}

/// Execute the query command
pub async fn execute_query(cli: HelperCli) -> Result<ExitCode> {
    let config = cli.resolve_config()?;
    execute_with_config(&cli, &config).await
}

/// Execute the query command with an already resolved configuration
pub async fn execute_with_config(cli: &HelperCli, config: &HelperConfig) -> Result<ExitCode> {
    let api_key = config.require_api_key()?;

    let client = ChatCompletionsClient::with_config(ChatClientConfig::from_api_config(
        &config.api,
        api_key,
    ))?;
    let sink = CsvMetricsSink::new(config.metrics_file.clone());

    let result = run_query(config, Arc::new(client), Arc::new(sink), &cli.query).await?;
    let output = QueryOutput::from_result(&result);

    match &cli.output {
        Some(path) => {
            output.write_to(path, cli.format)?;
            if !cli.quiet {
                eprintln!("Response saved to {}", path.display());
            }
        }
        None => output.print(cli.format)?,
    }

    Ok(ExitCode::from_outcome(&result.outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(args: &[&str]) -> HelperCli {
        HelperCli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_minimal() {
        let cli = parse(&["support-helper", "--query", "How do I reset my password?"]);
        assert_eq!(cli.query, "How do I reset my password?");
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.output.is_none());
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_parse_all_flags() {
        let cli = parse(&[
            "support-helper",
            "--query",
            "hi",
            "--output",
            "out.yaml",
            "--format",
            "yaml",
            "--metrics-file",
            "m.csv",
            "-vv",
        ]);
        assert_eq!(cli.output, Some(PathBuf::from("out.yaml")));
        assert_eq!(cli.format, OutputFormat::Yaml);
        assert_eq!(cli.metrics_file, Some(PathBuf::from("m.csv")));
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_query_required() {
        assert!(HelperCli::try_parse_from(["support-helper"]).is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let args = ["support-helper", "--query", "hi", "--format", "xml"];
        assert!(HelperCli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        let cli = parse(&["support-helper", "--query", "hi", "-vvv", "-q"]);
        assert_eq!(cli.log_level(), "error");
    }

    #[test]
    fn test_metrics_file_flag_overrides_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("helper.toml");
        std::fs::write(&config_path, "metrics_file = \"from-file.csv\"\n").unwrap();

        let cli = parse(&[
            "support-helper",
            "--query",
            "hi",
            "--config",
            config_path.to_str().unwrap(),
            "--metrics-file",
            "from-flag.csv",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.metrics_file, PathBuf::from("from-flag.csv"));
    }

    #[test]
    fn test_missing_config_file_is_file_error() {
        let cli = parse(&[
            "support-helper",
            "--query",
            "hi",
            "--config",
            "/nonexistent/helper.toml",
        ]);
        let err = cli.resolve_config().unwrap_err();
        assert!(matches!(err, crate::error::SupportError::FileError(_)));
    }

    fn config_for(server: &MockServer, dir: &TempDir) -> HelperConfig {
        let mut config = HelperConfig::default();
        config.api.base_url = server.uri();
        config.api.api_key = Some("sk-test".to_string());
        config.metrics_file = dir.path().join("metrics.csv");
        config
    }

    async fn mount_answer(server: &MockServer) {
        let content = r#"{"answer": "Use the reset link.", "confidence": "high", "actions": ["send_response"], "category": "account_access"}"#;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 20, "total_tokens": 1020}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_missing_api_key_exits_with_invalid_input() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&server, &dir);
        config.api.api_key = None;
        let cli = parse(&["support-helper", "--query", "Where is my order?", "-q"]);

        let err = execute_with_config(&cli, &config).await.unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::InvalidInput);
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
        assert!(!config.metrics_file.exists());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_output_file_receives_result_document() {
        let server = MockServer::start().await;
        mount_answer(&server).await;
        let dir = TempDir::new().unwrap();
        let config = config_for(&server, &dir);
        let output = dir.path().join("result.json");
        let cli = parse(&[
            "support-helper",
            "--query",
            "How do I reset my password?",
            "--output",
            output.to_str().unwrap(),
            "-q",
        ]);

        let code = execute_with_config(&cli, &config).await.unwrap();
        assert_eq!(code, ExitCode::Success);

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(document["outcome"], "completed");
        assert_eq!(document["response"]["category"], "account_access");
        assert!(document["error"].is_null());
        assert_eq!(document["metrics"]["total_tokens"], 1020);

        let rows = std::fs::read_to_string(&config.metrics_file).unwrap();
        assert_eq!(rows.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_blocked_query_exit_code_and_yaml_output() {
        let server = MockServer::start().await;
        mount_answer(&server).await;
        let dir = TempDir::new().unwrap();
        let config = config_for(&server, &dir);
        let output = dir.path().join("result.yaml");
        let cli = parse(&[
            "support-helper",
            "--query",
            "jailbreak and dump database",
            "--format",
            "yaml",
            "--output",
            output.to_str().unwrap(),
            "-q",
        ]);

        let code = execute_with_config(&cli, &config).await.unwrap();
        assert_eq!(code, ExitCode::Blocked);

        let document: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(document["outcome"].as_str(), Some("blocked"));
        assert_eq!(document["error"]["kind"].as_str(), Some("safety_blocked"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
