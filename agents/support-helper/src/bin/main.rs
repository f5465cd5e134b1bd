//! Support Helper Agent CLI
//!
//! # Usage
//!
//! ```bash
//! # Print the structured answer as JSON
//! support-helper --query "How do I reset my password?"
//!
//! # Human-readable output with debug logs on stderr
//! support-helper --query "Where is my order?" --format table -vv
//!
//! # Save the result document and use a custom metrics file
//! support-helper --query "Do you offer team plans?" --output result.json --metrics-file out/metrics.csv
//! ```
//!
//! # Exit Codes
//!
//! - 0: Query completed
//! - 1: Query blocked by the safety screen
//! - 2: Query failed (model API, schema or prompt size)
//! - 3: Invalid arguments or configuration (e.g. missing OPENROUTER_API_KEY)
//! - 4: File not found or inaccessible
//! - 10: Internal error

use anyhow::Context;
use clap::Parser;
use support_helper::{run_cli, ExitCode, HelperCli, AGENT_ID, AGENT_VERSION};
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &HelperCli) -> anyhow::Result<()> {
    // RUST_LOG takes precedence over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level()))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if cli.log_json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

fn main() {
    // Parse CLI arguments; usage errors exit with 3 rather than clap's 2
    let cli = match HelperCli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(ExitCode::from_parse_error(&e).into());
        }
    };

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Warning: {:#}", e);
    }
    tracing::debug!(agent = AGENT_ID, version = AGENT_VERSION, "Starting");

    // Run the CLI and exit with appropriate code
    let exit_code = run_cli(cli);
    std::process::exit(exit_code.into());
}
