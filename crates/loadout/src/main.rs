//! Run one request through the loadout engine and print the result as JSON.
//!
//! Uses the reference catalog, whose capabilities echo what they are asked
//! to do. Logs go to stderr; set `RUST_LOG` to change the level.
//!
//! # Examples
//!
//! ```sh
//! # Run every step
//! loadout "build a REST API for orders"
//!
//! # Stop after two steps, with a custom config file
//! loadout "创建完整应用" --max-steps 2 --config loadout.json
//!
//! # Show the plan without executing it
//! loadout "refactor the parser" --plan-only
//! ```

use clap::Parser;
use loadout::capability::reference_catalog;
use loadout::config::EngineConfig;
use loadout::engine::{Engine, ExecutionOptions, LoggingHandler};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run one request through the loadout engine and print the result as JSON.
#[derive(Parser)]
#[command(name = "loadout")]
struct Cli {
    /// The task to run
    request: String,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Limits ─────────────────────────────────────────────────
    /// Stop after this many steps
    #[arg(long)]
    max_steps: Option<usize>,

    /// Stop once this many tokens have been used
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    max_time: Option<f64>,

    /// Keep going after a failed step
    #[arg(long)]
    continue_on_error: bool,

    /// Re-prioritize context for a workflow (code_generation, ui_design, testing)
    #[arg(long)]
    workflow: Option<String>,

    // ── Output mode ────────────────────────────────────────────
    /// Print the decomposed steps and complexity estimate, then exit
    #[arg(long)]
    plan_only: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_tokens: self.max_tokens,
            max_time: self.max_time,
            max_steps: self.max_steps,
            stop_on_error: !self.continue_on_error,
            workflow_type: self.workflow.clone(),
            ..ExecutionOptions::default()
        }
    }
}

async fn run(cli: &Cli) -> Result<String, String> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    let catalog = Arc::new(reference_catalog(config.catalog.clone()));
    let engine = Engine::from_config(&config, catalog).with_event_handler(LoggingHandler);

    let output = if cli.plan_only {
        let steps = engine
            .planner()
            .decompose(&cli.request)
            .map_err(|e| e.to_string())?;
        let complexity = engine.planner().estimate_complexity(&steps);
        json!({ "steps": steps, "complexity": complexity })
    } else {
        let result = engine.execute_task(&cli.request, cli.options()).await;
        serde_json::to_value(&result).map_err(|e| format!("failed to serialize result: {e}"))?
    };

    let text = if cli.pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    };
    text.map_err(|e| format!("failed to serialize output: {e}"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
