//! Converge CLI entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

use converge::prelude::*;
use converge::output;

#[derive(Parser)]
#[command(
    name = "converge",
    version,
    about = "Declarative configuration-state reconciliation engine",
    long_about = None
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a playbook against an inventory
    Run {
        /// Path to the playbook YAML
        playbook: PathBuf,

        /// Path to the inventory YAML
        #[arg(short, long)]
        inventory: PathBuf,

        /// Restrict the run to hosts matching this pattern
        #[arg(long)]
        limit: Option<String>,

        /// Report what would change without mutating targets
        #[arg(long)]
        check: bool,

        /// Run-level override variables (key=value, highest precedence)
        #[arg(short = 'e', long = "extra-var")]
        extra_vars: Vec<String>,

        /// Maximum number of concurrently executing hosts
        #[arg(long, default_value_t = 5)]
        forks: usize,

        /// Per-module-apply timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// List the registered modules
    Modules,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("converge={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Parse `key=value` pairs; values that parse as JSON keep their type.
fn parse_extra_vars(pairs: &[String]) -> anyhow::Result<IndexMap<String, JsonValue>> {
    let mut vars = IndexMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("extra var '{pair}' is not key=value"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| JsonValue::String(value.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

async fn run(
    playbook: PathBuf,
    inventory: PathBuf,
    limit: Option<String>,
    check: bool,
    extra_vars: Vec<String>,
    forks: usize,
    timeout: u64,
) -> anyhow::Result<i32> {
    let source = YamlInventorySource::from_file(&inventory)?;
    let inventory = Inventory::from_source(&source)?;
    let playbook = YamlPlaybookSource::from_file(&playbook)?.playbook()?;

    let options = RunOptions {
        forks,
        check_mode: check,
        apply_timeout: std::time::Duration::from_secs(timeout),
        extra_vars: parse_extra_vars(&extra_vars)?,
        limit,
    };
    let executor = Executor::new(inventory).with_options(options);

    // Ctrl-C requests a cooperative stop after each worker's current task
    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("abort requested, stopping after current tasks");
            cancel.cancel();
        }
    });

    let mut overall = 0;
    for play in &playbook.plays {
        output::play_header(&play.name);
        let report = executor.run_play(play).await?;
        for recap in report.hosts.values() {
            output::task_line(recap);
        }
        output::recap(&report);
        if !report.success() {
            overall = report.exit_code();
        }
        if report.aborted {
            overall = overall.max(1);
            break;
        }
    }
    Ok(overall)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Command::Run {
            playbook,
            inventory,
            limit,
            check,
            extra_vars,
            forks,
            timeout,
        } => {
            run(
                playbook, inventory, limit, check, extra_vars, forks, timeout,
            )
            .await?
        }
        Command::Modules => {
            let registry = ModuleRegistry::with_builtins();
            let mut names = registry.names();
            names.sort_unstable();
            for name in names {
                println!("{name}");
            }
            0
        }
    };

    std::process::exit(code);
}
