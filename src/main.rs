//! decoyd-regress - black-box regression harness for the decoyd daemon
//!
//! Installs routes for the reserved test networks, drives the daemon
//! under test through recorded scenarios, and verifies the captured
//! traffic against golden trace fixtures.

use std::path::PathBuf;

use clap::Parser;
use regress::common::config::Config;
use regress::common::logging;
use regress::harness::{self, Harness, RunOptions};
use regress::scenario::Scenario;

#[derive(Parser)]
#[command(name = "decoyd-regress", about = "Regression harness for the decoyd network decoy daemon")]
#[command(version, long_about = None)]
struct Cli {
    /// Scenario files, or directories of *.yaml scenarios
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,

    /// Daemon configuration file loaded for every scenario
    #[arg(long, short = 'f')]
    config: PathBuf,

    /// Path to the daemon binary (default taken from the harness config)
    #[arg(long)]
    daemon: Option<PathBuf>,

    /// Suite name shown in the run banner
    #[arg(long, short, default_value = "decoyd")]
    name: String,

    /// Verbose diagnostics; trace files are kept even on success
    #[arg(long, short)]
    debug: bool,

    /// Promote captured traces to golden fixtures instead of comparing
    #[arg(long, short)]
    generate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = logging::init(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the diagnostic log before exiting
    drop(guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> regress::Result<i32> {
    let mut config = Config::load()?;
    if let Some(daemon) = cli.daemon {
        config.daemon.binary = daemon;
    }

    let scenarios = Scenario::collect(&cli.scenarios)?;

    let options = RunOptions {
        debug: cli.debug,
        generate: cli.generate,
        suite_name: cli.name,
    };

    let harness = Harness::new(config, cli.config, options).await?;
    let summary = harness.execute(&scenarios).await;
    harness::report(&summary);

    Ok(summary.exit_code())
}
