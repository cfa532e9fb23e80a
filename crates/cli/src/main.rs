//! apiscope CLI - Main Entry Point

use apiscope_cli::{commands, output};
use clap::{Parser, Subcommand};
use commands::{aggregate, call, redact, run};
use tracing_subscriber::EnvFilter;

/// apiscope - API test harness with redacted, mergeable traces
#[derive(Parser)]
#[command(name = "apiscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test command across parallel workers, then merge their traces
    Run(run::RunArgs),

    /// Merge worker trace files into the combined report
    Aggregate(aggregate::AggregateArgs),

    /// Perform a single API call through the executor
    Call(call::CallArgs),

    /// Redact a JSON body, header map, text or URL
    Redact(redact::RedactArgs),

    /// Show version information
    Version,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Aggregate(args) => aggregate::execute(args, cli.format).await,
        Commands::Call(args) => call::execute(args, cli.format).await,
        Commands::Redact(args) => redact::execute(args, cli.format).await,
        Commands::Version => {
            println!("apiscope v{}", env!("CARGO_PKG_VERSION"));
            println!("harness core v{}", apiscope_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
