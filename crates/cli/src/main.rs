mod run_commands;
mod settings_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    doozer_common::logging::{self, LogOptions},
    tracing::info,
};

#[derive(Parser)]
#[command(name = "doozer", about = "doozer, an async message-processing worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Settings file (TOML, YAML or JSON). Searched for when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo newline-delimited JSON messages through a doozer application.
    Run(run_commands::RunArgs),
    /// Print the resolved settings as JSON.
    Settings,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&LogOptions {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    });
    info!(version = env!("CARGO_PKG_VERSION"), "doozer starting");

    let settings = settings_commands::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_commands::handle_run(args, settings),
        Commands::Settings => settings_commands::print(&settings),
    }
}
