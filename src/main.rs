use std::process::ExitCode;

use clap::{Parser, Subcommand};
use normfq::command;
use normfq::runtime::{setup_global_logger, LogLevel};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    // trace, debug, info, warn, error or off
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Normalize(command::NormalizeCMD),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_global_logger(cli.log_level);

    let result = match cli.command {
        Commands::Normalize(mut cmd) => cmd.try_execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
