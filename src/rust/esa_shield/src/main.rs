//! Command-line entry point. Run it on a schedule; each invocation makes
//! one decision and exits.

use clap::{Parser, Subcommand};
use esa_client::EsaClient;
use esa_config::Config;
use esa_shield::console::{self, Mark};
use esa_shield::{status, ShieldController, ShieldRecord};
use esa_utils::load_avg::SystemLoad;
use esa_utils::local_time::local_now;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const DEFAULT_CONFIG_FILE: &str = "esa_config.json";

#[derive(Parser)]
#[command(version, about = "ESA Load Shield", long_about = None)]
struct Cli {
    /// Configuration file. Defaults to esa_config.json beside the executable
    #[arg(short, long, env = "ESA_SHIELD_CONFIG")]
    config: Option<PathBuf>,

    /// Use this shield record instead of the configured one
    #[arg(short, long)]
    record: Option<PathBuf>,

    /// Log what would happen without calling the API or touching the record
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Check the load and raise or drop the shield (the default)
    Check,
    /// Show load, configuration and shield record without changing anything
    Status,
    /// Delete the shield record
    Clear,
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn check(config: &Config, record: ShieldRecord, dry_run: bool) -> ExitCode {
    let client = match EsaClient::from_config(config) {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let controller = ShieldController::new(config, SystemLoad, client)
        .with_record(record)
        .with_dry_run(dry_run);
    let outcome = controller.evaluate();
    if outcome.is_success() {
        info!("Check finished: {outcome}");
    } else {
        error!("Check finished: {outcome}");
    }
    ExitCode::from(outcome.exit_code())
}

fn clear(record: &ShieldRecord) -> ExitCode {
    match record.clear() {
        Ok(()) => {
            console::report(
                Mark::Ok,
                &format!("Shield record {} cleared", record.path().display()),
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            console::report(Mark::Error, &e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = console::set_console_logging() {
        eprintln!("Unable to set up logging: {e:?}");
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let record = ShieldRecord::new(cli.record.clone().unwrap_or_else(|| config.record_path()));

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => check(&config, record, cli.dry_run),
        Commands::Status => {
            status::print_status(&config, &record, &local_now());
            ExitCode::SUCCESS
        }
        Commands::Clear => clear(&record),
    }
}
