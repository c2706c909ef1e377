use autopilot::cli::{Cli, Commands};
use autopilot::commands::{run_engine, run_simulate, run_templates, RunOptions};
use autopilot::logging;
use clap::Parser;
use dotenv::dotenv;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Signing seeds and overrides may come from .env
    dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(&cli.verbose, cli.log_json) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match cli.command {
        Commands::Run {
            config,
            snapshot,
            cycles,
            health_port,
            ledger_csv,
        } => {
            let options = RunOptions {
                cycles,
                health_port,
                ledger_csv,
            };
            run_engine(&config, &snapshot, options).await?;
        }
        Commands::Simulate {
            config,
            snapshot,
            strategy,
        } => {
            run_simulate(&config, &snapshot, strategy.as_deref())?;
        }
        Commands::Templates {
            category,
            json,
            instantiate,
            account,
        } => {
            run_templates(category, json, instantiate.as_deref(), account.as_deref())?;
        }
    }

    Ok(())
}
