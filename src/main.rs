use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use rangelock::adapter::inbound::cli::{check, run, status, Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => {
            run::execute(&args.config, cli.json)
                .await
                .with_context(|| format!("run with {}", args.config.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check(args) => {
            let healthy = check::execute(&args.config, cli.json)
                .with_context(|| format!("check {}", args.config.display()))?;
            Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Status(args) => {
            status::execute(&args.config, args.date, cli.json)
                .with_context(|| format!("status for {}", args.date))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
