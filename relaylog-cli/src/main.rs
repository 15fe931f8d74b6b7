use std::process::ExitCode;

use clap::Parser;

use relaylog_cli::app;
use relaylog_cli::cli::Cli;
use relaylog_cli::error::CliError;
use relaylog_cli::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match app::load_config(&cli).await {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init_tracing(&config.general) {
        eprintln!("error: {e:#}");
        return ExitCode::from(2);
    }

    tracing::info!(config = %cli.config.display(), "relaylog starting");

    let summary = match app::run(&cli, config).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            return fail(&e);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = app::print_summary(&summary, cli.health_json, &mut out) {
        return fail(&e);
    }

    tracing::info!("relaylog shut down");
    if summary.report.status.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn fail(err: &CliError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}
