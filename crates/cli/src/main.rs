mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    hoarder_config::{HoarderConfig, Severity, validate::check_config},
    hoarder_intake::Intake,
    hoarder_telegram::{TelegramOutbound, TelegramUpdates},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "hoarder", about = "Hoarder: flea-market intake bot for Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery in ./ and the user config dir).
    #[arg(long, global = true, env = "HOARDER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default when no subcommand is provided).
    Run,
    /// Validate the configuration file and report errors and warnings.
    CheckConfig {
        /// Show informational diagnostics too.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "hoarder starting");
            let config = hoarder_config::discover_and_load(cli.config.as_deref())?;
            run(config).await
        },
        Some(Commands::CheckConfig { verbose }) => {
            if config_commands::check(cli.config.as_deref(), verbose) {
                Ok(())
            } else {
                std::process::exit(1);
            }
        },
    }
}

async fn run(config: HoarderConfig) -> anyhow::Result<()> {
    let diagnostics = check_config(&config);
    config_commands::print_diagnostics(&diagnostics, false);
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        anyhow::bail!("invalid configuration, see `hoarder check-config`");
    }

    let connected = hoarder_telegram::connect(&config.telegram)
        .await
        .context("failed to connect to telegram")?;

    let shutdown = CancellationToken::new();
    let outbound = Arc::new(TelegramOutbound::new(connected.bot.clone()));
    let intake = Intake::from_config(&config.intake, outbound, shutdown.clone())
        .context("failed to load replacement table")?;

    let publisher = tokio::spawn(intake.publisher().run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        signal_token.cancel();
    });

    let source = Arc::new(TelegramUpdates::new(connected.bot));
    let polled = intake
        .run_polling(source, config.telegram.poll_timeout())
        .await;

    shutdown.cancel();
    if let Err(e) = publisher.await {
        error!(error = %e, "publisher task failed");
    }
    polled?;

    info!("hoarder stopped");
    Ok(())
}
