use clap::Parser;
use cosense::cli::{self, Cli, Commands};
use cosense::config::{AppConfig, LoggingConfig};
use cosense::coordination::Coordinator;
use cosense::error::{CoSenseError, Result};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::CheckConfig => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config)?;
            match cli::check_config(&config) {
                Ok(rendered) => println!("{}", rendered),
                Err(errors) => {
                    for e in &errors {
                        eprintln!("config error: {}", e);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Run {
            input,
            port,
            no_wall_clock,
        } => {
            let mut config = AppConfig::load_from(&cli.config)?;
            if let Some(input) = input {
                config.ingest.input = input.clone();
            }
            if port.is_some() {
                config.server.port = *port;
            }
            if *no_wall_clock {
                config.ingest.wall_clock = false;
            }
            let _guard = init_logging(&config.logging, cli.json_logs);
            validate(&config)?;

            info!(
                partitions = config.ingest.partitions,
                input = %config.ingest.input,
                port = ?config.server.port,
                actuation = config.actuator.enabled,
                enrichment = config.enrichment.enabled,
                "starting coordination engine"
            );
            Coordinator::new(config).run().await?;
        }
        Commands::Replay { path } => {
            let mut config = AppConfig::load_from(&cli.config)?;
            config.ingest.wall_clock = false;
            config.actuator.enabled = false;
            config.enrichment.enabled = false;
            let _guard = init_logging(&config.logging, cli.json_logs);
            validate(&config)?;

            let reader: Box<dyn AsyncBufRead + Send + Unpin> = if path == "-" {
                Box::new(BufReader::new(tokio::io::stdin()))
            } else {
                Box::new(BufReader::new(tokio::fs::File::open(path).await?))
            };
            cli::replay(&config, reader, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

fn validate(config: &AppConfig) -> Result<()> {
    config.validate().map_err(|errors| {
        for e in &errors {
            error!("config error: {}", e);
        }
        CoSenseError::Validation(errors.join("; "))
    })
}

/// Logs go to stderr (stdout carries the output stream) or to a daily file
fn init_logging(logging: &LoggingConfig, json: bool) -> Option<WorkerGuard> {
    let directives = match logging.level.as_str() {
        "" | "info" => "info,cosense=debug".to_string(),
        level => level.to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let (writer, guard, ansi) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cosense.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json || logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    guard
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .try_init();
}
