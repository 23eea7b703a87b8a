use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::{debug, info};

use crate::adapters::{JsonLinesSink, OutputTopics, RecordDecoder};
use crate::config::AppConfig;
use crate::engine::{Pipeline, PipelineOutput};
use crate::error::Result;

#[derive(Parser)]
#[command(name = "cosense")]
#[command(author = "CoSense Team")]
#[command(version = "0.1.0")]
#[command(about = "Robot/human coordination decision engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus the COSENSE_ENV overlay)
    #[arg(short, long, global = true, default_value = "config")]
    pub config: String,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming engine
    Run {
        /// JSON-lines input file, "-" for stdin
        #[arg(short, long)]
        input: Option<String>,
        /// Port for the health/operator API
        #[arg(short, long)]
        port: Option<u16>,
        /// Only close windows on event time (recorded streams)
        #[arg(long)]
        no_wall_clock: bool,
    },
    /// Deterministically process a recorded stream, in input order
    Replay {
        /// JSON-lines input file, "-" for stdin
        path: String,
    },
    /// Load and validate the configuration
    CheckConfig,
}

/// Outcome of a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub accepted: u64,
    pub rejected: u64,
    pub decisions: u64,
    pub states: u64,
    pub aggregates: u64,
    pub alerts: u64,
}

/// Feed every line through a single in-order pipeline and write coordination
/// states, decisions and raw alerts as JSON lines. Actuation and enrichment never run here.
pub async fn replay<R, W>(config: &AppConfig, reader: R, writer: W) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let decoder = RecordDecoder::new(&config.ingest);
    let mut pipeline = Pipeline::new(config);
    let mut sink = JsonLinesSink::new(writer, OutputTopics::new(&config.ingest));
    let mut summary = ReplaySummary::default();

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match decoder.parse_line(line) {
            Ok(record) => {
                summary.accepted += 1;
                let output = pipeline.process(record);
                write_output(&mut sink, output, &mut summary).await?;
            }
            Err(e) => {
                debug!(error = %e, "skipping malformed record");
                summary.rejected += 1;
            }
        }
    }

    let output = pipeline.finish();
    write_output(&mut sink, output, &mut summary).await?;

    let stats = pipeline.stats();
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        decisions = summary.decisions,
        states = summary.states,
        alerts = summary.alerts,
        late_events = stats.late_events,
        incomplete_windows = stats.windows_incomplete,
        "replay complete"
    );
    Ok(summary)
}

async fn write_output<W: AsyncWrite + Unpin>(
    sink: &mut JsonLinesSink<W>,
    output: PipelineOutput,
    summary: &mut ReplaySummary,
) -> Result<()> {
    for state in &output.states {
        sink.write_state(state).await?;
    }
    for decision in &output.decisions {
        sink.write_decision(decision).await?;
    }
    for alert in &output.alerts {
        sink.write_alert(alert).await?;
    }
    summary.decisions += output.decisions.len() as u64;
    summary.states += output.states.len() as u64;
    summary.aggregates += output.aggregates.len() as u64;
    summary.alerts += output.alerts.len() as u64;
    Ok(())
}

/// Print the effective configuration, or every validation error
pub fn check_config(config: &AppConfig) -> std::result::Result<String, Vec<String>> {
    config.validate()?;
    serde_json::to_string_pretty(config).map_err(|e| vec![e.to_string()])
}
