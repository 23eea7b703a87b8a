//! Concurrent runtime
//!
//! Wires ingest, the record router, supervised partition workers, the decision
//! sink (actuation, aggregation, anomaly detection, alerting), the JSON-lines
//! writer and the optional API server, then runs the shutdown sequence.

use super::router::{stopped, RecordRouter};
use super::shutdown::{install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownSignal};
use super::worker::PartitionWorker;
use crate::adapters::{
    pump_lines, Actuator, Explainer, HttpActuator, HttpExplainer, JsonLinesSink, NoopActuator,
    OutputRecord, OutputTopics, RecordDecoder,
};
use crate::config::AppConfig;
use crate::domain::{Decision, InputRecord};
use crate::engine::{Analytics, AnalyticsOutput, HumanBoard, OverrideRegistry, ZoneBoard};
use crate::error::Result;
use crate::services::{AlertEmitter, DecisionEmitter, HealthServer, HealthState, Metrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ANALYTICS_TICK: Duration = Duration::from_millis(500);
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the shared handles of a running engine
pub struct Coordinator {
    config: Arc<AppConfig>,
    metrics: Arc<Metrics>,
    overrides: OverrideRegistry,
    shutdown: Arc<GracefulShutdown>,
}

impl Coordinator {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(Metrics::new()),
            overrides: OverrideRegistry::new(),
            shutdown: Arc::new(GracefulShutdown::new(ShutdownConfig::default())),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Run until the input ends (without an API server) or a signal arrives
    pub async fn run(self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        let decoder = RecordDecoder::new(&config.ingest);

        let actuator: Arc<dyn Actuator> = if config.actuator.enabled {
            Arc::new(HttpActuator::new(&config.actuator)?)
        } else {
            Arc::new(NoopActuator)
        };
        let explainer: Option<Arc<dyn Explainer>> = if config.enrichment.enabled {
            Some(Arc::new(HttpExplainer::new(&config.enrichment)?))
        } else {
            None
        };
        let capacity = config.ingest.channel_capacity.max(1);

        // Every output record goes through one bounded channel to the writer
        let (output_tx, output_rx) = mpsc::channel::<OutputRecord>(capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let writer = spawn_writer(
            JsonLinesSink::new(tokio::io::stdout(), OutputTopics::new(&config.ingest)),
            output_rx,
            close_rx,
        );

        let decisions = Arc::new(
            DecisionEmitter::new(config.actuator.clone(), actuator, Arc::clone(&metrics))
                .with_output(output_tx.clone()),
        );
        let alerts = Arc::new(
            AlertEmitter::new(&config.enrichment, explainer, Arc::clone(&metrics))
                .with_output(output_tx.clone()),
        );

        // Partitions
        let humans = HumanBoard::new();
        let zones = ZoneBoard::new();
        let partitions = config.ingest.partitions.max(1);
        let (decision_tx, decision_rx) = mpsc::channel::<Decision>(capacity);
        let mut partition_txs = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);
        for id in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            partition_txs.push(tx);
            workers.push(
                PartitionWorker::new(
                    id,
                    Arc::clone(&config),
                    humans.clone(),
                    zones.clone(),
                    self.overrides.clone(),
                    rx,
                    decision_tx.clone(),
                    Arc::clone(&metrics),
                )
                .with_states(output_tx.clone())
                .spawn(),
            );
        }
        drop(decision_tx);
        drop(output_tx);
        info!(partitions, "partition workers started");

        let sink = spawn_decision_sink(
            decision_rx,
            Analytics::new(&config),
            Arc::clone(&decisions),
            Arc::clone(&alerts),
            Arc::clone(&metrics),
            config.ingest.wall_clock,
        );

        // Intake
        let (record_tx, record_rx) = mpsc::channel::<InputRecord>(capacity);
        let (intake_stop_tx, intake_stop_rx) = watch::channel(false);
        let router = RecordRouter::new(partition_txs, humans, zones, Arc::clone(&metrics));
        let intake = tokio::spawn(router.run_until(record_rx, intake_stop_rx));

        let health = HealthState::new(
            Arc::clone(&metrics),
            Arc::clone(&decisions),
            Arc::clone(&alerts),
            self.overrides.clone(),
        )
        .with_ingest(decoder.clone(), record_tx.clone());
        let health = Arc::new(health);
        let server = config.server.port.map(|port| {
            let server = HealthServer::new(Arc::clone(&health), port);
            let stop = self.shutdown.stop_receiver();
            tokio::spawn(async move {
                if let Err(e) = server.run(stop).await {
                    error!(error = %e, "API server stopped");
                }
            })
        });

        let pump = spawn_pump(
            &config.ingest.input,
            decoder,
            record_tx,
            Arc::clone(&metrics),
            Arc::clone(&self.shutdown),
            server.is_none(),
        )
        .await?;

        let status = spawn_status(Arc::clone(&metrics), self.shutdown.stop_receiver());

        install_signal_handlers(Arc::clone(&self.shutdown)).await;
        health.set_ready(true);
        info!("coordination engine running");

        stopped(&mut self.shutdown.stop_receiver()).await;
        health.set_ready(false);

        let summary_metrics = Arc::clone(&metrics);
        self.shutdown
            .execute(
                move || {
                    Box::pin(async move {
                        if let Some(pump) = pump {
                            let _ = pump.await;
                        }
                        let _ = intake_stop_tx.send(true);
                    })
                },
                move || {
                    Box::pin(async move {
                        let mut drained = match intake.await {
                            Ok(Ok(())) => true,
                            Ok(Err(e)) => {
                                warn!(error = %e, "intake stopped early");
                                false
                            }
                            Err(e) => {
                                error!(error = %e, "intake task failed");
                                false
                            }
                        };
                        for worker in workers {
                            drained &= worker.await.is_ok();
                        }
                        drained
                    })
                },
                move || {
                    Box::pin(async move {
                        if let Err(e) = sink.await {
                            error!(error = %e, "decision sink failed");
                        }
                    })
                },
                move || {
                    Box::pin(async move {
                        let _ = close_tx.send(true);
                        if let Err(e) = writer.await {
                            error!(error = %e, "output writer failed");
                        }
                        status.abort();
                        if let Some(server) = server {
                            server.abort();
                        }
                        info!("final counters: {}", summary_metrics.summary());
                    })
                },
            )
            .await;

        Ok(())
    }
}

/// Start the line reader for `input` ("-" is stdin, empty disables it)
async fn spawn_pump(
    input: &str,
    decoder: RecordDecoder,
    tx: mpsc::Sender<InputRecord>,
    metrics: Arc<Metrics>,
    shutdown: Arc<GracefulShutdown>,
    stop_at_eof: bool,
) -> Result<Option<JoinHandle<()>>> {
    let reader: Box<dyn AsyncBufRead + Send + Unpin> = match input {
        "" => {
            if stop_at_eof {
                warn!("no input and no API server configured, nothing to do");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
            return Ok(None);
        }
        "-" => Box::new(BufReader::new(tokio::io::stdin())),
        path => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
    };
    info!(input, "reading records");

    let mut stop = shutdown.stop_receiver();
    Ok(Some(tokio::spawn(async move {
        let reject_metrics = Arc::clone(&metrics);
        let pumped = tokio::select! {
            result = pump_lines(reader, &decoder, tx, |_| {
                Metrics::inc(&reject_metrics.records_malformed);
            }) => Some(result),
            _ = stopped(&mut stop) => None,
        };
        match pumped {
            Some(Ok(stats)) => {
                info!(accepted = stats.accepted, rejected = stats.rejected, "input exhausted");
                if stop_at_eof {
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "input read failed");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
            None => debug!("input reader stopped by shutdown"),
        }
    })))
}

/// Merged decision stream: actuation, then aggregation and anomaly detection
fn spawn_decision_sink(
    mut rx: mpsc::Receiver<Decision>,
    mut analytics: Analytics,
    decisions: Arc<DecisionEmitter>,
    alerts: Arc<AlertEmitter>,
    metrics: Arc<Metrics>,
    wall_clock: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ANALYTICS_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut pending: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(decision) => {
                        let output = analytics.record(&decision);
                        // Actuation runs detached; failures are counted by the emitter
                        let _ = decisions.emit(decision).await;
                        publish_analytics(output, &alerts, &metrics, &mut pending).await;
                    }
                    None => break,
                },
                _ = tick.tick(), if wall_clock => {
                    let output = analytics.advance(chrono::Utc::now().timestamp_millis());
                    publish_analytics(output, &alerts, &metrics, &mut pending).await;
                }
            }
        }

        let output = analytics.flush();
        publish_analytics(output, &alerts, &metrics, &mut pending).await;

        for handle in pending {
            let _ = handle.await;
        }
        debug!("decision sink finished");
    })
}

async fn publish_analytics(
    output: AnalyticsOutput,
    alerts: &AlertEmitter,
    metrics: &Metrics,
    pending: &mut Vec<JoinHandle<()>>,
) {
    Metrics::add(&metrics.aggregates_closed, output.aggregates.len() as u64);
    for alert in output.alerts {
        if let Some(handle) = alerts.emit(alert).await {
            pending.push(handle);
        }
    }
    pending.retain(|handle| !handle.is_finished());
}

/// Write output records until every sender is gone or close is signalled,
/// then drain what is already queued. Returns the sink once done.
fn spawn_writer<W>(
    mut sink: JsonLinesSink<W>,
    mut records: mpsc::Receiver<OutputRecord>,
    mut close: watch::Receiver<bool>,
) -> JoinHandle<JsonLinesSink<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                record = records.recv() => match record {
                    Some(record) => write_or_log(sink.write_record(&record).await),
                    None => return sink,
                },
                _ = stopped(&mut close) => break,
            }
        }

        records.close();
        let mut drained = 0u64;
        while let Some(record) = records.recv().await {
            write_or_log(sink.write_record(&record).await);
            drained += 1;
        }
        debug!(drained, "output writer closed");
        sink
    })
}

fn write_or_log(result: Result<()>) {
    if let Err(e) = result {
        error!(error = %e, "failed to write output record");
    }
}

fn spawn_status(metrics: Arc<Metrics>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics.log_status(),
                _ = stopped(&mut stop) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Envelope, NoopActuator};
    use crate::config::{ActuatorConfig, EnrichmentConfig, IngestConfig};
    use crate::domain::{Action, AlertType, AnomalyAlert, ReasonCode, Severity};

    fn decision(timestamp: i64) -> Decision {
        Decision {
            decision_id: Decision::make_id("robot-1", timestamp),
            robot_id: "robot-1".to_string(),
            zone_id: "zone-a".to_string(),
            timestamp,
            action: Action::Slow,
            reason_codes: vec![ReasonCode::CloseProximity],
            primary_reason: ReasonCode::CloseProximity,
            risk_score: 0.5,
            nearest_human_distance: Some(2.0),
            summary: "robot-1 slowing".to_string(),
            heartbeat: false,
        }
    }

    fn lines(sink: JsonLinesSink<Vec<u8>>) -> Vec<Envelope> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_writer_keeps_every_record_under_load() {
        let topics = OutputTopics::new(&IngestConfig::default());
        let (tx, rx) = mpsc::channel(8);
        let (close_tx, close_rx) = watch::channel(false);
        let writer = spawn_writer(JsonLinesSink::new(Vec::new(), topics), rx, close_rx);

        let metrics = Arc::new(Metrics::new());
        let decisions = DecisionEmitter::new(
            ActuatorConfig::default(),
            Arc::new(NoopActuator),
            Arc::clone(&metrics),
        )
        .with_output(tx.clone());
        let alerts =
            AlertEmitter::new(&EnrichmentConfig::default(), None, metrics).with_output(tx);
        // Live subscribers that never read
        let _decision_feed = decisions.subscribe();
        let _alert_feed = alerts.subscribe();

        for t in 0..2_000 {
            decisions.emit(decision(t)).await;
        }
        alerts
            .emit(AnomalyAlert {
                alert_id: "alert-1".to_string(),
                alert_type: AlertType::RepeatedRobotStop,
                detected_at: 2_000,
                zone_id: None,
                robot_id: Some("robot-1".to_string()),
                metric_name: "stop_count".to_string(),
                actual_value: 3.0,
                forecast_value: None,
                lower_bound: None,
                upper_bound: Some(2.0),
                severity: Severity::High,
                context: "robot-1 stopped 3 times within 20s".to_string(),
                ai_explanation: None,
            })
            .await;

        // Emitters stay alive, as they do behind the API server
        close_tx.send(true).unwrap();
        let written = lines(writer.await.unwrap());

        assert_eq!(written.len(), 2_001);
        assert_eq!(written[1_999].value["timestamp"], 1_999);
        assert_eq!(written[2_000].topic, "anomaly.alerts");
    }

    #[tokio::test]
    async fn test_writer_finishes_when_senders_are_gone() {
        let topics = OutputTopics::new(&IngestConfig::default());
        let (tx, rx) = mpsc::channel(2);
        let (_close_tx, close_rx) = watch::channel(false);
        let writer = spawn_writer(JsonLinesSink::new(Vec::new(), topics), rx, close_rx);

        tx.send(OutputRecord::Decision(decision(5))).await.unwrap();
        drop(tx);

        let written = lines(writer.await.unwrap());
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].topic, "coordination.decisions");
    }
}
