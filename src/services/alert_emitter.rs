//! Alert publishing with optional, non-blocking enrichment
//!
//! Raw alerts are published immediately. Enrichment runs in a spawned task
//! bounded by a semaphore and a timeout; its result is applied only if the
//! alert is still in the recent buffer.

use crate::adapters::{Explainer, OutputRecord};
use crate::config::EnrichmentConfig;
use crate::domain::{AnomalyAlert, Severity};
use crate::services::metrics::Metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct AlertEmitter {
    explainer: Option<Arc<dyn Explainer>>,
    metrics: Arc<Metrics>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    capacity: usize,
    recent: Arc<RwLock<VecDeque<AnomalyAlert>>>,
    output: Option<mpsc::Sender<OutputRecord>>,
    event_tx: broadcast::Sender<AnomalyAlert>,
}

impl AlertEmitter {
    /// `explainer` is None when enrichment is disabled
    pub fn new(
        config: &EnrichmentConfig,
        explainer: Option<Arc<dyn Explainer>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            explainer,
            metrics,
            timeout: Duration::from_millis(config.timeout_ms),
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            capacity: config.recent_alerts.max(1),
            recent: Arc::new(RwLock::new(VecDeque::new())),
            output: None,
            event_tx,
        }
    }

    /// Also deliver raw and enriched alerts to the output writer
    pub fn with_output(mut self, output: mpsc::Sender<OutputRecord>) -> Self {
        self.output = Some(output);
        self
    }

    /// Subscribe to raw and enriched alerts; enriched ones carry `ai_explanation`
    pub fn subscribe(&self) -> broadcast::Receiver<AnomalyAlert> {
        self.event_tx.subscribe()
    }

    /// Publish a raw alert and start enrichment if possible
    pub async fn emit(&self, alert: AnomalyAlert) -> Option<JoinHandle<()>> {
        match alert.severity {
            Severity::High => warn!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                actual = alert.actual_value,
                "{}", alert.context
            ),
            Severity::Medium => info!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                actual = alert.actual_value,
                "{}", alert.context
            ),
        }

        {
            let mut recent = self.recent.write().await;
            // Reprocessed alerts replace their earlier copy
            recent.retain(|a| a.alert_id != alert.alert_id);
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(alert.clone());
        }

        Metrics::inc(&self.metrics.alerts_emitted);
        forward(self.output.as_ref(), &alert).await;
        let _ = self.event_tx.send(alert.clone());

        let explainer = Arc::clone(self.explainer.as_ref()?);
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(alert_id = %alert.alert_id, "enrichment saturated, alert stays raw");
                return None;
            }
        };

        let recent = Arc::clone(&self.recent);
        let metrics = Arc::clone(&self.metrics);
        let event_tx = self.event_tx.clone();
        let output = self.output.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let _permit = permit;
            let prompt = alert.prompt();
            let explanation = match tokio::time::timeout(timeout, explainer.explain(&prompt)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    Metrics::inc(&metrics.enrichments_failed);
                    warn!(alert_id = %alert.alert_id, error = %e, "enrichment failed, alert stays raw");
                    return;
                }
                Err(_) => {
                    Metrics::inc(&metrics.enrichments_failed);
                    warn!(alert_id = %alert.alert_id, "enrichment timed out, alert stays raw");
                    return;
                }
            };

            let enriched = {
                let mut recent = recent.write().await;
                match recent.iter_mut().find(|a| a.alert_id == alert.alert_id) {
                    Some(held) if held.ai_explanation.is_none() => {
                        held.ai_explanation = Some(explanation);
                        Some(held.clone())
                    }
                    _ => None,
                }
            };

            match enriched {
                Some(enriched) => {
                    Metrics::inc(&metrics.enrichments_succeeded);
                    debug!(alert_id = %enriched.alert_id, "alert enriched");
                    forward(output.as_ref(), &enriched).await;
                    let _ = event_tx.send(enriched);
                }
                None => {
                    Metrics::inc(&metrics.enrichments_discarded);
                    debug!(alert_id = %alert.alert_id, "alert no longer held, explanation discarded");
                }
            }
        }))
    }

    /// Recent alerts, oldest first
    pub async fn recent(&self) -> Vec<AnomalyAlert> {
        self.recent.read().await.iter().cloned().collect()
    }
}

async fn forward(output: Option<&mpsc::Sender<OutputRecord>>, alert: &AnomalyAlert) {
    if let Some(output) = output {
        if output.send(OutputRecord::Alert(alert.clone())).await.is_err() {
            debug!(alert_id = %alert.alert_id, "output writer closed");
        }
    }
}
