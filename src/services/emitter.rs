//! Decision publishing and actuation feedback

use crate::adapters::{deliver_with_retry, ActuationCommand, Actuator, OutputRecord};
use crate::config::ActuatorConfig;
use crate::domain::Decision;
use crate::services::metrics::Metrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Publishes decisions, tracks the current one per robot, and forwards
/// actions to the actuator off the processing path.
///
/// The output channel is bounded and lossless: emitting waits while the
/// writer is behind. The broadcast feeds live subscribers only and may lag.
pub struct DecisionEmitter {
    config: ActuatorConfig,
    actuator: Arc<dyn Actuator>,
    metrics: Arc<Metrics>,
    current: Arc<DashMap<String, Decision>>,
    output: Option<mpsc::Sender<OutputRecord>>,
    event_tx: broadcast::Sender<Decision>,
}

impl DecisionEmitter {
    pub fn new(config: ActuatorConfig, actuator: Arc<dyn Actuator>, metrics: Arc<Metrics>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            config,
            actuator,
            metrics,
            current: Arc::new(DashMap::new()),
            output: None,
            event_tx,
        }
    }

    /// Also deliver every decision to the output writer
    pub fn with_output(mut self, output: mpsc::Sender<OutputRecord>) -> Self {
        self.output = Some(output);
        self
    }

    /// Subscribe to published decisions
    pub fn subscribe(&self) -> broadcast::Receiver<Decision> {
        self.event_tx.subscribe()
    }

    /// Publish a decision; returns the actuation task when feedback is enabled
    pub async fn emit(&self, decision: Decision) -> Option<JoinHandle<()>> {
        Metrics::inc(&self.metrics.decisions_emitted);
        self.metrics.touch();

        if decision.is_stop() {
            info!(
                robot_id = %decision.robot_id,
                risk = decision.risk_score,
                reason = %decision.primary_reason,
                "{}", decision.summary
            );
        } else {
            debug!(
                robot_id = %decision.robot_id,
                action = %decision.action,
                risk = decision.risk_score,
                "{}", decision.summary
            );
        }

        // Older decisions arriving late never replace the current one
        let supersedes = self
            .current
            .get(&decision.robot_id)
            .map_or(true, |cur| decision.timestamp >= cur.timestamp);
        if supersedes {
            self.current
                .insert(decision.robot_id.clone(), decision.clone());
        }

        let command = ActuationCommand::from(&decision);
        if let Some(output) = &self.output {
            if output.send(OutputRecord::Decision(decision.clone())).await.is_err() {
                debug!(decision_id = %decision.decision_id, "output writer closed");
            }
        }
        // No subscribers is fine
        let _ = self.event_tx.send(decision);

        if !self.config.enabled {
            return None;
        }

        let actuator = Arc::clone(&self.actuator);
        let metrics = Arc::clone(&self.metrics);
        let attempts = self.config.max_attempts;
        let backoff = Duration::from_millis(self.config.backoff_ms);
        Some(tokio::spawn(async move {
            if deliver_with_retry(actuator.as_ref(), &command, attempts, backoff)
                .await
                .is_err()
            {
                Metrics::inc(&metrics.actuation_failures);
            }
        }))
    }

    pub fn current(&self, robot_id: &str) -> Option<Decision> {
        self.current.get(robot_id).map(|d| d.clone())
    }

    /// Current decision of every robot, ordered by robot id
    pub fn current_all(&self) -> Vec<Decision> {
        let mut all: Vec<Decision> = self.current.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.robot_id.cmp(&b.robot_id));
        all
    }
}
