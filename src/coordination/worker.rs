//! Supervised partition workers
//!
//! Each worker owns one [`PartitionProcessor`] and is the only consumer of its
//! partition queue, which keeps per-robot processing ordered. A panic while
//! processing is contained to the partition: the supervisor logs it, counts a
//! restart and resumes on the same queue with fresh state.

use crate::adapters::OutputRecord;
use crate::config::AppConfig;
use crate::domain::{Decision, EntitySnapshot};
use crate::engine::{
    HumanBoard, OverrideRegistry, PartitionOutput, PartitionProcessor, ZoneBoard,
};
use crate::services::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Wall-clock window closing cadence
const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Why a worker run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Queue closed and open windows flushed
    Drained,
    /// Decision consumer is gone
    OutputClosed,
}

pub struct PartitionWorker {
    id: usize,
    config: Arc<AppConfig>,
    humans: HumanBoard,
    zones: ZoneBoard,
    overrides: OverrideRegistry,
    queue: Arc<Mutex<mpsc::Receiver<EntitySnapshot>>>,
    decisions: mpsc::Sender<Decision>,
    states: Option<mpsc::Sender<OutputRecord>>,
    metrics: Arc<Metrics>,
}

impl PartitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        config: Arc<AppConfig>,
        humans: HumanBoard,
        zones: ZoneBoard,
        overrides: OverrideRegistry,
        queue: mpsc::Receiver<EntitySnapshot>,
        decisions: mpsc::Sender<Decision>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            config,
            humans,
            zones,
            overrides,
            queue: Arc::new(Mutex::new(queue)),
            decisions,
            states: None,
            metrics,
        }
    }

    /// Write a coordination state for every fused window
    pub fn with_states(mut self, output: mpsc::Sender<OutputRecord>) -> Self {
        self.states = Some(output);
        self
    }

    /// Run under supervision; resolves once the queue is drained
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let worker = Arc::new(self);
            loop {
                let run = tokio::spawn(Arc::clone(&worker).run_once());
                match run.await {
                    Ok(Exit::Drained) => {
                        debug!(partition = worker.id, "partition drained");
                        break;
                    }
                    Ok(Exit::OutputClosed) => {
                        info!(partition = worker.id, "decision consumer closed, partition stopping");
                        break;
                    }
                    Err(e) if e.is_panic() => {
                        Metrics::inc(&worker.metrics.worker_restarts);
                        error!(
                            partition = worker.id,
                            "partition worker panicked, restarting with fresh state"
                        );
                    }
                    Err(e) => {
                        error!(partition = worker.id, error = %e, "partition worker cancelled");
                        break;
                    }
                }
            }
        })
    }

    async fn run_once(self: Arc<Self>) -> Exit {
        let mut processor = PartitionProcessor::new(
            self.id,
            &self.config,
            self.humans.clone(),
            self.zones.clone(),
            self.overrides.clone(),
        );
        // Held for the whole run; a tokio mutex is released on unwind
        let mut queue = self.queue.lock().await;

        let wall_clock = self.config.ingest.wall_clock;
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = queue.recv() => match next {
                    Some(snapshot) => {
                        let output = processor.on_robot(snapshot);
                        if !self.publish(output).await {
                            return Exit::OutputClosed;
                        }
                    }
                    None => {
                        let output = processor.flush();
                        return if self.publish(output).await {
                            Exit::Drained
                        } else {
                            Exit::OutputClosed
                        };
                    }
                },
                _ = tick.tick(), if wall_clock => {
                    let output = processor.on_tick(chrono::Utc::now().timestamp_millis());
                    if !self.publish(output).await {
                        return Exit::OutputClosed;
                    }
                }
            }
        }
    }

    async fn publish(&self, output: PartitionOutput) -> bool {
        let stats = output.stats;
        Metrics::add(&self.metrics.windows_fused, stats.windows_fused);
        Metrics::add(&self.metrics.windows_context_incomplete, stats.windows_incomplete);
        Metrics::add(&self.metrics.records_late, stats.late_events);
        Metrics::add(&self.metrics.stop_heartbeats, stats.stop_heartbeats);

        if let Some(states) = &self.states {
            for state in output.states {
                if states.send(OutputRecord::State(state)).await.is_err() {
                    debug!(partition = self.id, "output writer closed, states dropped");
                    break;
                }
            }
        }
        for decision in output.decisions {
            if self.decisions.send(decision).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, EntityKind, MotionState};

    fn robot(id: &str, timestamp: i64) -> EntitySnapshot {
        EntitySnapshot {
            id: id.to_string(),
            kind: EntityKind::Robot,
            zone_id: Some("zone-a".to_string()),
            x: 0.0,
            y: 0.0,
            velocity: 0.5,
            heading: 0.0,
            motion_state: MotionState::Moving,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override: false,
            timestamp,
        }
    }

    fn config() -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.ingest.wall_clock = false;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_worker_flushes_on_close() {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (decision_tx, mut decision_rx) = mpsc::channel(8);
        let metrics = Arc::new(Metrics::new());
        let worker = PartitionWorker::new(
            0,
            config(),
            HumanBoard::new(),
            ZoneBoard::new(),
            OverrideRegistry::new(),
            queue_rx,
            decision_tx,
            Arc::clone(&metrics),
        );
        let handle = worker.spawn();

        queue_tx.send(robot("robot-1", 100)).await.unwrap();
        drop(queue_tx);
        handle.await.unwrap();

        let decision = decision_rx.recv().await.unwrap();
        assert_eq!(decision.robot_id, "robot-1");
        assert_eq!(decision.action, Action::Continue);
        assert_eq!(Metrics::get(&metrics.windows_fused), 1);
        assert_eq!(Metrics::get(&metrics.worker_restarts), 0);
    }

    #[tokio::test]
    async fn test_worker_stops_when_output_closed() {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (decision_tx, decision_rx) = mpsc::channel(8);
        drop(decision_rx);
        let worker = PartitionWorker::new(
            1,
            config(),
            HumanBoard::new(),
            ZoneBoard::new(),
            OverrideRegistry::new(),
            queue_rx,
            decision_tx,
            Arc::new(Metrics::new()),
        );
        let handle = worker.spawn();

        queue_tx.send(robot("robot-1", 100)).await.unwrap();
        drop(queue_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_writes_states() {
        let (queue_tx, queue_rx) = mpsc::channel(8);
        let (decision_tx, _decision_rx) = mpsc::channel(8);
        let (state_tx, mut state_rx) = mpsc::channel(8);
        let worker = PartitionWorker::new(
            2,
            config(),
            HumanBoard::new(),
            ZoneBoard::new(),
            OverrideRegistry::new(),
            queue_rx,
            decision_tx,
            Arc::new(Metrics::new()),
        )
        .with_states(state_tx);
        let handle = worker.spawn();

        queue_tx.send(robot("robot-5", 100)).await.unwrap();
        queue_tx.send(robot("robot-5", 700)).await.unwrap();
        drop(queue_tx);
        handle.await.unwrap();

        let mut timestamps = Vec::new();
        while let Some(OutputRecord::State(state)) = state_rx.recv().await {
            assert_eq!(state.robot_id, "robot-5");
            timestamps.push(state.timestamp);
        }
        assert_eq!(timestamps, vec![200, 800]);
    }
}
