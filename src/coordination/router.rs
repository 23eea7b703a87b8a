//! Record routing
//!
//! Robot telemetry goes to the partition owning the robot id; human and zone
//! records are published to the shared boards every partition reads.

use crate::domain::{EntitySnapshot, InputRecord};
use crate::engine::{HumanBoard, ZoneBoard};
use crate::error::{CoSenseError, Result};
use crate::services::Metrics;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// Stable partition index for a robot id
pub fn partition_for(robot_id: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    robot_id.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

pub struct RecordRouter {
    partitions: Vec<mpsc::Sender<EntitySnapshot>>,
    humans: HumanBoard,
    zones: ZoneBoard,
    metrics: Arc<Metrics>,
}

impl RecordRouter {
    pub fn new(
        partitions: Vec<mpsc::Sender<EntitySnapshot>>,
        humans: HumanBoard,
        zones: ZoneBoard,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            partitions,
            humans,
            zones,
            metrics,
        }
    }

    /// Route one record; waits when the owning partition queue is full
    pub async fn route(&self, record: InputRecord) -> Result<()> {
        Metrics::inc(&self.metrics.records_ingested);
        self.metrics.touch();

        match record {
            InputRecord::Robot(snapshot) => {
                let index = partition_for(&snapshot.id, self.partitions.len());
                trace!(robot_id = %snapshot.id, partition = index, "routing robot telemetry");
                self.partitions[index]
                    .send(snapshot)
                    .await
                    .map_err(|_| CoSenseError::ChannelClosed(format!("partition {}", index)))
            }
            InputRecord::Human(snapshot) => {
                let id = snapshot.id.clone();
                self.humans.publish(&id, snapshot);
                Ok(())
            }
            InputRecord::Zone(zone) => {
                let id = zone.zone_id.clone();
                self.zones.publish(&id, zone);
                Ok(())
            }
        }
    }

    /// Consume records until every sender is gone or `stop` flips.
    ///
    /// On stop, records already queued are still routed. Dropping the router
    /// afterwards closes the partition queues.
    pub async fn run_until(
        self,
        mut rx: mpsc::Receiver<InputRecord>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(record) => self.route(record).await?,
                    None => return Ok(()),
                },
                _ = stopped(&mut stop) => break,
            }
        }

        rx.close();
        while let Some(record) = rx.recv().await {
            self.route(record).await?;
        }
        Ok(())
    }
}

pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityKind, MotionState, ZoneSnapshot};

    fn robot(id: &str) -> EntitySnapshot {
        EntitySnapshot {
            id: id.to_string(),
            kind: EntityKind::Robot,
            zone_id: None,
            x: 0.0,
            y: 0.0,
            velocity: 0.0,
            heading: 0.0,
            motion_state: MotionState::Stopped,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override: false,
            timestamp: 0,
        }
    }

    #[test]
    fn test_partition_is_stable() {
        for id in ["robot-1", "robot-2", "robot-99"] {
            let p = partition_for(id, 4);
            assert!(p < 4);
            assert_eq!(p, partition_for(id, 4));
        }
        assert_eq!(partition_for("robot-1", 1), 0);
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let (tx0, mut rx0) = mpsc::channel(4);
        let (tx1, mut rx1) = mpsc::channel(4);
        let humans = HumanBoard::new();
        let zones = ZoneBoard::new();
        let metrics = Arc::new(Metrics::new());
        let router = RecordRouter::new(vec![tx0, tx1], humans.clone(), zones.clone(), Arc::clone(&metrics));

        router.route(InputRecord::Robot(robot("robot-1"))).await.unwrap();
        router
            .route(InputRecord::Zone(ZoneSnapshot::fallback("zone-a")))
            .await
            .unwrap();

        let expected = partition_for("robot-1", 2);
        let routed = if expected == 0 { rx0.try_recv() } else { rx1.try_recv() };
        assert_eq!(routed.unwrap().id, "robot-1");
        assert!(zones.get("zone-a").is_some());
        assert!(humans.is_empty());
        assert_eq!(Metrics::get(&metrics.records_ingested), 2);
    }

    #[tokio::test]
    async fn test_stop_routes_queued_records() {
        let (partition_tx, mut partition_rx) = mpsc::channel(8);
        let router = RecordRouter::new(
            vec![partition_tx],
            HumanBoard::new(),
            ZoneBoard::new(),
            Arc::new(Metrics::new()),
        );
        let (record_tx, record_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        record_tx.send(InputRecord::Robot(robot("robot-1"))).await.unwrap();
        record_tx.send(InputRecord::Robot(robot("robot-2"))).await.unwrap();
        stop_tx.send(true).unwrap();

        // A sender is still alive; the stop alone ends the run
        tokio_test::assert_ok!(router.run_until(record_rx, stop_rx).await);

        assert_eq!(partition_rx.recv().await.unwrap().id, "robot-1");
        assert_eq!(partition_rx.recv().await.unwrap().id, "robot-2");
        assert!(partition_rx.recv().await.is_none());
        drop(record_tx);
    }
}
