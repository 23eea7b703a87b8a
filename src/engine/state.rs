//! Entity state tracking
//!
//! Robot state is owned by the partition worker that handles the robot, so it
//! lives in a plain map. Human and zone state is read by every partition; it is
//! published through [`SnapshotBoard`], where writers replace the stored `Arc`
//! with a new immutable snapshot and readers clone the `Arc` they find.

use crate::domain::{EntitySnapshot, ZoneSnapshot};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Latest snapshot per entity id, last write wins by arrival order
#[derive(Debug, Default)]
pub struct EntityStateTracker {
    entities: HashMap<String, Arc<EntitySnapshot>>,
}

impl EntityStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored state for the snapshot's entity id
    pub fn upsert(&mut self, snapshot: EntitySnapshot) -> Arc<EntitySnapshot> {
        let snapshot = Arc::new(snapshot);
        self.entities
            .insert(snapshot.id.clone(), Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<Arc<EntitySnapshot>> {
        self.entities.get(id).cloned()
    }

    /// Explicit entity removal
    pub fn remove(&mut self, id: &str) -> Option<Arc<EntitySnapshot>> {
        self.entities.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Cross-partition store of immutable snapshots, replaced wholesale on update
#[derive(Debug)]
pub struct SnapshotBoard<T> {
    entries: Arc<DashMap<String, Arc<T>>>,
}

impl<T> Clone for SnapshotBoard<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for SnapshotBoard<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<T> SnapshotBoard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot for `id`, superseding the previous one
    pub fn publish(&self, id: &str, snapshot: T) -> Arc<T> {
        let snapshot = Arc::new(snapshot);
        self.entries.insert(id.to_string(), Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.entries.remove(id).map(|(_, snapshot)| snapshot)
    }

    /// All currently published snapshots
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type HumanBoard = SnapshotBoard<EntitySnapshot>;
pub type ZoneBoard = SnapshotBoard<ZoneSnapshot>;

/// Who placed a robot under manual override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSource {
    /// Operator request through the API
    Operator,
    /// Reported by the robot's own telemetry
    Telemetry,
}

/// Robots externally stopped by an operator; the mapper never commands them
#[derive(Debug, Clone, Default)]
pub struct OverrideRegistry {
    robots: Arc<DashMap<String, OverrideSource>>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, robot_id: &str, source: OverrideSource) {
        if self.robots.insert(robot_id.to_string(), source).is_none() {
            info!(robot_id, ?source, "manual override engaged");
        }
    }

    /// Clear an override; returns false if none was set
    pub fn clear(&self, robot_id: &str) -> bool {
        let cleared = self.robots.remove(robot_id).is_some();
        if cleared {
            info!(robot_id, "manual override cleared");
        }
        cleared
    }

    /// Apply the override flag reported in telemetry.
    ///
    /// Telemetry can only clear an override it set itself; operator overrides
    /// stay until cleared through the API.
    pub fn sync_from_telemetry(&self, robot_id: &str, flagged: bool) {
        if flagged {
            self.set(robot_id, OverrideSource::Telemetry);
            return;
        }
        let from_telemetry = self
            .robots
            .get(robot_id)
            .map(|source| *source == OverrideSource::Telemetry)
            .unwrap_or(false);
        if from_telemetry {
            debug!(robot_id, "telemetry no longer reports manual override");
            self.clear(robot_id);
        }
    }

    pub fn is_overridden(&self, robot_id: &str) -> bool {
        self.robots.contains_key(robot_id)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.robots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
