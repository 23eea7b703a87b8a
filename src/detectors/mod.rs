//! Anomaly detectors over window aggregates
//!
//! - Rate spike: decision count above a trailing forecast bound (zone scope)
//! - Repeated stop: several STOP onsets for one robot within a sliding window
//! - Sensor disagreement: decisions driven by conflicting sensors (zone scope)
//!
//! Detectors run independently; one aggregate may raise several alerts.

pub mod forecast;
pub mod rate_spike;
pub mod repeated_stop;
pub mod sensor_disagreement;

pub use forecast::{Forecast, Forecaster, StandardScoreForecaster, TrailingHistory};
pub use rate_spike::RateSpikeDetector;
pub use repeated_stop::RepeatedStopDetector;
pub use sensor_disagreement::SensorDisagreementDetector;

use crate::config::AnomalyConfig;
use crate::domain::{AnomalyAlert, WindowAggregate};

pub struct AnomalyDetector {
    rate_spike: RateSpikeDetector,
    repeated_stop: RepeatedStopDetector,
    sensor_disagreement: SensorDisagreementDetector,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            repeated_stop: RepeatedStopDetector::new(&config),
            sensor_disagreement: SensorDisagreementDetector::new(&config),
            rate_spike: RateSpikeDetector::new(config),
        }
    }

    pub fn with_forecaster(config: AnomalyConfig, forecaster: Box<dyn Forecaster>) -> Self {
        Self {
            repeated_stop: RepeatedStopDetector::new(&config),
            sensor_disagreement: SensorDisagreementDetector::new(&config),
            rate_spike: RateSpikeDetector::with_forecaster(config, forecaster),
        }
    }

    /// Run every detector over a closed aggregate
    pub fn observe(&mut self, aggregate: &WindowAggregate) -> Vec<AnomalyAlert> {
        [
            self.rate_spike.observe(aggregate),
            self.sensor_disagreement.observe(aggregate),
            self.repeated_stop.observe(aggregate),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
