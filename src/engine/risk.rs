//! Weighted multi-factor risk model

use crate::config::RiskConfig;
use crate::domain::{FusedWindow, ReasonCode};
use serde::Serialize;

/// Individual risk factor, in weight order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Proximity,
    RelativeSpeed,
    Visibility,
    Beacon,
    Congestion,
    SensorDisagreement,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; 6] = [
        RiskFactor::Proximity,
        RiskFactor::RelativeSpeed,
        RiskFactor::Visibility,
        RiskFactor::Beacon,
        RiskFactor::Congestion,
        RiskFactor::SensorDisagreement,
    ];

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            RiskFactor::Proximity => ReasonCode::CloseProximity,
            RiskFactor::RelativeSpeed => ReasonCode::HighRelativeSpeed,
            RiskFactor::Visibility => ReasonCode::LowVisibility,
            RiskFactor::Beacon => ReasonCode::BleProximityDetected,
            RiskFactor::Congestion => ReasonCode::HighCongestion,
            RiskFactor::SensorDisagreement => ReasonCode::SensorDisagreement,
        }
    }
}

/// One factor's normalized value and weighted contribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorScore {
    pub factor: RiskFactor,
    /// Normalized to [0, 1]
    pub value: f64,
    /// value * weight
    pub contribution: f64,
    /// Factor crossed its reason-code threshold
    pub triggered: bool,
}

/// Scored window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// Clamped to [0, 1]
    pub score: f64,
    pub factors: Vec<FactorScore>,
}

impl RiskAssessment {
    /// Triggered factors' reason codes, strongest contribution first.
    /// `[NONE]` when nothing triggered.
    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        let mut triggered: Vec<&FactorScore> = self.factors.iter().filter(|f| f.triggered).collect();
        triggered.sort_by(|a, b| {
            b.contribution
                .total_cmp(&a.contribution)
                .then_with(|| a.factor.cmp(&b.factor))
        });
        if triggered.is_empty() {
            return vec![ReasonCode::None];
        }
        triggered.iter().map(|f| f.factor.reason_code()).collect()
    }

    pub fn primary_reason(&self) -> ReasonCode {
        self.reason_codes()
            .first()
            .copied()
            .unwrap_or(ReasonCode::None)
    }

    pub fn contribution(&self, factor: RiskFactor) -> f64 {
        self.factors
            .iter()
            .find(|f| f.factor == factor)
            .map(|f| f.contribution)
            .unwrap_or(0.0)
    }
}

/// Linear falloff: 1 at or inside `critical`, 0 at or beyond `range`
pub fn proximity_factor(distance: f64, critical: f64, range: f64) -> f64 {
    if !distance.is_finite() || distance >= range {
        return 0.0;
    }
    if distance <= critical {
        return 1.0;
    }
    ((range - distance) / (range - critical)).clamp(0.0, 1.0)
}

/// Pure scoring of fused windows
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn score(&self, window: &FusedWindow) -> RiskAssessment {
        let cfg = &self.config;
        let w = &cfg.weights;
        let distance = window.nearest_human_distance;

        let proximity = proximity_factor(distance, cfg.proximity_critical_m, cfg.proximity_range_m);

        let closing = if window.has_human() {
            window.relative_velocity.max(0.0)
        } else {
            0.0
        };
        let relative_speed = (closing / cfg.max_closing_speed_ms).clamp(0.0, 1.0);

        // Fallback zone context never asserts visibility or congestion
        let (visibility, congestion) = if window.context_incomplete {
            (0.0, 0.0)
        } else {
            (
                window.zone.visibility.penalty(),
                window.zone.congestion.clamp(0.0, 1.0),
            )
        };

        let beacon = window
            .beacon_distance
            .map(|d| proximity_factor(d, cfg.proximity_critical_m, cfg.proximity_range_m))
            .unwrap_or(0.0);

        let disagreement = if window.sensor_disagreement { 1.0 } else { 0.0 };

        let factors = vec![
            factor(
                RiskFactor::Proximity,
                proximity,
                w.proximity,
                distance < cfg.proximity_warning_m,
            ),
            factor(
                RiskFactor::RelativeSpeed,
                relative_speed,
                w.relative_speed,
                closing > cfg.speed_warning_ms,
            ),
            factor(
                RiskFactor::Visibility,
                visibility,
                w.visibility,
                visibility >= 0.5,
            ),
            factor(
                RiskFactor::Beacon,
                beacon,
                w.beacon,
                window
                    .beacon_distance
                    .is_some_and(|d| d < cfg.proximity_warning_m),
            ),
            factor(
                RiskFactor::Congestion,
                congestion,
                w.congestion,
                !window.context_incomplete && congestion >= cfg.congestion_warning,
            ),
            factor(
                RiskFactor::SensorDisagreement,
                disagreement,
                w.sensor_disagreement,
                window.sensor_disagreement,
            ),
        ];

        let score = factors
            .iter()
            .map(|f| f.contribution)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        RiskAssessment { score, factors }
    }
}

fn factor(factor: RiskFactor, value: f64, weight: f64, triggered: bool) -> FactorScore {
    FactorScore {
        factor,
        value,
        contribution: value * weight,
        triggered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Connectivity, EntityKind, EntitySnapshot, MotionState, Visibility, ZoneSnapshot,
    };
    use std::sync::Arc;

    fn window(distance: f64, closing: f64) -> FusedWindow {
        let robot = EntitySnapshot {
            id: "robot-1".to_string(),
            kind: EntityKind::Robot,
            zone_id: Some("zone-a".to_string()),
            x: 0.0,
            y: 0.0,
            velocity: 1.0,
            heading: 0.0,
            motion_state: MotionState::Moving,
            ultrasonic_distance: None,
            beacon_signal: None,
            destination: None,
            manual_override: false,
            timestamp: 1_000,
        };
        FusedWindow {
            robot_id: "robot-1".to_string(),
            window_start: 1_000,
            window_end: 1_200,
            robot: Arc::new(robot),
            nearest_human_id: distance.is_finite().then(|| "human-1".to_string()),
            nearest_human_distance: distance,
            relative_velocity: closing,
            zone: Arc::new(ZoneSnapshot {
                zone_id: "zone-a".to_string(),
                visibility: Visibility::Normal,
                connectivity: Connectivity::Normal,
                congestion: 0.0,
                robot_count: 1,
                human_count: 1,
                timestamp: 1_000,
            }),
            context_incomplete: false,
            beacon_distance: None,
            sensor_disagreement: false,
            event_count: 1,
        }
    }

    #[test]
    fn test_proximity_factor_is_monotonic() {
        assert_eq!(proximity_factor(1.0, 1.5, 6.0), 1.0);
        assert_eq!(proximity_factor(6.0, 1.5, 6.0), 0.0);
        assert_eq!(proximity_factor(f64::INFINITY, 1.5, 6.0), 0.0);
        let near = proximity_factor(2.0, 1.5, 6.0);
        let far = proximity_factor(4.0, 1.5, 6.0);
        assert!(near > far && far > 0.0);
    }

    #[test]
    fn test_no_human_scores_zero() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let assessment = scorer.score(&window(f64::INFINITY, 0.0));
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.reason_codes(), vec![ReasonCode::None]);
    }

    #[test]
    fn test_reason_codes_ordered_by_contribution() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let mut w = window(1.0, 2.4);
        w.zone = Arc::new(ZoneSnapshot {
            visibility: Visibility::Poor,
            ..(*w.zone).clone()
        });

        let assessment = scorer.score(&w);
        // 0.35 + 0.8 * 0.25 + 0.15
        assert!((assessment.score - 0.70).abs() < 1e-9);
        assert_eq!(
            assessment.reason_codes(),
            vec![
                ReasonCode::CloseProximity,
                ReasonCode::HighRelativeSpeed,
                ReasonCode::LowVisibility
            ]
        );
        assert_eq!(assessment.primary_reason(), ReasonCode::CloseProximity);
    }

    #[test]
    fn test_incomplete_context_asserts_no_zone_factors() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let mut w = window(f64::INFINITY, 0.0);
        w.context_incomplete = true;
        w.zone = Arc::new(ZoneSnapshot {
            congestion: 0.9,
            visibility: Visibility::Poor,
            ..(*w.zone).clone()
        });

        let assessment = scorer.score(&w);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.contribution(RiskFactor::Congestion), 0.0);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let mut w = window(0.5, 10.0);
        w.zone = Arc::new(ZoneSnapshot {
            congestion: 1.0,
            visibility: Visibility::Poor,
            ..(*w.zone).clone()
        });
        w.beacon_distance = Some(0.5);
        w.sensor_disagreement = true;

        let assessment = scorer.score(&w);
        assert!(assessment.score <= 1.0);
        assert!((assessment.score - 1.0).abs() < 1e-9);
        assert_eq!(assessment.reason_codes().len(), 6);
    }
}
