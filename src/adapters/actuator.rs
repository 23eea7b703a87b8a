//! Actuation feedback to the telemetry source
//!
//! Decisions are forwarded as `POST {url}/decision` with `{robot_id, action}`.
//! The call is idempotent; the published decision stays authoritative.

use crate::config::ActuatorConfig;
use crate::domain::{Action, Decision};
use crate::error::{CoSenseError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Command carried to the actuator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationCommand {
    pub robot_id: String,
    pub action: Action,
}

impl From<&Decision> for ActuationCommand {
    fn from(decision: &Decision) -> Self {
        Self {
            robot_id: decision.robot_id.clone(),
            action: decision.action,
        }
    }
}

/// Anything that can apply an action to a robot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn send(&self, command: &ActuationCommand) -> Result<()>;
}

/// HTTP actuator client
#[derive(Clone)]
pub struct HttpActuator {
    client: Client,
    endpoint: String,
}

impl HttpActuator {
    pub fn new(config: &ActuatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/decision", config.url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn send(&self, command: &ActuationCommand) -> Result<()> {
        let resp = self.client.post(&self.endpoint).json(command).send().await?;

        if resp.status().is_success() {
            debug!(robot_id = %command.robot_id, action = %command.action, "actuation delivered");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(CoSenseError::Actuation(format!("HTTP {}: {}", status, body)))
        }
    }
}

/// Actuator used when feedback is disabled
#[derive(Debug, Clone, Default)]
pub struct NoopActuator;

#[async_trait]
impl Actuator for NoopActuator {
    async fn send(&self, _command: &ActuationCommand) -> Result<()> {
        Ok(())
    }
}

/// Send with bounded attempts and a fixed backoff; returns the last error
pub async fn deliver_with_retry(
    actuator: &dyn Actuator,
    command: &ActuationCommand,
    max_attempts: u32,
    backoff: Duration,
) -> Result<()> {
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match actuator.send(command).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                debug!(
                    robot_id = %command.robot_id,
                    attempt,
                    error = %e,
                    "actuation attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    robot_id = %command.robot_id,
                    action = %command.action,
                    attempts,
                    error = %e,
                    "actuation failed"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> ActuationCommand {
        ActuationCommand {
            robot_id: "robot-1".to_string(),
            action: Action::Stop,
        }
    }

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_value(command()).unwrap();
        assert_eq!(json, serde_json::json!({"robot_id": "robot-1", "action": "STOP"}));
    }

    #[test]
    fn test_endpoint_path() {
        let config = ActuatorConfig {
            url: "http://simulator:8000/".to_string(),
            ..ActuatorConfig::default()
        };
        let actuator = HttpActuator::new(&config).unwrap();
        assert_eq!(actuator.endpoint(), "http://simulator:8000/decision");
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let mut mock = MockActuator::new();
        let mut calls = 0;
        mock.expect_send().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(CoSenseError::Actuation("connection refused".to_string()))
            } else {
                Ok(())
            }
        });

        let result = deliver_with_retry(&mock, &command(), 2, Duration::from_millis(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut mock = MockActuator::new();
        mock.expect_send()
            .times(2)
            .returning(|_| Err(CoSenseError::Actuation("unreachable".to_string())));

        let result = deliver_with_retry(&mock, &command(), 2, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(CoSenseError::Actuation(_))));
    }
}
