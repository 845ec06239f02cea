//! CloudWatch composite alarm state for pausing rollouts
//!
//! Production code uses `CloudWatchAlarmProvider` against the AWS API
//! with ambient credentials. Tests use `MockAlarmProvider` which returns
//! preconfigured states.

use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{AlarmType, StateValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("alarm not found: {0}")]
    NotFound(String),

    #[error("multiple alarms found for name: {0}")]
    Ambiguous(String),

    #[error("CloudWatch API error: {0}")]
    Api(String),
}

/// Reduced alarm state. Only `Alarm` pauses a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
}

/// Trait for looking up the state of a composite alarm by name.
#[async_trait]
pub trait AlarmStateProvider: Send + Sync {
    async fn alarm_state(&self, alarm_name: &str) -> Result<AlarmState, AlarmError>;
}

/// Production provider backed by the CloudWatch DescribeAlarms API.
///
/// No caching: each ZAU reconcile performs at most one lookup.
#[derive(Clone)]
pub struct CloudWatchAlarmProvider {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchAlarmProvider {
    pub fn new(client: aws_sdk_cloudwatch::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlarmStateProvider for CloudWatchAlarmProvider {
    async fn alarm_state(&self, alarm_name: &str) -> Result<AlarmState, AlarmError> {
        let output = self
            .client
            .describe_alarms()
            .alarm_names(alarm_name)
            .alarm_types(AlarmType::CompositeAlarm)
            .send()
            .await
            .map_err(|e| AlarmError::Api(e.to_string()))?;

        let alarms = output.composite_alarms();
        if alarms.is_empty() {
            return Err(AlarmError::NotFound(alarm_name.to_string()));
        }
        if alarms.len() > 1 {
            return Err(AlarmError::Ambiguous(alarm_name.to_string()));
        }

        match alarms[0].state_value() {
            Some(StateValue::Alarm) => Ok(AlarmState::Alarm),
            Some(StateValue::Ok) => Ok(AlarmState::Ok),
            _ => Ok(AlarmState::InsufficientData),
        }
    }
}

/// Mock alarm provider for testing
#[cfg(test)]
pub struct MockAlarmProvider {
    state: std::sync::Mutex<Result<AlarmState, AlarmError>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockAlarmProvider {
    pub fn with_state(state: AlarmState) -> Self {
        Self {
            state: std::sync::Mutex::new(Ok(state)),
        }
    }

    pub fn with_error(error: AlarmError) -> Self {
        Self {
            state: std::sync::Mutex::new(Err(error)),
        }
    }

    pub fn set_state(&self, state: AlarmState) {
        *self.state.lock().expect("MockAlarmProvider lock poisoned") = Ok(state);
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::expect_used)]
impl AlarmStateProvider for MockAlarmProvider {
    async fn alarm_state(&self, _alarm_name: &str) -> Result<AlarmState, AlarmError> {
        match &*self.state.lock().expect("MockAlarmProvider lock poisoned") {
            Ok(state) => Ok(*state),
            Err(AlarmError::NotFound(n)) => Err(AlarmError::NotFound(n.clone())),
            Err(AlarmError::Ambiguous(n)) => Err(AlarmError::Ambiguous(n.clone())),
            Err(AlarmError::Api(m)) => Err(AlarmError::Api(m.clone())),
        }
    }
}
