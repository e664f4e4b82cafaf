//! Controller capabilities and initial state consumed by the admin command processor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::FeatureValues;

/// How the controller signals completions to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InterruptMode {
    /// Legacy pin-based INTx. Vector indices in Create I/O CQ are not checked.
    Pin,
    /// MSI-X with `vectors` table entries.
    Msix { vectors: u16 },
}

/// Static configuration of an emulated controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Size of the SQ and CQ descriptor tables, admin queue pair included.
    pub max_queues: u16,
    /// CAP.MQES: maximum queue entries, zero-based.
    pub mqes: u16,
    /// CAP.CQR: I/O queues must be physically contiguous.
    pub contiguous_queues_required: bool,
    pub interrupts: InterruptMode,
    /// Maximum number of outstanding Abort commands, controller wide and per SQ.
    pub abort_command_limit: u8,
    /// Maximum number of outstanding Asynchronous Event Requests.
    pub async_event_request_limit: u8,
    pub features: FeatureValues,
}

impl ControllerConfig {
    pub const DEFAULT_MAX_QUEUES: u16 = 64;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queues < 2 {
            return Err(ConfigError::TooFewQueues(self.max_queues));
        }
        if self.mqes == 0 {
            return Err(ConfigError::QueueTooSmall);
        }
        if self.mqes == u16::MAX {
            return Err(ConfigError::QueueTooLarge);
        }
        if self.abort_command_limit == 0 {
            return Err(ConfigError::ZeroLimit("abort_command_limit"));
        }
        if self.async_event_request_limit == 0 {
            return Err(ConfigError::ZeroLimit("async_event_request_limit"));
        }
        if let InterruptMode::Msix { vectors: 0 } = self.interrupts {
            return Err(ConfigError::NoInterruptVectors);
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let max_queues = Self::DEFAULT_MAX_QUEUES;
        ControllerConfig {
            max_queues,
            mqes: 127, // 128 entries max per queue, expressed as 0-based.
            contiguous_queues_required: true,
            interrupts: InterruptMode::Msix { vectors: 16 },
            abort_command_limit: 4,
            async_event_request_limit: 4,
            features: FeatureValues {
                number_of_queues: FeatureValues::number_of_queues_for(max_queues),
                ..FeatureValues::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_queues must cover the admin queue plus at least one I/O queue (got {0})")]
    TooFewQueues(u16),

    #[error("mqes must allow at least two queue entries")]
    QueueTooSmall,

    #[error("mqes must leave room for a 16-bit entry count")]
    QueueTooLarge,

    #[error("{0} must be non-zero")]
    ZeroLimit(&'static str),

    #[error("MSI-X interrupts configured without any vectors")]
    NoInterruptVectors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        // 63 I/O SQs and CQs, both reported zero-based.
        assert_eq!(config.features.number_of_queues, (62 << 16) | 62);
    }

    #[test]
    fn validate_rejects_degenerate_limits() {
        let mut config = ControllerConfig {
            max_queues: 1,
            ..ControllerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TooFewQueues(1)));

        config.max_queues = 8;
        config.abort_command_limit = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit("abort_command_limit"))
        );

        config.abort_command_limit = 1;
        config.interrupts = InterruptMode::Msix { vectors: 0 };
        assert_eq!(config.validate(), Err(ConfigError::NoInterruptVectors));
    }

    #[test]
    fn config_deserializes_with_defaults_for_missing_fields() {
        let config: ControllerConfig = serde_json::from_str(
            r#"{ "max_queues": 8, "interrupts": { "mode": "pin" } }"#,
        )
        .unwrap();
        assert_eq!(config.max_queues, 8);
        assert_eq!(config.interrupts, InterruptMode::Pin);
        assert_eq!(config.mqes, ControllerConfig::default().mqes);

        let json = serde_json::to_string(&config).unwrap();
        let back: ControllerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
