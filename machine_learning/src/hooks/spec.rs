use log::Level;
use serde::{Deserialize, Serialize};

use super::DetectionStrategy;
use crate::clip::GradClipSpec;

/// The specification for the `OptimizerHook`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerHookSpec {
    #[serde(default)]
    pub grad_clip: Option<GradClipSpec>,
    #[serde(default)]
    pub detect_anomalous_params: bool,
    #[serde(default)]
    pub detection: DetectionStrategy,
    #[serde(default = "default_anomaly_log_level")]
    pub anomaly_log_level: Level,
}

fn default_anomaly_log_level() -> Level {
    Level::Info
}

impl Default for OptimizerHookSpec {
    fn default() -> Self {
        Self {
            grad_clip: None,
            detect_anomalous_params: false,
            detection: DetectionStrategy::default(),
            anomaly_log_level: default_anomaly_log_level(),
        }
    }
}
