use std::{fs, path::Path};

use anyhow::Context;
use machine_learning::{
    hooks::OptimizerHookSpec,
    optimization::OptimizerSpec,
};
use serde::{Deserialize, Serialize};

/// Which output of the `BranchNet` the loss is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossBranch {
    /// Only the stem takes part, every other layer is anomalous.
    Stem,
    /// Stem and head take part, only the side branch is anomalous.
    #[default]
    Head,
    /// `Stem` on even iterations and `Head` on odd ones.
    Alternate,
}

impl LossBranch {
    /// Returns whether the head takes part in the loss of iteration `iter`.
    pub fn uses_head(&self, iter: usize) -> bool {
        match self {
            LossBranch::Stem => false,
            LossBranch::Head => true,
            LossBranch::Alternate => iter % 2 == 1,
        }
    }
}

/// The dimensions of the `BranchNet`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub batch_size: usize,
    pub in_channels: usize,
    pub hidden_channels: usize,
    pub image_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            in_channels: 1,
            hidden_channels: 2,
            image_size: 4,
        }
    }
}

/// Everything the runner needs to train the demo network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub iterations: usize,
    pub seed: u64,
    pub optimizer: OptimizerSpec,
    pub hook: OptimizerHookSpec,
    pub model: ModelConfig,
    pub loss_branch: LossBranch,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            iterations: 4,
            seed: 42,
            optimizer: OptimizerSpec::GradientDescent {
                learning_rate: 0.01,
            },
            hook: OptimizerHookSpec {
                detect_anomalous_params: true,
                ..OptimizerHookSpec::default()
            },
            model: ModelConfig::default(),
            loss_branch: LossBranch::default(),
        }
    }
}

impl RunnerConfig {
    /// Reads a `RunnerConfig` from a json file. Missing fields take their default value.
    ///
    /// # Arguments
    /// * `path` - The path of the json file.
    ///
    /// # Returns
    /// The config or an error if the file can't be read or parsed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;

        Self::from_json(&raw).with_context(|| format!("invalid config at {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
