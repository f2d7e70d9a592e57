use machine_learning::{
    Result,
    arch::{
        Model, Sequential,
        layers::{Conv2d, Conv2dSpec, LayerSpec},
        prefixed,
    },
    autograd::{Parameter, Tensor},
};
use rand::Rng;

use crate::config::ModelConfig;

/// A small convolutional network with a side branch that never takes part in `forward`.
///
/// `stem` maps the input to `hidden_channels`, `head` refines the stem's output and `side`
/// mirrors the stem but its output is discarded, so its parameters never receive a gradient.
pub struct BranchNet {
    stem: Conv2d,
    head: Sequential,
    side: Conv2d,
}

impl BranchNet {
    /// Creates a new `BranchNet`.
    ///
    /// # Arguments
    /// * `config` - The network's dimensions.
    /// * `rng` - The random number generator used to initialize the parameters.
    ///
    /// # Returns
    /// An error if any layer fails to initialize.
    pub fn new<R: Rng>(config: &ModelConfig, rng: &mut R) -> Result<Self> {
        let ModelConfig {
            in_channels,
            hidden_channels,
            ..
        } = *config;

        let stem = Conv2d::new(
            &Conv2dSpec::new(in_channels, hidden_channels, 3).with_padding(1),
            rng,
        )?;
        let head = Sequential::from_specs(
            &[
                LayerSpec::Conv2d(
                    Conv2dSpec::new(hidden_channels, hidden_channels, 3).with_padding(1),
                ),
                LayerSpec::Relu,
            ],
            rng,
        )?;
        let side = Conv2d::new(
            &Conv2dSpec::new(in_channels, hidden_channels, 3).with_padding(1),
            rng,
        )?;

        Ok(Self { stem, head, side })
    }

    pub fn forward_stem(&self, x: &Tensor) -> Result<Tensor> {
        self.stem.forward(x)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.head.forward(&self.stem.forward(x)?)
    }

    #[cfg(test)]
    pub(crate) fn side(&self) -> &Conv2d {
        &self.side
    }
}

impl Model for BranchNet {
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut params = prefixed("stem", &self.stem);
        params.extend(prefixed("head", &self.head));
        params.extend(prefixed("side", &self.side));
        params
    }
}
