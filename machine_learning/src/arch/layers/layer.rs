use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Conv2d, Conv2dSpec, Linear, LinearSpec};
use crate::{
    Result,
    arch::Model,
    autograd::{Parameter, Tensor},
};

/// The specification for the `Layer` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d(Conv2dSpec),
    Linear(LinearSpec),
    Relu,
    Sigmoid,
}

pub enum Layer {
    Conv2d(Conv2d),
    Linear(Linear),
    Relu,
    Sigmoid,
}

impl Layer {
    /// Builds a layer from its spec, sampling its parameters if it has any.
    pub fn from_spec<R: Rng>(spec: &LayerSpec, rng: &mut R) -> Result<Self> {
        let layer = match spec {
            LayerSpec::Conv2d(spec) => Layer::Conv2d(Conv2d::new(spec, rng)?),
            LayerSpec::Linear(spec) => Layer::Linear(Linear::new(spec, rng)?),
            LayerSpec::Relu => Layer::Relu,
            LayerSpec::Sigmoid => Layer::Sigmoid,
        };

        Ok(layer)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Conv2d(l) => l.forward(x),
            Layer::Linear(l) => l.forward(x),
            Layer::Relu => Ok(x.relu()),
            Layer::Sigmoid => Ok(x.sigmoid()),
        }
    }
}

impl Model for Layer {
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        match self {
            Layer::Conv2d(l) => l.named_parameters(),
            Layer::Linear(l) => l.named_parameters(),
            Layer::Relu | Layer::Sigmoid => Vec::new(),
        }
    }
}
