use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    arch::Model,
    autograd::{Parameter, Tensor},
    initialization::ParamInit,
};

/// The specification for a `Linear` layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearSpec {
    pub in_features: usize,
    pub out_features: usize,
    #[serde(default = "default_bias")]
    pub bias: bool,
    #[serde(default = "default_init")]
    pub init: ParamInit,
}

fn default_bias() -> bool {
    true
}

fn default_init() -> ParamInit {
    ParamInit::LecunUniform
}

/// A fully connected layer, `y = x · wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    /// Creates a new `Linear` with freshly sampled parameters.
    ///
    /// # Arguments
    /// * `spec` - The layer's specification.
    /// * `rng` - The random number generator used to initialize the parameters.
    pub fn new<R: Rng>(spec: &LinearSpec, rng: &mut R) -> Result<Self> {
        let fan_in = spec.in_features;
        let weight_shape = [spec.out_features, spec.in_features];

        let weight = Parameter::new(spec.init.sample(rng, &weight_shape, fan_in)?);
        let bias = if spec.bias {
            let b = spec.init.sample(rng, &[spec.out_features], fan_in)?;
            Some(Parameter::new(b))
        } else {
            None
        };

        Ok(Self { weight, bias })
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let weight = Tensor::from_param(&self.weight);
        let bias = self.bias.as_ref().map(Tensor::from_param);
        x.linear(&weight, bias.as_ref())
    }
}

impl Model for Linear {
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut params = vec![("weight".to_string(), self.weight.clone())];
        params.extend(self.bias.iter().map(|b| ("bias".to_string(), b.clone())));
        params
    }
}
