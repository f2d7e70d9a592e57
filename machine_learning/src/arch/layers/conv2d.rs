use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    arch::Model,
    autograd::{Conv2dGeometry, Parameter, Tensor},
    initialization::ParamInit,
};

/// The specification for a `Conv2d` layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conv2dSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    #[serde(flatten)]
    pub geometry: Conv2dGeometry,
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

impl Conv2dSpec {
    /// Returns a spec with unit stride and dilation, no padding, bias and LeCun initialization.
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            geometry: Conv2dGeometry::default(),
            bias: default_bias(),
            init: default_init(),
        }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.geometry.padding = padding;
        self
    }
}

/// A 2d convolution over NCHW batches.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Parameter,
    bias: Option<Parameter>,
    geometry: Conv2dGeometry,
}

impl Conv2d {
    /// Creates a new `Conv2d` with freshly sampled parameters.
    ///
    /// # Arguments
    /// * `spec` - The layer's specification.
    /// * `rng` - The random number generator used to initialize the parameters.
    ///
    /// # Returns
    /// An error if the initialization distribution is invalid.
    pub fn new<R: Rng>(spec: &Conv2dSpec, rng: &mut R) -> Result<Self> {
        let k = spec.kernel_size;
        let fan_in = spec.in_channels * k * k;

        let weight_shape = [spec.out_channels, spec.in_channels, k, k];
        let weight = Parameter::new(spec.init.sample(rng, &weight_shape, fan_in)?);
        let bias = if spec.bias {
            let b = spec.init.sample(rng, &[spec.out_channels], fan_in)?;
            Some(Parameter::new(b))
        } else {
            None
        };

        Ok(Self::from_parameters(weight, bias, spec.geometry))
    }

    /// Builds a `Conv2d` around existing parameters.
    pub fn from_parameters(
        weight: Parameter,
        bias: Option<Parameter>,
        geometry: Conv2dGeometry,
    ) -> Self {
        Self {
            weight,
            bias,
            geometry,
        }
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
        x.conv2d(&weight, bias.as_ref(), self.geometry)
    }
}

impl Model for Conv2d {
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut params = vec![("weight".to_string(), self.weight.clone())];
        params.extend(self.bias.iter().map(|b| ("bias".to_string(), b.clone())));
        params
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn test_same_padding_keeps_spatial_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(&Conv2dSpec::new(1, 2, 3).with_padding(1), &mut rng).unwrap();
        let x = Tensor::constant(ArrayD::ones(IxDyn(&[1, 1, 3, 3])));

        let y = conv.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 2, 3, 3]);
        assert_eq!(conv.weight().shape(), vec![2, 1, 3, 3]);
        assert_eq!(conv.size(), 2 * 9 + 2);
    }

    #[test]
    fn test_parameter_names() {
        let mut rng = StdRng::seed_from_u64(0);
        let spec = Conv2dSpec {
            bias: false,
            ..Conv2dSpec::new(1, 1, 1)
        };
        let conv = Conv2d::new(&spec, &mut rng).unwrap();

        let names: Vec<_> = conv.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight"]);
        assert!(conv.bias().is_none());
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: Conv2dSpec = serde_json::from_str(
            r#"{ "in_channels": 2, "out_channels": 4, "kernel_size": 3, "padding": 1 }"#,
        )
        .unwrap();

        assert_eq!(spec, Conv2dSpec::new(2, 4, 3).with_padding(1));
    }
}
