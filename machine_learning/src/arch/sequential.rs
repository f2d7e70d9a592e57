use rand::Rng;

use super::{
    Model,
    layers::{Layer, LayerSpec},
    model::prefixed,
};
use crate::{
    Result,
    autograd::{Parameter, Tensor},
};

/// A sequential model: information flows forward through its layers in order, and the gradient
/// flows back through them when the loss is differentiated.
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Builds a `Sequential` from layer specs.
    ///
    /// # Returns
    /// An error if any of the layers fails to initialize.
    pub fn from_specs<R: Rng>(specs: &[LayerSpec], rng: &mut R) -> Result<Self> {
        let layers = specs
            .iter()
            .map(|spec| Layer::from_spec(spec, rng))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(layers))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Makes a forward pass through the network.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(x.clone(), |x, layer| layer.forward(&x))
    }
}

impl Model for Sequential {
    fn named_parameters(&self) -> Vec<(String, Parameter)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| prefixed(&i.to_string(), layer))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::layers::{Conv2dSpec, LinearSpec};

    fn linear(in_features: usize, out_features: usize) -> LayerSpec {
        LayerSpec::Linear(LinearSpec {
            in_features,
            out_features,
            bias: true,
            init: crate::initialization::ParamInit::LecunUniform,
        })
    }

    #[test]
    fn test_names_follow_layer_indices() {
        let mut rng = StdRng::seed_from_u64(1);
        let specs = [
            LayerSpec::Conv2d(Conv2dSpec::new(1, 1, 1)),
            LayerSpec::Relu,
            linear(2, 1),
        ];
        let model = Sequential::from_specs(&specs, &mut rng).unwrap();

        let names: Vec<_> = model
            .named_parameters()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["0.weight", "0.bias", "2.weight", "2.bias"]);
        assert_eq!(model.size(), 1 + 1 + 2 + 1);
    }

    #[test]
    fn test_forward_chains_layers() {
        let mut rng = StdRng::seed_from_u64(1);
        let model =
            Sequential::from_specs(&[linear(2, 3), LayerSpec::Sigmoid, linear(3, 1)], &mut rng)
                .unwrap();
        let x = Tensor::constant(array![[0.0, 1.0], [1.0, 0.0]].into_dyn());

        let y = model.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 1]);

        y.sum().backward().unwrap();
        assert!(model.parameters().iter().all(Parameter::has_grad));
    }
}
