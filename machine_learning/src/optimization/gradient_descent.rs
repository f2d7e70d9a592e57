use super::{Optimizer, optimizer::apply_updates};
use crate::{Result, autograd::Parameter};

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    params: Vec<Parameter>,
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `params` - The parameters this optimizer will update.
    /// * `learning_rate` - The *length* of the steps taken on `step`.
    pub fn new(params: Vec<Parameter>, learning_rate: f32) -> Self {
        Self {
            params,
            learning_rate,
        }
    }
}

impl Optimizer for GradientDescent {
    fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn step(&mut self) -> Result<()> {
        let lr = self.learning_rate;
        apply_updates(&self.params, |_, w, g| w.scaled_add(-lr, g))
    }
}
