use ndarray::ArrayD;

use super::{Optimizer, optimizer::apply_updates};
use crate::{Result, autograd::Parameter};

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    params: Vec<Parameter>,
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<ArrayD<f32>>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `params` - The parameters this optimizer will update.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(params: Vec<Parameter>, learning_rate: f32, momentum: f32) -> Self {
        let velocity = params.iter().map(|p| ArrayD::zeros(p.shape())).collect();

        Self {
            params,
            learning_rate,
            momentum,
            velocity,
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn step(&mut self) -> Result<()> {
        let lr = self.learning_rate;
        let mu = self.momentum;
        let velocity = &mut self.velocity;

        apply_updates(&self.params, |i, w, g| {
            let v = &mut velocity[i];
            v.zip_mut_with(g, |v, &g| *v = mu * *v + g);
            w.scaled_add(-lr, v);
        })
    }
}
