use ndarray::{ArrayD, Zip};

use super::{Optimizer, optimizer::apply_updates};
use crate::{Result, autograd::Parameter};

#[derive(Debug)]
pub struct Adam {
    params: Vec<Parameter>,
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Vec<ArrayD<f32>>,
    s: Vec<ArrayD<f32>>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `params` - The parameters this optimizer will update.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(
        params: Vec<Parameter>,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    ) -> Self {
        let zeros = || params.iter().map(|p| ArrayD::zeros(p.shape())).collect();

        Self {
            v: zeros(),
            s: zeros(),
            params,
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn step(&mut self) -> Result<()> {
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        let (v, s) = (&mut self.v, &mut self.s);
        apply_updates(&self.params, |i, w, g| {
            Zip::from(w)
                .and(g)
                .and(&mut v[i])
                .and(&mut s[i])
                .for_each(|p, &g, v, s| {
                    *v = b1 * *v + (1. - b1) * g;
                    *s = b2 * *s + (1. - b2) * g.powi(2);
                    *p -= step_size * *v / (s.sqrt() + eps);
                });
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::autograd::Tensor;

    #[test]
    fn test_first_step_has_learning_rate_length() {
        let p = Parameter::new(array![1.0, 1.0].into_dyn());
        let mut optimizer = Adam::new(vec![p.clone()], 0.1, 0.9, 0.999, 1e-8);

        Tensor::from_param(&p).scale(3.0).sum().backward().unwrap();
        optimizer.step().unwrap();

        for w in p.data().iter() {
            assert!((w - 0.9).abs() < 1e-4);
        }
    }
}
