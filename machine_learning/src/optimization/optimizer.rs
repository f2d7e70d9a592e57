use ndarray::ArrayD;

use crate::{MlErr, Result, autograd::Parameter};

/// Defines the strategy for updating model parameters based on their gradients.
pub trait Optimizer {
    /// Returns the parameters this optimizer updates.
    fn params(&self) -> &[Parameter];

    /// Drops every gradient, so that the next backward pass starts from scratch.
    fn zero_grad(&mut self) {
        self.params().iter().for_each(Parameter::zero_grad);
    }

    /// Updates every parameter that holds a gradient according to the algorithm's learning rule.
    /// Parameters without gradient or frozen are left untouched.
    ///
    /// # Returns
    /// An error if a gradient doesn't match the shape of its parameter.
    fn step(&mut self) -> Result<()>;
}

/// Calls `update` with the index, the value and the gradient of every trainable parameter that
/// holds a gradient.
pub(super) fn apply_updates<F>(params: &[Parameter], mut update: F) -> Result<()>
where
    F: FnMut(usize, &mut ArrayD<f32>, &ArrayD<f32>),
{
    for (i, param) in params.iter().enumerate() {
        if !param.requires_grad() {
            continue;
        }

        let grad = param.grad_ref();
        let Some(grad) = grad.as_ref() else {
            continue;
        };

        let mut data = param.data_mut();
        if data.shape() != grad.shape() {
            return Err(MlErr::ShapeMismatch {
                op: "optimizer step",
                lhs: data.shape().to_vec(),
                rhs: grad.shape().to_vec(),
            });
        }

        update(i, &mut data, grad);
    }

    Ok(())
}
