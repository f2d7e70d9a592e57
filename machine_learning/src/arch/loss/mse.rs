use super::LossFn;
use crate::{Result, autograd::Tensor};

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: &Tensor, y: &Tensor) -> Result<Tensor> {
        let diff = y_pred.sub(y)?;
        Ok(diff.mul(&diff)?.mean())
    }
}
