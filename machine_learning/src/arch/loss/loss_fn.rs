use crate::{Result, autograd::Tensor};

pub trait LossFn {
    /// Builds the scalar loss of a prediction, recording it on the prediction's graph.
    fn loss(&self, y_pred: &Tensor, y: &Tensor) -> Result<Tensor>;
}
