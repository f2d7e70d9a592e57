use super::LogSink;
use crate::{Result, arch::Model, autograd::Tensor, optimization::Optimizer};

/// Everything a hook may look at or act upon once the forward pass of an iteration is done.
pub struct IterContext<'a> {
    pub iter: usize,
    pub model: &'a dyn Model,
    pub optimizer: &'a mut dyn Optimizer,
    pub loss: &'a Tensor,
    pub logger: &'a mut dyn LogSink,
    pub stats: &'a mut IterStats,
}

/// What the hooks found out during an iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterStats {
    /// The total gradient norm before clipping, if the gradients were clipped.
    pub grad_norm: Option<f32>,
    /// The names of the parameters outside of the loss' graph, if they were looked for.
    pub anomalous_params: Vec<String>,
}

/// A callback the training loop runs at fixed points of every iteration.
pub trait Hook {
    /// Runs once the loss of the iteration has been computed.
    ///
    /// # Returns
    /// An error if the hook couldn't complete its work.
    fn after_train_iter(&mut self, ctx: &mut IterContext<'_>) -> Result<()>;
}
