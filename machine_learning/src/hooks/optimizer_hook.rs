use log::debug;

use super::{
    AnomalousParameterDetector, AnomalyDetector, Hook, IterContext, OptimizerHookSpec,
};
use crate::{
    Result,
    clip::{GradClipSpec, GradClipper, GradNormClipper},
};

/// Performs the optimization step of every training iteration: clears the old gradients, runs
/// the backward pass from the loss, optionally clips the gradients and reports the parameters
/// that didn't take part in the loss, and finally updates the parameters.
pub struct OptimizerHook<D = AnomalousParameterDetector, C = GradNormClipper> {
    detector: D,
    clipper: Option<C>,
    detect_anomalous_params: bool,
}

impl OptimizerHook {
    /// Creates a new `OptimizerHook` with the default detector.
    ///
    /// # Arguments
    /// * `grad_clip` - How to clip the gradients, `None` to leave them as they are.
    /// * `detect_anomalous_params` - Whether to report the parameters outside of the loss' graph.
    pub fn new(grad_clip: Option<GradClipSpec>, detect_anomalous_params: bool) -> Self {
        Self::with_parts(
            AnomalousParameterDetector::default(),
            grad_clip.map(GradNormClipper::new),
            detect_anomalous_params,
        )
    }

    pub fn from_spec(spec: &OptimizerHookSpec) -> Self {
        Self::with_parts(
            AnomalousParameterDetector::new(spec.detection, spec.anomaly_log_level),
            spec.grad_clip.map(GradNormClipper::new),
            spec.detect_anomalous_params,
        )
    }
}

impl Default for OptimizerHook {
    fn default() -> Self {
        Self::new(None, false)
    }
}

impl<D, C> OptimizerHook<D, C>
where
    D: AnomalyDetector,
    C: GradClipper,
{
    /// Creates a new `OptimizerHook` out of its collaborators.
    ///
    /// # Arguments
    /// * `detector` - Finds the anomalous parameters.
    /// * `clipper` - Clips the gradients, `None` to disable clipping.
    /// * `detect_anomalous_params` - Whether `detector` is used at all.
    pub fn with_parts(detector: D, clipper: Option<C>, detect_anomalous_params: bool) -> Self {
        Self {
            detector,
            clipper,
            detect_anomalous_params,
        }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn clipper(&self) -> Option<&C> {
        self.clipper.as_ref()
    }

    pub fn detect_anomalous_params(&self) -> bool {
        self.detect_anomalous_params
    }

    fn detect(&self, ctx: &mut IterContext<'_>) -> Result<()> {
        let names = self
            .detector
            .detect(ctx.model, ctx.loss, &mut *ctx.logger)?;

        debug!(iter = ctx.iter, anomalous = names.len(); "looked for anomalous parameters");
        ctx.stats.anomalous_params = names;
        Ok(())
    }
}

impl<D, C> Hook for OptimizerHook<D, C>
where
    D: AnomalyDetector,
    C: GradClipper,
{
    fn after_train_iter(&mut self, ctx: &mut IterContext<'_>) -> Result<()> {
        ctx.optimizer.zero_grad();

        let needs_graph = self.detector.needs_graph();
        if self.detect_anomalous_params && needs_graph {
            self.detect(ctx)?;
        }

        ctx.loss.backward()?;

        if self.detect_anomalous_params && !needs_graph {
            self.detect(ctx)?;
        }

        if let Some(clipper) = self.clipper.as_mut() {
            let params = ctx.model.parameters();
            if let Some(grad_norm) = clipper.clip(&params)? {
                debug!(iter = ctx.iter, grad_norm = grad_norm; "clipped gradients");
                ctx.stats.grad_norm = Some(grad_norm);
            }
        }

        ctx.optimizer.step()
    }
}
