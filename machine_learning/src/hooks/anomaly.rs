use std::collections::HashSet;

use log::Level;
use serde::{Deserialize, Serialize};

use super::LogSink;
use crate::{
    Result,
    arch::Model,
    autograd::{Parameter, Tensor},
};

/// How a parameter is found to be outside of the loss' computational graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// The parameter holds no gradient after the backward pass.
    #[default]
    MissingGradient,
    /// The parameter isn't reachable when walking the loss' graph. Needs the graph alive, so it
    /// must run before the backward pass frees it.
    GraphTraversal,
}

/// Finds the parameters of a model that didn't contribute to a loss.
pub trait AnomalyDetector {
    /// Whether `detect` must run while the loss' graph is still alive, that is, before backward.
    fn needs_graph(&self) -> bool {
        false
    }

    /// Returns the names of the anomalous parameters of `model`, in the model's order, and
    /// reports them through `sink`.
    fn detect(&self, model: &dyn Model, loss: &Tensor, sink: &mut dyn LogSink)
    -> Result<Vec<String>>;
}

/// Reports the trainable parameters that are not part of the computational graph rooted at the
/// loss. These usually point at layers that are defined but never used in the forward pass.
#[derive(Debug, Clone)]
pub struct AnomalousParameterDetector {
    strategy: DetectionStrategy,
    level: Level,
}

impl Default for AnomalousParameterDetector {
    fn default() -> Self {
        Self::new(DetectionStrategy::default(), Level::Info)
    }
}

impl AnomalousParameterDetector {
    /// Creates a new `AnomalousParameterDetector`.
    ///
    /// # Arguments
    /// * `strategy` - How to decide whether a parameter is in the graph.
    /// * `level` - The level of the report message.
    pub fn new(strategy: DetectionStrategy, level: Level) -> Self {
        Self { strategy, level }
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    /// Returns the anomalous parameters without reporting them.
    ///
    /// # Returns
    /// An error if the strategy walks the graph and it was already freed.
    pub fn anomalous_parameters(
        &self,
        model: &dyn Model,
        loss: &Tensor,
    ) -> Result<Vec<(String, Parameter)>> {
        let in_graph = match self.strategy {
            DetectionStrategy::MissingGradient => None,
            DetectionStrategy::GraphTraversal => Some(
                loss.graph_parameters()?
                    .iter()
                    .map(Parameter::id)
                    .collect::<HashSet<_>>(),
            ),
        };

        let anomalous = model
            .named_parameters()
            .into_iter()
            .filter(|(_, param)| param.requires_grad())
            .filter(|(_, param)| match &in_graph {
                None => !param.has_grad(),
                Some(ids) => !ids.contains(&param.id()),
            })
            .collect();

        Ok(anomalous)
    }

    fn report(&self, anomalous: &[(String, Parameter)], sink: &mut dyn LogSink) {
        if anomalous.is_empty() {
            return;
        }

        let message = anomalous
            .iter()
            .map(|(name, param)| {
                format!(
                    "{name} with shape {:?} is not in the computational graph",
                    param.shape()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        sink.log(self.level, &message);
    }
}

impl AnomalyDetector for AnomalousParameterDetector {
    fn needs_graph(&self) -> bool {
        self.strategy == DetectionStrategy::GraphTraversal
    }

    fn detect(
        &self,
        model: &dyn Model,
        loss: &Tensor,
        sink: &mut dyn LogSink,
    ) -> Result<Vec<String>> {
        let anomalous = self.anomalous_parameters(model, loss)?;
        self.report(&anomalous, sink);

        Ok(anomalous.into_iter().map(|(name, _)| name).collect())
    }
}
