use log::{debug, info};
use machine_learning::{
    Result,
    arch::{
        Model,
        loss::{LossFn, Mse},
    },
    autograd::Tensor,
    hooks::{Hook, IterContext, IterStats, LogCrateSink, LogSink, OptimizerHook},
    initialization,
    optimization::Optimizer,
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{config::RunnerConfig, model::BranchNet};

/// Trains a `BranchNet` on a fixed random batch, handing every loss to an `OptimizerHook`.
pub struct Runner {
    config: RunnerConfig,
    model: BranchNet,
    optimizer: Box<dyn Optimizer>,
    hook: OptimizerHook,
    x: Tensor,
    y: Tensor,
}

impl Runner {
    /// Creates a new `Runner` whose `OptimizerHook` is built from `config.hook`.
    ///
    /// # Arguments
    /// * `config` - The runner's configuration.
    ///
    /// # Returns
    /// An error if the model or the data couldn't be initialized.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = BranchNet::new(&config.model, &mut rng)?;
        let optimizer = config.optimizer.build(model.parameters());

        let m = &config.model;
        let x = initialization::uniform(
            &mut rng,
            &[m.batch_size, m.in_channels, m.image_size, m.image_size],
            0.0,
            1.0,
        )?;
        let y = initialization::uniform(
            &mut rng,
            &[m.batch_size, m.hidden_channels, m.image_size, m.image_size],
            0.0,
            1.0,
        )?;

        let hook = OptimizerHook::from_spec(&config.hook);

        Ok(Self {
            config,
            model,
            optimizer,
            hook,
            x: Tensor::constant(x),
            y: Tensor::constant(y),
        })
    }

    /// Runs every iteration reporting through the `log` facade.
    pub fn run(&mut self) -> Result<Vec<IterStats>> {
        self.run_with(&mut LogCrateSink)
    }

    /// Runs every iteration reporting through `logger`.
    ///
    /// # Returns
    /// The stats collected by the hook at each iteration, or the first error found.
    pub fn run_with(&mut self, logger: &mut dyn LogSink) -> Result<Vec<IterStats>> {
        let mut history = Vec::with_capacity(self.config.iterations);

        for iter in 0..self.config.iterations {
            let y_pred = if self.config.loss_branch.uses_head(iter) {
                self.model.forward(&self.x)?
            } else {
                self.model.forward_stem(&self.x)?
            };
            let loss = Mse::new().loss(&y_pred, &self.y)?;

            let mut stats = IterStats::default();
            let mut ctx = IterContext {
                iter,
                model: &self.model,
                optimizer: self.optimizer.as_mut(),
                loss: &loss,
                logger: &mut *logger,
                stats: &mut stats,
            };
            self.hook.after_train_iter(&mut ctx)?;

            let loss = loss.item().unwrap_or(f32::NAN);
            match stats.grad_norm {
                Some(grad_norm) => debug!(iter, loss, grad_norm; "finished iteration"),
                None => debug!(iter, loss; "finished iteration"),
            }

            history.push(stats);
        }

        info!(iterations = self.config.iterations; "training finished");
        Ok(history)
    }
}
