pub mod config;
pub mod model;
pub mod runner;

pub use config::{LossBranch, ModelConfig, RunnerConfig};
pub use model::BranchNet;
pub use runner::Runner;
