use std::env;

use anyhow::Context;
use log::info;

use optimizer_hooks::{Runner, RunnerConfig};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => RunnerConfig::from_path(&path)?,
        None => {
            info!("no config given, using defaults");
            RunnerConfig::default()
        }
    };

    let mut runner = Runner::new(config).context("failed to build the runner")?;
    let history = runner.run().context("training failed")?;

    let anomalous = history
        .iter()
        .filter(|stats| !stats.anomalous_params.is_empty())
        .count();
    info!(iterations = history.len(), anomalous; "done");

    Ok(())
}
