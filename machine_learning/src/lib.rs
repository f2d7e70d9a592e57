pub mod arch;
pub mod autograd;
pub mod clip;
pub mod error;
pub mod hooks;
pub mod initialization;
pub mod optimization;

pub use error::{MlErr, Result};
