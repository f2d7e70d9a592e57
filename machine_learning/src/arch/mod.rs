pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Model, prefixed};
pub use sequential::Sequential;
