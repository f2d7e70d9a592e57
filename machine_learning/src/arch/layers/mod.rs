mod conv2d;
mod layer;
mod linear;

pub use conv2d::{Conv2d, Conv2dSpec};
pub use layer::{Layer, LayerSpec};
pub use linear::{Linear, LinearSpec};
