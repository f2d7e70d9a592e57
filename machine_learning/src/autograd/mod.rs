mod backward;
mod conv;
mod parameter;
mod tensor;

pub use conv::Conv2dGeometry;
pub use parameter::{ParamId, Parameter};
pub use tensor::Tensor;
