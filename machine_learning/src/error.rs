use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    RankMismatch {
        op: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyOutput {
        op: &'static str,
    },
    NonScalarLoss {
        shape: Vec<usize>,
    },
    NoGraph,
    GraphFreed,
    InvalidClipNorm {
        max_norm: f32,
    },
    NonFiniteNorm {
        norm: f32,
    },
    InvalidNormType {
        p: f32,
    },
    InvalidDistribution(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => format!("There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::ShapeMismatch { op, lhs, rhs } => {
                format!("The shapes {lhs:?} and {rhs:?} are incompatible for {op}")
            }
            MlErr::RankMismatch { op, got, expected } => {
                format!("{op} expects a tensor of rank {expected}, got rank {got}")
            }
            MlErr::EmptyOutput { op } => {
                format!("{op} would produce an empty output for the given input size")
            }
            MlErr::NonScalarLoss { shape } => format!(
                "Backward can only be started from a scalar, got a tensor of shape {shape:?}"
            ),
            MlErr::NoGraph => {
                "Backward was called on a tensor that does not require grad".to_string()
            }
            MlErr::GraphFreed => "Tried to traverse a computational graph that was already \
                 freed by a previous backward pass, use `backward_with(true)` to retain it"
                .to_string(),
            MlErr::InvalidClipNorm { max_norm } => {
                format!("The maximum gradient norm must be finite and positive, got {max_norm}")
            }
            MlErr::NonFiniteNorm { norm } => {
                format!("The total gradient norm is non-finite ({norm}), refusing to clip")
            }
            MlErr::InvalidNormType { p } => {
                format!("The norm order must be a finite number greater than zero, got {p}")
            }
            MlErr::InvalidDistribution(detail) => {
                format!("Failed to build the initialization distribution: {detail}")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {}

impl From<rand::distr::uniform::Error> for MlErr {
    fn from(value: rand::distr::uniform::Error) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}
