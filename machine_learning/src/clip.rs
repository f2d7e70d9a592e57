use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, autograd::Parameter};

/// Added to the total norm before computing the clipping coefficient.
const CLIP_EPS: f32 = 1e-6;

/// The order of the norm used to measure the gradients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormType {
    L1,
    #[default]
    L2,
    Inf,
    P(f32),
}

/// The specification for gradient norm clipping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradClipSpec {
    pub max_norm: f32,
    #[serde(default)]
    pub norm_type: NormType,
    #[serde(default)]
    pub error_if_nonfinite: bool,
}

impl GradClipSpec {
    /// Returns a spec clipping the L2 norm at `max_norm`.
    pub fn new(max_norm: f32) -> Self {
        Self {
            max_norm,
            norm_type: NormType::default(),
            error_if_nonfinite: false,
        }
    }
}

/// Something that can rescale the gradients of a set of parameters.
pub trait GradClipper {
    /// Clips the gradients of `params` in place.
    ///
    /// # Returns
    /// The total gradient norm before clipping, `None` if no parameter had a gradient.
    fn clip(&mut self, params: &[Parameter]) -> Result<Option<f32>>;
}

/// Clips the gradients so that their joint norm doesn't exceed a maximum.
#[derive(Debug, Clone)]
pub struct GradNormClipper {
    spec: GradClipSpec,
}

impl GradNormClipper {
    pub fn new(spec: GradClipSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &GradClipSpec {
        &self.spec
    }
}

impl GradClipper for GradNormClipper {
    fn clip(&mut self, params: &[Parameter]) -> Result<Option<f32>> {
        let GradClipSpec {
            max_norm,
            norm_type,
            error_if_nonfinite,
        } = self.spec;

        clip_grad_norm(params, max_norm, norm_type, error_if_nonfinite)
    }
}

/// Scales the gradients of `params` by `max_norm / (total_norm + 1e-6)` when that coefficient is
/// below one. Only trainable parameters that hold a gradient take part, both in the norm and in
/// the scaling.
///
/// # Arguments
/// * `params` - The parameters whose gradients are clipped.
/// * `max_norm` - The maximum total norm.
/// * `norm_type` - The order of the norm.
/// * `error_if_nonfinite` - Whether to fail instead of clipping when the norm is Nan or infinite.
///
/// # Returns
/// The total norm before clipping, `None` if there were no gradients to clip, or an error if
/// `max_norm` or `norm_type` are invalid or the norm is non-finite and `error_if_nonfinite` is set.
pub fn clip_grad_norm(
    params: &[Parameter],
    max_norm: f32,
    norm_type: NormType,
    error_if_nonfinite: bool,
) -> Result<Option<f32>> {
    if !max_norm.is_finite() || max_norm <= 0.0 {
        return Err(MlErr::InvalidClipNorm { max_norm });
    }

    if let NormType::P(p) = norm_type {
        if !p.is_finite() || p <= 0.0 {
            return Err(MlErr::InvalidNormType { p });
        }
    }

    let params: Vec<&Parameter> = params
        .iter()
        .filter(|p| p.requires_grad() && p.has_grad())
        .collect();

    if params.is_empty() {
        return Ok(None);
    }

    let total = total_norm(&params, norm_type);
    if error_if_nonfinite && !total.is_finite() {
        return Err(MlErr::NonFiniteNorm { norm: total });
    }

    let coef = max_norm / (total + CLIP_EPS);
    if coef < 1.0 {
        for param in params {
            if let Some(grad) = param.grad_mut().as_mut() {
                grad.mapv_inplace(|g| g * coef);
            }
        }
    }

    Ok(Some(total))
}

fn total_norm(params: &[&Parameter], norm_type: NormType) -> f32 {
    let mut acc = 0.0f32;

    for param in params {
        let grad = param.grad_ref();
        let Some(grad) = grad.as_ref() else {
            continue;
        };

        acc = match norm_type {
            NormType::L1 => acc + grad.iter().map(|g| g.abs()).sum::<f32>(),
            NormType::L2 => acc + grad.iter().map(|g| g * g).sum::<f32>(),
            NormType::Inf => grad.iter().fold(acc, |max, g| max.max(g.abs())),
            NormType::P(p) => acc + grad.iter().map(|g| g.abs().powf(p)).sum::<f32>(),
        };
    }

    match norm_type {
        NormType::L1 | NormType::Inf => acc,
        NormType::L2 => acc.sqrt(),
        NormType::P(p) => acc.powf(1.0 / p),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn param_with_grad(grad: Vec<f32>) -> Parameter {
        let p = Parameter::new(ndarray::ArrayD::zeros(ndarray::IxDyn(&[grad.len()])));
        *p.grad_mut() = Some(ndarray::Array1::from(grad).into_dyn());
        p
    }

    #[test]
    fn test_norm_below_threshold_is_untouched() {
        let p = param_with_grad(vec![3.0, 4.0]);

        let norm = clip_grad_norm(&[p.clone()], 10.0, NormType::L2, false).unwrap();
        assert_eq!(norm, Some(5.0));
        assert_eq!(p.grad().unwrap(), array![3.0, 4.0].into_dyn());
    }

    #[test]
    fn test_norm_above_threshold_is_scaled() {
        let p = param_with_grad(vec![3.0, 0.0]);
        let q = param_with_grad(vec![0.0, 4.0]);

        let norm = clip_grad_norm(&[p.clone(), q.clone()], 1.0, NormType::L2, false).unwrap();
        assert_eq!(norm, Some(5.0));

        let clipped = clip_grad_norm(&[p, q], 10.0, NormType::L2, false)
            .unwrap()
            .unwrap();
        assert!((clipped - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_missing_and_frozen_gradients_are_skipped() {
        let empty = Parameter::new(array![1.0].into_dyn());
        assert_eq!(clip_grad_norm(&[empty], 1.0, NormType::L2, false), Ok(None));

        let frozen = param_with_grad(vec![100.0]);
        frozen.set_requires_grad(false);
        let live = param_with_grad(vec![1.0]);
        let norm = clip_grad_norm(&[frozen, live], 1.0, NormType::L1, false).unwrap();
        assert_eq!(norm, Some(1.0));
    }

    #[test]
    fn test_inf_norm_is_max_abs() {
        let p = param_with_grad(vec![-7.0, 2.0]);
        let q = param_with_grad(vec![3.0]);

        let norm = clip_grad_norm(&[p, q], 100.0, NormType::Inf, false).unwrap();
        assert_eq!(norm, Some(7.0));
    }

    #[test]
    fn test_invalid_arguments() {
        let p = param_with_grad(vec![1.0]);

        let err = clip_grad_norm(&[p.clone()], 0.0, NormType::L2, false).unwrap_err();
        assert_eq!(err, MlErr::InvalidClipNorm { max_norm: 0.0 });

        let err = clip_grad_norm(&[p.clone()], 1.0, NormType::P(-1.0), false).unwrap_err();
        assert_eq!(err, MlErr::InvalidNormType { p: -1.0 });

        let nan = param_with_grad(vec![f32::NAN]);
        let err = clip_grad_norm(&[nan], 1.0, NormType::L2, true).unwrap_err();
        assert!(matches!(err, MlErr::NonFiniteNorm { .. }));
    }

    #[test]
    fn test_spec_from_json() {
        let spec: GradClipSpec = serde_json::from_str(r#"{ "max_norm": 2.0 }"#).unwrap();
        assert_eq!(spec, GradClipSpec::new(2.0));

        let spec: GradClipSpec =
            serde_json::from_str(r#"{ "max_norm": 2.0, "norm_type": { "p": 3.0 } }"#).unwrap();
        assert_eq!(spec.norm_type, NormType::P(3.0));
    }
}
