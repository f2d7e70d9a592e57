use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::Result;

/// How to fill a freshly created parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamInit {
    Constant { value: f32 },
    Uniform { low: f32, high: f32 },
    LecunUniform,
    Normal { mean: f32, std_dev: f32 },
    KaimingNormal,
}

impl ParamInit {
    /// Samples a tensor of the given shape.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `shape` - The shape of the tensor.
    /// * `fan_in` - The number of inputs contributing to each output unit.
    ///
    /// # Returns
    /// An error if the distribution's parameters are invalid.
    pub fn sample<R: Rng>(&self, rng: &mut R, shape: &[usize], fan_in: usize) -> Result<ArrayD<f32>> {
        let fan_in = fan_in.max(1) as f32;

        match *self {
            ParamInit::Constant { value } => Ok(ArrayD::from_elem(IxDyn(shape), value)),
            ParamInit::Uniform { low, high } => uniform(rng, shape, low, high),
            ParamInit::LecunUniform => {
                let range = (3. / fan_in).sqrt();
                uniform(rng, shape, -range, range)
            }
            ParamInit::Normal { mean, std_dev } => normal(rng, shape, mean, std_dev),
            ParamInit::KaimingNormal => normal(rng, shape, 0., (2. / fan_in).sqrt()),
        }
    }
}

/// Samples from a uniform distribution in `[low, high)`.
///
/// # Returns
/// An error if the range is invalid (low >= high or non finite).
pub fn uniform<R: Rng>(rng: &mut R, shape: &[usize], low: f32, high: f32) -> Result<ArrayD<f32>> {
    let distribution = Uniform::new(low, high)?;
    Ok(from_distribution(rng, shape, distribution))
}

/// Samples from a normal distribution.
///
/// # Returns
/// An error if `std_dev` is not finite (Nan or infinite).
pub fn normal<R: Rng>(rng: &mut R, shape: &[usize], mean: f32, std_dev: f32) -> Result<ArrayD<f32>> {
    let distribution = Normal::new(mean, std_dev)?;
    Ok(from_distribution(rng, shape, distribution))
}

fn from_distribution<R, D>(rng: &mut R, shape: &[usize], distribution: D) -> ArrayD<f32>
where
    R: Rng,
    D: Distribution<f32>,
{
    ArrayD::from_shape_simple_fn(IxDyn(shape), || distribution.sample(&mut *rng))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::MlErr;

    #[test]
    fn test_uniform_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = uniform(&mut rng, &[4, 5], -0.5, 0.5).unwrap();

        assert_eq!(values.shape(), &[4, 5]);
        assert!(values.iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        let mut rng = StdRng::seed_from_u64(7);

        let err = uniform(&mut rng, &[1], 1.0, -1.0).unwrap_err();
        assert!(matches!(err, MlErr::InvalidDistribution(_)));

        let err = normal(&mut rng, &[1], 0.0, f32::NAN).unwrap_err();
        assert!(matches!(err, MlErr::InvalidDistribution(_)));
    }

    #[test]
    fn test_lecun_uniform_scales_with_fan_in() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = ParamInit::LecunUniform
            .sample(&mut rng, &[100], 12)
            .unwrap();

        assert!(values.iter().all(|v| v.abs() <= 0.5));
    }

    #[test]
    fn test_constant_init() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = ParamInit::Constant { value: 0.1 }
            .sample(&mut rng, &[2, 2], 1)
            .unwrap();

        assert!(values.iter().all(|&v| v == 0.1));
    }
}
