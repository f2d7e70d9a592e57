use ndarray::{Array1, Array4, ArrayView1, ArrayView4, Axis};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// Stride, zero padding and dilation of a 2d convolution, all applied symmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conv2dGeometry {
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl Default for Conv2dGeometry {
    fn default() -> Self {
        Self {
            stride: 1,
            padding: 0,
            dilation: 1,
        }
    }
}

impl Conv2dGeometry {
    /// Computes the length of one output spatial dimension.
    ///
    /// # Arguments
    /// * `input` - The length of the input spatial dimension.
    /// * `kernel` - The length of the kernel along that dimension.
    ///
    /// # Returns
    /// `None` if the (dilated) kernel doesn't fit in the padded input.
    pub fn output_len(&self, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.padding;
        let span = self.dilation * (kernel.max(1) - 1) + 1;
        let stride = self.stride.max(1);

        (padded >= span).then(|| (padded - span) / stride + 1)
    }

    /// Maps an output position and kernel offset to the input position, `None` if it falls on the
    /// zero padding.
    fn input_pos(&self, out: usize, k: usize, len: usize) -> Option<usize> {
        let pos = (out * self.stride.max(1) + k * self.dilation) as isize - self.padding as isize;
        (0..len as isize).contains(&pos).then_some(pos as usize)
    }
}

/// Checks the operands of a convolution and returns the output shape `[n, out, oh, ow]`.
pub(crate) fn output_shape(
    x: &ArrayView4<f32>,
    w: &ArrayView4<f32>,
    b: Option<&ArrayView1<f32>>,
    geometry: &Conv2dGeometry,
) -> Result<[usize; 4]> {
    let (n, c, h, wd) = x.dim();
    let (o, wc, kh, kw) = w.dim();

    if c != wc {
        return Err(MlErr::ShapeMismatch {
            op: "conv2d",
            lhs: x.shape().to_vec(),
            rhs: w.shape().to_vec(),
        });
    }

    if let Some(b) = b.filter(|b| b.len() != o) {
        return Err(MlErr::ShapeMismatch {
            op: "conv2d bias",
            lhs: w.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    }

    let oh = geometry.output_len(h, kh);
    let ow = geometry.output_len(wd, kw);
    match (oh, ow) {
        (Some(oh), Some(ow)) if oh > 0 && ow > 0 => Ok([n, o, oh, ow]),
        _ => Err(MlErr::EmptyOutput { op: "conv2d" }),
    }
}

/// Direct (non im2col) convolution in NCHW layout.
pub(crate) fn forward(
    x: ArrayView4<f32>,
    w: ArrayView4<f32>,
    b: Option<ArrayView1<f32>>,
    geometry: &Conv2dGeometry,
) -> Result<Array4<f32>> {
    let [n, o, oh, ow] = output_shape(&x, &w, b.as_ref(), geometry)?;
    let (_, c, h, wd) = x.dim();
    let (_, _, kh, kw) = w.dim();
    let mut y = Array4::zeros((n, o, oh, ow));

    for ((ni, oi, yi, xi), out) in y.indexed_iter_mut() {
        let mut acc = b.as_ref().map_or(0.0, |b| b[oi]);

        for ci in 0..c {
            for ki in 0..kh {
                let Some(hi) = geometry.input_pos(yi, ki, h) else {
                    continue;
                };

                for kj in 0..kw {
                    if let Some(wi) = geometry.input_pos(xi, kj, wd) {
                        acc += x[[ni, ci, hi, wi]] * w[[oi, ci, ki, kj]];
                    }
                }
            }
        }

        *out = acc;
    }

    Ok(y)
}

/// Gradients of a convolution with respect to its input, weight and bias.
pub(crate) struct ConvGrads {
    pub dx: Array4<f32>,
    pub dw: Array4<f32>,
    pub db: Array1<f32>,
}

pub(crate) fn backward(
    x: ArrayView4<f32>,
    w: ArrayView4<f32>,
    d: ArrayView4<f32>,
    geometry: &Conv2dGeometry,
) -> ConvGrads {
    let (_, c, h, wd) = x.dim();
    let (_, _, kh, kw) = w.dim();
    let mut dx = Array4::zeros(x.raw_dim());
    let mut dw = Array4::zeros(w.raw_dim());
    let db = d.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0));

    for ((ni, oi, yi, xi), &g) in d.indexed_iter() {
        if g == 0.0 {
            continue;
        }

        for ci in 0..c {
            for ki in 0..kh {
                let Some(hi) = geometry.input_pos(yi, ki, h) else {
                    continue;
                };

                for kj in 0..kw {
                    if let Some(wi) = geometry.input_pos(xi, kj, wd) {
                        dx[[ni, ci, hi, wi]] += g * w[[oi, ci, ki, kj]];
                        dw[[oi, ci, ki, kj]] += g * x[[ni, ci, hi, wi]];
                    }
                }
            }
        }
    }

    ConvGrads { dx, dw, db }
}
