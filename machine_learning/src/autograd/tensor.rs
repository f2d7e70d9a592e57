use std::{
    cell::{Ref, RefCell},
    fmt,
    rc::Rc,
};

use ndarray::{ArrayD, ArrayView1, ArrayView2, ArrayView4, Axis, Dimension, Ix1, Ix2, Ix4, Zip};

use super::{
    backward,
    conv::{self, Conv2dGeometry},
    parameter::Parameter,
};
use crate::{MlErr, Result};

/// The state of the edge between a tensor and the operation that produced it.
pub(crate) enum GraphLink {
    /// The tensor doesn't depend on any parameter that requires grad.
    Constant,
    Live(GradFn),
    /// A backward pass went through this node and released its inputs.
    Freed,
}

/// The recorded operation of a graph node, holding the operands needed to differentiate it.
pub(crate) enum GradFn {
    AccumulateGrad(Parameter),
    Add(Tensor, Tensor),
    Sub(Tensor, Tensor),
    Mul(Tensor, Tensor),
    Scale(Tensor, f32),
    Sum(Tensor),
    Mean(Tensor),
    Relu(Tensor),
    Sigmoid(Tensor),
    Linear {
        input: Tensor,
        weight: Tensor,
        bias: Option<Tensor>,
    },
    Conv2d {
        input: Tensor,
        weight: Tensor,
        bias: Option<Tensor>,
        geometry: Conv2dGeometry,
    },
}

struct Node {
    value: ArrayD<f32>,
    requires_grad: bool,
    link: RefCell<GraphLink>,
}

/// An immutable value plus the computational graph that produced it.
///
/// Operations on tensors that depend on a parameter record a graph node, calling `backward` on a
/// scalar result traverses that graph in reverse and accumulates the gradient of every parameter
/// it reaches.
#[derive(Clone)]
pub struct Tensor {
    node: Rc<Node>,
}

impl Tensor {
    fn with_link(value: ArrayD<f32>, link: GraphLink) -> Self {
        let requires_grad = matches!(link, GraphLink::Live(_));

        Self {
            node: Rc::new(Node {
                value,
                requires_grad,
                link: RefCell::new(link),
            }),
        }
    }

    fn from_op(value: ArrayD<f32>, grad_fn: GradFn) -> Self {
        let tracked = grad_fn.inputs().iter().any(|input| input.requires_grad());
        let link = if tracked {
            GraphLink::Live(grad_fn)
        } else {
            GraphLink::Constant
        };

        Self::with_link(value, link)
    }

    /// Creates a tensor that is not part of any computational graph.
    pub fn constant(value: ArrayD<f32>) -> Self {
        Self::with_link(value, GraphLink::Constant)
    }

    /// Creates a 0-dimensional constant.
    pub fn scalar(value: f32) -> Self {
        Self::constant(ArrayD::from_elem(ndarray::IxDyn(&[]), value))
    }

    /// Creates a graph leaf reading the current value of `param`. Backward passes reaching this
    /// leaf accumulate into the parameter's gradient, unless the parameter is frozen.
    pub fn from_param(param: &Parameter) -> Self {
        let value = param.data().clone();

        if param.requires_grad() {
            Self::with_link(value, GraphLink::Live(GradFn::AccumulateGrad(param.clone())))
        } else {
            Self::constant(value)
        }
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.node.value
    }

    pub fn shape(&self) -> &[usize] {
        self.node.value.shape()
    }

    pub fn len(&self) -> usize {
        self.node.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.value.is_empty()
    }

    /// Returns the only element of a single element tensor.
    pub fn item(&self) -> Option<f32> {
        if self.len() != 1 {
            return None;
        }

        self.node.value.iter().next().copied()
    }

    pub fn requires_grad(&self) -> bool {
        self.node.requires_grad
    }

    /// Whether a backward pass already released the graph behind this tensor.
    pub fn is_freed(&self) -> bool {
        matches!(*self.node.link.borrow(), GraphLink::Freed)
    }

    /// Returns a copy of this tensor cut off from its graph.
    pub fn detach(&self) -> Tensor {
        Self::constant(self.node.value.clone())
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        same_shape("add", self, other)?;
        let value = self.value() + other.value();
        Ok(Self::from_op(value, GradFn::Add(self.clone(), other.clone())))
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        same_shape("sub", self, other)?;
        let value = self.value() - other.value();
        Ok(Self::from_op(value, GradFn::Sub(self.clone(), other.clone())))
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        same_shape("mul", self, other)?;
        let value = self.value() * other.value();
        Ok(Self::from_op(value, GradFn::Mul(self.clone(), other.clone())))
    }

    pub fn scale(&self, factor: f32) -> Tensor {
        let value = self.value().mapv(|v| v * factor);
        Self::from_op(value, GradFn::Scale(self.clone(), factor))
    }

    /// Sums every element into a 0-dimensional tensor.
    pub fn sum(&self) -> Tensor {
        let value = ArrayD::from_elem(ndarray::IxDyn(&[]), self.value().sum());
        Self::from_op(value, GradFn::Sum(self.clone()))
    }

    /// Averages every element into a 0-dimensional tensor.
    pub fn mean(&self) -> Tensor {
        let mean = self.value().mean().unwrap_or_default();
        let value = ArrayD::from_elem(ndarray::IxDyn(&[]), mean);
        Self::from_op(value, GradFn::Mean(self.clone()))
    }

    pub fn relu(&self) -> Tensor {
        let value = self.value().mapv(|v| v.max(0.0));
        Self::from_op(value, GradFn::Relu(self.clone()))
    }

    pub fn sigmoid(&self) -> Tensor {
        let value = self.value().mapv(|v| 1.0 / (1.0 + (-v).exp()));
        Self::from_op(value, GradFn::Sigmoid(self.clone()))
    }

    /// Applies an affine map `self · weightᵀ + bias` to a batch of rows.
    ///
    /// # Arguments
    /// * `weight` - A `[out, in]` matrix.
    /// * `bias` - An optional `[out]` vector.
    ///
    /// # Returns
    /// A `[n, out]` tensor, or an error if the operands' ranks or shapes don't line up.
    pub fn linear(&self, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
        let x = view2("linear", self)?;
        let w = view2("linear", weight)?;

        if x.ncols() != w.ncols() {
            return Err(MlErr::ShapeMismatch {
                op: "linear",
                lhs: self.shape().to_vec(),
                rhs: weight.shape().to_vec(),
            });
        }

        let mut y = x.dot(&w.t());
        if let Some(bias) = bias {
            let b = view1("linear bias", bias)?;
            if b.len() != w.nrows() {
                return Err(MlErr::ShapeMismatch {
                    op: "linear bias",
                    lhs: weight.shape().to_vec(),
                    rhs: bias.shape().to_vec(),
                });
            }

            y += &b;
        }

        let grad_fn = GradFn::Linear {
            input: self.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
        };

        Ok(Self::from_op(y.into_dyn(), grad_fn))
    }

    /// Convolves a `[n, in, h, w]` batch with a `[out, in, kh, kw]` kernel.
    ///
    /// # Arguments
    /// * `weight` - The convolution kernel.
    /// * `bias` - An optional `[out]` vector added to every output channel.
    /// * `geometry` - Stride, padding and dilation.
    ///
    /// # Returns
    /// A `[n, out, oh, ow]` tensor, or an error if the operands don't line up or the kernel doesn't
    /// fit in the padded input.
    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        geometry: Conv2dGeometry,
    ) -> Result<Tensor> {
        let x = view4("conv2d", self)?;
        let w = view4("conv2d", weight)?;
        let b = bias.map(|b| view1("conv2d bias", b)).transpose()?;

        let y = conv::forward(x, w, b, &geometry)?;
        let grad_fn = GradFn::Conv2d {
            input: self.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            geometry,
        };

        Ok(Self::from_op(y.into_dyn(), grad_fn))
    }

    /// Runs a backward pass from this scalar and frees the graph afterwards.
    ///
    /// # Returns
    /// An error if the tensor isn't a scalar, doesn't require grad or its graph was already freed.
    pub fn backward(&self) -> Result<()> {
        self.backward_with(false)
    }

    /// Runs a backward pass from this scalar, keeping the graph alive if `retain_graph` is set.
    pub fn backward_with(&self, retain_graph: bool) -> Result<()> {
        backward::run(self, retain_graph)
    }

    /// Returns every parameter reachable from this tensor through its graph, in no particular
    /// order. Doesn't need (nor run) a backward pass.
    pub fn graph_parameters(&self) -> Result<Vec<Parameter>> {
        backward::reachable_parameters(self)
    }

    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.node) as usize
    }

    pub(crate) fn link(&self) -> Ref<'_, GraphLink> {
        self.node.link.borrow()
    }

    pub(crate) fn free(&self) {
        let mut link = self.node.link.borrow_mut();
        if matches!(*link, GraphLink::Live(_)) {
            *link = GraphLink::Freed;
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .field("freed", &self.is_freed())
            .finish()
    }
}

impl GradFn {
    pub(crate) fn inputs(&self) -> Vec<&Tensor> {
        match self {
            GradFn::AccumulateGrad(_) => vec![],
            GradFn::Add(a, b) | GradFn::Sub(a, b) | GradFn::Mul(a, b) => vec![a, b],
            GradFn::Scale(a, _)
            | GradFn::Sum(a)
            | GradFn::Mean(a)
            | GradFn::Relu(a)
            | GradFn::Sigmoid(a) => vec![a],
            GradFn::Linear {
                input,
                weight,
                bias,
            }
            | GradFn::Conv2d {
                input,
                weight,
                bias,
                ..
            } => {
                let mut inputs = vec![input, weight];
                inputs.extend(bias.as_ref());
                inputs
            }
        }
    }

    /// Propagates `grad`, the gradient of the loss with respect to this node's output, to the
    /// node's inputs.
    ///
    /// # Arguments
    /// * `output` - The value this node produced on the forward pass.
    /// * `grad` - The gradient flowing into this node.
    ///
    /// # Returns
    /// The pairs of input and gradient with respect to that input.
    pub(crate) fn backward(
        &self,
        output: &ArrayD<f32>,
        grad: &ArrayD<f32>,
    ) -> Result<Vec<(Tensor, ArrayD<f32>)>> {
        let grads = match self {
            GradFn::AccumulateGrad(_) => vec![],
            GradFn::Add(a, b) => vec![(a.clone(), grad.clone()), (b.clone(), grad.clone())],
            GradFn::Sub(a, b) => vec![(a.clone(), grad.clone()), (b.clone(), grad.mapv(|g| -g))],
            GradFn::Mul(a, b) => vec![
                (a.clone(), grad * b.value()),
                (b.clone(), grad * a.value()),
            ],
            GradFn::Scale(a, factor) => vec![(a.clone(), grad.mapv(|g| g * factor))],
            GradFn::Sum(a) => {
                let g = grad.sum();
                vec![(a.clone(), ArrayD::from_elem(a.value().raw_dim(), g))]
            }
            GradFn::Mean(a) => {
                let g = grad.sum() / a.len().max(1) as f32;
                vec![(a.clone(), ArrayD::from_elem(a.value().raw_dim(), g))]
            }
            GradFn::Relu(a) => {
                let d = Zip::from(grad)
                    .and(a.value())
                    .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 });
                vec![(a.clone(), d)]
            }
            GradFn::Sigmoid(a) => {
                let d = Zip::from(grad)
                    .and(output)
                    .map_collect(|&g, &s| g * s * (1.0 - s));
                vec![(a.clone(), d)]
            }
            GradFn::Linear {
                input,
                weight,
                bias,
            } => {
                let d = into2("linear", grad.view())?;
                let x = view2("linear", input)?;
                let w = view2("linear", weight)?;

                let mut grads = vec![
                    (input.clone(), d.dot(&w).into_dyn()),
                    (weight.clone(), d.t().dot(&x).into_dyn()),
                ];
                if let Some(bias) = bias {
                    grads.push((bias.clone(), d.sum_axis(Axis(0)).into_dyn()));
                }
                grads
            }
            GradFn::Conv2d {
                input,
                weight,
                bias,
                geometry,
            } => {
                let d = into4("conv2d", grad.view())?;
                let x = view4("conv2d", input)?;
                let w = view4("conv2d", weight)?;
                let conv::ConvGrads { dx, dw, db } = conv::backward(x, w, d, geometry);

                let mut grads = vec![
                    (input.clone(), dx.into_dyn()),
                    (weight.clone(), dw.into_dyn()),
                ];
                if let Some(bias) = bias {
                    grads.push((bias.clone(), db.into_dyn()));
                }
                grads
            }
        };

        Ok(grads)
    }
}

fn same_shape(op: &'static str, a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() == b.shape() {
        return Ok(());
    }

    Err(MlErr::ShapeMismatch {
        op,
        lhs: a.shape().to_vec(),
        rhs: b.shape().to_vec(),
    })
}

fn rank_err<D: Dimension>(op: &'static str, got: usize) -> MlErr {
    MlErr::RankMismatch {
        op,
        got,
        expected: D::NDIM.unwrap_or_default(),
    }
}

fn view1<'a>(op: &'static str, t: &'a Tensor) -> Result<ArrayView1<'a, f32>> {
    let v = t.value().view();
    let ndim = v.ndim();
    v.into_dimensionality::<Ix1>()
        .map_err(|_| rank_err::<Ix1>(op, ndim))
}

fn view2<'a>(op: &'static str, t: &'a Tensor) -> Result<ArrayView2<'a, f32>> {
    into2(op, t.value().view())
}

fn view4<'a>(op: &'static str, t: &'a Tensor) -> Result<ArrayView4<'a, f32>> {
    into4(op, t.value().view())
}

fn into2<'a>(op: &'static str, v: ndarray::ArrayViewD<'a, f32>) -> Result<ArrayView2<'a, f32>> {
    let ndim = v.ndim();
    v.into_dimensionality::<Ix2>()
        .map_err(|_| rank_err::<Ix2>(op, ndim))
}

fn into4<'a>(op: &'static str, v: ndarray::ArrayViewD<'a, f32>) -> Result<ArrayView4<'a, f32>> {
    let ndim = v.ndim();
    v.into_dimensionality::<Ix4>()
        .map_err(|_| rank_err::<Ix4>(op, ndim))
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn, array};

    use super::*;

    fn param(shape: &[usize], values: Vec<f32>) -> Parameter {
        Parameter::new(ArrayD::from_shape_vec(IxDyn(shape), values).unwrap())
    }

    #[test]
    fn test_constants_do_not_track() {
        let a = Tensor::constant(array![1.0, 2.0].into_dyn());
        let b = a.add(&a).unwrap().sum();

        assert!(!b.requires_grad());
        assert_eq!(b.backward().unwrap_err(), MlErr::NoGraph);
    }

    #[test]
    fn test_elementwise_gradients() {
        // loss = sum((a * b) - 3a)
        let pa = param(&[2], vec![1.0, -2.0]);
        let pb = param(&[2], vec![4.0, 5.0]);
        let a = Tensor::from_param(&pa);
        let b = Tensor::from_param(&pb);

        let loss = a.mul(&b).unwrap().sub(&a.scale(3.0)).unwrap().sum();
        assert_eq!(loss.item(), Some(1.0 * 4.0 - 3.0 + (-2.0 * 5.0) + 6.0));

        loss.backward().unwrap();
        assert_eq!(pa.grad().unwrap().as_slice().unwrap(), &[1.0, 2.0]);
        assert_eq!(pb.grad().unwrap().as_slice().unwrap(), &[1.0, -2.0]);
    }

    #[test]
    fn test_shared_leaf_accumulates() {
        let p = param(&[1], vec![3.0]);
        let x = Tensor::from_param(&p);

        // d(x * x + x)/dx = 2x + 1
        let loss = x.mul(&x).unwrap().add(&x).unwrap().sum();
        loss.backward().unwrap();

        assert_eq!(p.grad().unwrap().as_slice().unwrap(), &[7.0]);
    }

    #[test]
    fn test_mean_relu_sigmoid_gradients() {
        let p = param(&[2], vec![-1.0, 2.0]);
        let x = Tensor::from_param(&p);

        x.relu().mean().backward().unwrap();
        assert_eq!(p.grad().unwrap().as_slice().unwrap(), &[0.0, 0.5]);

        p.zero_grad();
        let z = param(&[1], vec![0.0]);
        Tensor::from_param(&z).sigmoid().sum().backward().unwrap();
        assert_eq!(z.grad().unwrap().as_slice().unwrap(), &[0.25]);
        assert!(!p.has_grad());
    }

    #[test]
    fn test_linear_gradients() {
        let w = param(&[1, 2], vec![2.0, -1.0]);
        let b = param(&[1], vec![0.5]);
        let x = Tensor::constant(array![[1.0, 3.0], [2.0, 0.0]].into_dyn());

        let y = x
            .linear(&Tensor::from_param(&w), Some(&Tensor::from_param(&b)))
            .unwrap();
        assert_eq!(y.shape(), &[2, 1]);
        assert_eq!(y.value().iter().copied().collect::<Vec<_>>(), vec![-0.5, 4.5]);

        y.sum().backward().unwrap();
        assert_eq!(w.grad().unwrap().as_slice().unwrap(), &[3.0, 3.0]);
        assert_eq!(b.grad().unwrap().as_slice().unwrap(), &[2.0]);
    }

    #[test]
    fn test_linear_rejects_mismatched_features() {
        let x = Tensor::constant(ArrayD::zeros(IxDyn(&[2, 3])));
        let w = Tensor::constant(ArrayD::zeros(IxDyn(&[1, 2])));

        let err = x.linear(&w, None).unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { op: "linear", .. }));

        let v = Tensor::constant(ArrayD::zeros(IxDyn(&[3])));
        let err = v.linear(&w, None).unwrap_err();
        assert_eq!(
            err,
            MlErr::RankMismatch {
                op: "linear",
                got: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn test_conv2d_gradients() {
        let w = param(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = param(&[1], vec![0.0]);
        let x = Tensor::constant(ArrayD::ones(IxDyn(&[1, 1, 3, 3])));

        let y = x
            .conv2d(
                &Tensor::from_param(&w),
                Some(&Tensor::from_param(&b)),
                Conv2dGeometry::default(),
            )
            .unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert!(y.value().iter().all(|&v| v == 10.0));

        y.sum().backward().unwrap();
        assert!(w.grad().unwrap().iter().all(|&g| g == 4.0));
        assert_eq!(b.grad().unwrap().as_slice().unwrap(), &[4.0]);
    }

    #[test]
    fn test_backward_requires_scalar() {
        let p = param(&[2], vec![1.0, 2.0]);
        let x = Tensor::from_param(&p);

        let err = x.scale(2.0).backward().unwrap_err();
        assert_eq!(err, MlErr::NonScalarLoss { shape: vec![2] });
    }

    #[test]
    fn test_graph_is_freed_unless_retained() {
        let p = param(&[1], vec![1.0]);
        let loss = Tensor::from_param(&p).scale(2.0).sum();

        loss.backward_with(true).unwrap();
        assert!(!loss.is_freed());
        loss.backward().unwrap();
        assert!(loss.is_freed());
        assert_eq!(p.grad().unwrap().as_slice().unwrap(), &[4.0]);

        assert_eq!(loss.backward().unwrap_err(), MlErr::GraphFreed);
        assert_eq!(loss.graph_parameters().unwrap_err(), MlErr::GraphFreed);
    }

    #[test]
    fn test_frozen_parameters_are_leaves_without_grad() {
        let frozen = param(&[1], vec![1.0]);
        frozen.set_requires_grad(false);
        let live = param(&[1], vec![2.0]);

        let loss = Tensor::from_param(&frozen)
            .mul(&Tensor::from_param(&live))
            .unwrap()
            .sum();
        let reachable = loss.graph_parameters().unwrap();
        assert_eq!(reachable.len(), 1);
        assert!(reachable[0].ptr_eq(&live));

        loss.backward().unwrap();
        assert!(!frozen.has_grad());
        assert_eq!(live.grad().unwrap().as_slice().unwrap(), &[1.0]);
    }
}
