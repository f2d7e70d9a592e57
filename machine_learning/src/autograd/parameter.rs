use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use ndarray::ArrayD;

use crate::{MlErr, Result};

static NEXT_PARAM_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a `Parameter`, shared by all of its handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

struct ParamInner {
    id: ParamId,
    data: RefCell<ArrayD<f32>>,
    grad: RefCell<Option<ArrayD<f32>>>,
    requires_grad: Cell<bool>,
}

/// A trainable tensor owned by a model.
///
/// Cloning a `Parameter` yields another handle to the same storage, which is how the model, the
/// optimizer and the computational graph all refer to one set of weights. After a backward pass
/// the parameter holds a gradient only if it was reachable from the loss.
#[derive(Clone)]
pub struct Parameter {
    inner: Rc<ParamInner>,
}

impl Parameter {
    /// Creates a new `Parameter` that requires grad and has no gradient yet.
    ///
    /// # Arguments
    /// * `data` - The initial value of the parameter.
    pub fn new(data: ArrayD<f32>) -> Self {
        let id = ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed));

        Self {
            inner: Rc::new(ParamInner {
                id,
                data: RefCell::new(data),
                grad: RefCell::new(None),
                requires_grad: Cell::new(true),
            }),
        }
    }

    pub fn id(&self) -> ParamId {
        self.inner.id
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.data.borrow().shape().to_vec()
    }

    /// Returns the amount of scalars in this parameter.
    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> Ref<'_, ArrayD<f32>> {
        self.inner.data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<'_, ArrayD<f32>> {
        self.inner.data.borrow_mut()
    }

    /// Returns a copy of the current gradient, `None` if the parameter was not reached by the last
    /// backward pass since gradients were cleared.
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.inner.grad.borrow().clone()
    }

    pub fn grad_ref(&self) -> Ref<'_, Option<ArrayD<f32>>> {
        self.inner.grad.borrow()
    }

    pub fn grad_mut(&self) -> RefMut<'_, Option<ArrayD<f32>>> {
        self.inner.grad.borrow_mut()
    }

    pub fn has_grad(&self) -> bool {
        self.inner.grad.borrow().is_some()
    }

    /// Drops the gradient, the parameter goes back to *not in the graph* until the next backward.
    pub fn zero_grad(&self) {
        self.inner.grad.borrow_mut().take();
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad.get()
    }

    /// Freezes (`false`) or unfreezes (`true`) the parameter. Freezing also drops its gradient.
    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.inner.requires_grad.set(requires_grad);
        if !requires_grad {
            self.zero_grad();
        }
    }

    /// Adds `delta` to the gradient, initializing it on the first contribution.
    ///
    /// # Returns
    /// An error if `delta` doesn't have the parameter's shape.
    pub(crate) fn accumulate_grad(&self, delta: &ArrayD<f32>) -> Result<()> {
        let shape = self.shape();
        if delta.shape() != shape.as_slice() {
            return Err(MlErr::ShapeMismatch {
                op: "gradient accumulation",
                lhs: shape,
                rhs: delta.shape().to_vec(),
            });
        }

        let mut grad = self.inner.grad.borrow_mut();
        match grad.as_mut() {
            Some(g) => *g += delta,
            None => *grad = Some(delta.clone()),
        }

        Ok(())
    }

    /// Whether both handles point to the same parameter.
    pub fn ptr_eq(&self, other: &Parameter) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.inner.id)
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .field("has_grad", &self.has_grad())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn test_accumulate_grad_sums_contributions() {
        let p = Parameter::new(ArrayD::zeros(IxDyn(&[2])));
        assert!(!p.has_grad());

        let delta = ArrayD::from_elem(IxDyn(&[2]), 1.5);
        p.accumulate_grad(&delta).unwrap();
        p.accumulate_grad(&delta).unwrap();

        assert_eq!(p.grad().unwrap().as_slice().unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn test_accumulate_grad_rejects_wrong_shape() {
        let p = Parameter::new(ArrayD::zeros(IxDyn(&[2])));
        let delta = ArrayD::zeros(IxDyn(&[3]));

        let err = p.accumulate_grad(&delta).unwrap_err();
        assert!(matches!(err, MlErr::ShapeMismatch { .. }));
        assert!(!p.has_grad());
    }

    #[test]
    fn test_handles_share_storage() {
        let p = Parameter::new(ArrayD::zeros(IxDyn(&[1])));
        let q = p.clone();

        q.accumulate_grad(&ArrayD::ones(IxDyn(&[1]))).unwrap();
        assert!(p.has_grad());
        assert!(p.ptr_eq(&q));
        assert_eq!(p.id(), q.id());

        p.zero_grad();
        assert!(!q.has_grad());
    }

    #[test]
    fn test_freezing_drops_gradient() {
        let p = Parameter::new(ArrayD::zeros(IxDyn(&[1])));
        p.accumulate_grad(&ArrayD::ones(IxDyn(&[1]))).unwrap();

        p.set_requires_grad(false);
        assert!(!p.requires_grad());
        assert!(!p.has_grad());
    }
}
