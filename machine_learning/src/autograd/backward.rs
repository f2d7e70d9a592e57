use std::collections::{HashMap, HashSet, hash_map::Entry};

use ndarray::ArrayD;

use super::{
    parameter::Parameter,
    tensor::{GradFn, GraphLink, Tensor},
};
use crate::{MlErr, Result};

/// Reverse-mode traversal from `root`, accumulating into the parameters at the leaves.
pub(crate) fn run(root: &Tensor, retain_graph: bool) -> Result<()> {
    if root.len() != 1 {
        return Err(MlErr::NonScalarLoss {
            shape: root.shape().to_vec(),
        });
    }

    if !root.requires_grad() {
        return Err(MlErr::NoGraph);
    }

    let order = topological_order(root)?;
    let mut grads: HashMap<usize, ArrayD<f32>> = HashMap::new();
    grads.insert(root.key(), ArrayD::ones(root.value().raw_dim()));

    for tensor in &order {
        let Some(grad) = grads.remove(&tensor.key()) else {
            continue;
        };

        let link = tensor.link();
        let GraphLink::Live(grad_fn) = &*link else {
            continue;
        };

        if let GradFn::AccumulateGrad(param) = grad_fn {
            if param.requires_grad() {
                param.accumulate_grad(&grad)?;
            }
            continue;
        }

        for (input, delta) in grad_fn.backward(tensor.value(), &grad)? {
            if !input.requires_grad() {
                continue;
            }

            match grads.entry(input.key()) {
                Entry::Occupied(mut acc) => *acc.get_mut() += &delta,
                Entry::Vacant(slot) => {
                    slot.insert(delta);
                }
            }
        }
    }

    if !retain_graph {
        order.iter().for_each(Tensor::free);
    }

    Ok(())
}

/// Collects the parameters at the leaves of the graph behind `root`.
pub(crate) fn reachable_parameters(root: &Tensor) -> Result<Vec<Parameter>> {
    let mut params: Vec<Parameter> = Vec::new();

    for tensor in topological_order(root)? {
        if let GraphLink::Live(GradFn::AccumulateGrad(param)) = &*tensor.link() {
            if !params.iter().any(|p| p.ptr_eq(param)) {
                params.push(param.clone());
            }
        }
    }

    Ok(params)
}

/// Orders the tracked nodes behind `root` so that every node comes before its inputs.
///
/// # Returns
/// An error if any of the nodes was freed by a previous backward pass.
fn topological_order(root: &Tensor) -> Result<Vec<Tensor>> {
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            post_order.push(tensor);
            continue;
        }

        if !visited.insert(tensor.key()) {
            continue;
        }

        let inputs: Vec<Tensor> = match &*tensor.link() {
            GraphLink::Freed => return Err(MlErr::GraphFreed),
            GraphLink::Constant => Vec::new(),
            GraphLink::Live(grad_fn) => grad_fn
                .inputs()
                .into_iter()
                .filter(|input| input.requires_grad())
                .cloned()
                .collect(),
        };

        stack.push((tensor, true));
        stack.extend(
            inputs
                .into_iter()
                .filter(|input| !visited.contains(&input.key()))
                .map(|input| (input, false)),
        );
    }

    post_order.reverse();
    Ok(post_order)
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn test_diamond_is_ordered_before_inputs() {
        let p = Parameter::new(ArrayD::from_elem(IxDyn(&[1]), 2.0));
        let x = Tensor::from_param(&p);
        let left = x.scale(3.0);
        let right = x.scale(5.0);
        let root = left.add(&right).unwrap().sum();

        let order = topological_order(&root).unwrap();
        let pos = |t: &Tensor| order.iter().position(|o| o.key() == t.key()).unwrap();

        assert_eq!(order.len(), 5);
        assert_eq!(pos(&root), 0);
        assert!(pos(&left) < pos(&x));
        assert!(pos(&right) < pos(&x));

        run(&root, false).unwrap();
        assert_eq!(p.grad().unwrap().as_slice().unwrap(), &[8.0]);
    }

    #[test]
    fn test_reachable_parameters_dedups_shared_leaves() {
        let p = Parameter::new(ArrayD::zeros(IxDyn(&[1])));
        let q = Parameter::new(ArrayD::zeros(IxDyn(&[1])));
        let a = Tensor::from_param(&p);
        let b = Tensor::from_param(&p);
        let root = a.add(&b).unwrap().sum();

        let params = reachable_parameters(&root).unwrap();
        assert_eq!(params.len(), 1);
        assert!(params[0].ptr_eq(&p));
        assert!(!params[0].ptr_eq(&q));
    }
}
