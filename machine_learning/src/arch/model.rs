use crate::autograd::Parameter;

/// Anything that owns trainable parameters.
pub trait Model {
    /// Returns the model's parameters paired with their names, in construction order. Nested
    /// children are prefixed with `"{child}."`.
    fn named_parameters(&self) -> Vec<(String, Parameter)>;

    fn parameters(&self) -> Vec<Parameter> {
        self.named_parameters()
            .into_iter()
            .map(|(_, param)| param)
            .collect()
    }

    /// Returns the amount of scalars across every parameter in the model.
    fn size(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, param)| param.len())
            .sum()
    }
}

/// Names the parameters of `child` as `"{prefix}.{name}"`.
pub fn prefixed<M: Model + ?Sized>(prefix: &str, child: &M) -> Vec<(String, Parameter)> {
    child
        .named_parameters()
        .into_iter()
        .map(|(name, param)| (format!("{prefix}.{name}"), param))
        .collect()
}
