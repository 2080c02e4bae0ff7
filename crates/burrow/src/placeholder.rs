use std::fmt;

use burrow_core::{DType, Shape, Tensor};

/// Identifier of a placeholder, unique within one plan.
///
/// Ids are dense: a plan's inputs come first, then its state slots, then one
/// id per recorded operation, in trace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(pub u32);

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A named, shaped, typed symbolic value: one call-time input, one state
/// slot, or the result of one recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub id: PlaceholderId,
    pub name: Option<String>,
    pub shape: Shape,
    pub dtype: DType,
}

impl Placeholder {
    pub fn new(id: PlaceholderId, name: Option<String>, shape: Shape, dtype: DType) -> Self {
        Placeholder {
            id,
            name,
            shape,
            dtype,
        }
    }

    /// Whether `tensor` could be bound to this placeholder.
    pub fn accepts(&self, tensor: &Tensor) -> bool {
        tensor.shape() == &self.shape && tensor.dtype() == self.dtype
    }

    /// `"x: [2, 2] f32"`, for error messages.
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({}): {} {}", name, self.id, self.shape, self.dtype),
            None => format!("{}: {} {}", self.id, self.shape, self.dtype),
        }
    }
}

/// An operation input: a reference to a placeholder, or a constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Ref(PlaceholderId),
    Literal(Tensor),
}

impl Operand {
    pub fn as_ref_id(&self) -> Option<PlaceholderId> {
        match self {
            Operand::Ref(id) => Some(*id),
            Operand::Literal(_) => None,
        }
    }
}

/// Placeholder names must be non-empty and contain no whitespace or control
/// characters; they end up as identifiers in translated code.
pub(crate) fn check_name(name: &str) -> burrow_core::Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(burrow_core::Error::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_checks_shape_and_dtype() {
        let p = Placeholder::new(PlaceholderId(0), Some("x".into()), Shape::from((2, 2)), DType::F32);
        assert!(p.accepts(&Tensor::zeros((2, 2), DType::F32)));
        assert!(!p.accepts(&Tensor::zeros((2, 2), DType::F64)));
        assert!(!p.accepts(&Tensor::zeros(4, DType::F32)));
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("weights_1").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("two words").is_err());
    }
}
