use serde::{Deserialize, Serialize};

use crate::Element;

/// Element-wise reduction applied by reducing collectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceOp {
    /// Sum of the contributions.
    Sum,
    /// Product of the contributions.
    Prod,
    /// Minimum of the contributions.
    Min,
    /// Maximum of the contributions.
    Max,
}

impl ReduceOp {
    /// Folds `other` into `acc` element-wise.
    ///
    /// Both slices must have the same length.
    pub fn apply<T: Element>(self, acc: &mut [T], other: &[T]) {
        debug_assert_eq!(acc.len(), other.len());

        for (a, &b) in acc.iter_mut().zip(other) {
            *a = match self {
                ReduceOp::Sum => *a + b,
                ReduceOp::Prod => *a * b,
                ReduceOp::Min if b < *a => b,
                ReduceOp::Max if b > *a => b,
                ReduceOp::Min | ReduceOp::Max => *a,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_ops() {
        let other = [4.0f64, -1.0, 2.0];

        let mut acc = [1.0f64, 2.0, 3.0];
        ReduceOp::Sum.apply(&mut acc, &other);
        assert_eq!(acc, [5.0, 1.0, 5.0]);

        let mut acc = [1.0f64, 2.0, 3.0];
        ReduceOp::Prod.apply(&mut acc, &other);
        assert_eq!(acc, [4.0, -2.0, 6.0]);

        let mut acc = [1.0f64, 2.0, 3.0];
        ReduceOp::Min.apply(&mut acc, &other);
        assert_eq!(acc, [1.0, -1.0, 2.0]);

        let mut acc = [1.0f64, 2.0, 3.0];
        ReduceOp::Max.apply(&mut acc, &other);
        assert_eq!(acc, [4.0, 2.0, 3.0]);
    }

    #[test]
    fn test_reduce_op_serde_names() {
        let op: ReduceOp = serde_json::from_str("\"max\"").unwrap();
        assert_eq!(op, ReduceOp::Max);
        assert_eq!(serde_json::to_string(&ReduceOp::Sum).unwrap(), "\"sum\"");
    }
}
