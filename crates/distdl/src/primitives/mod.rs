//! Distributed linear primitives and their adjoints.
//!
//! Each primitive is built once by every worker of the world, in the same order, and
//! then applied with [`Primitive::forward`] and [`Primitive::backward`]. `backward`
//! applies the adjoint of the Jacobian of `forward` and reuses the tensor structure
//! recorded by the last forward call. Workers that are inactive in the relevant
//! partitions pass zero-volume tensors through.

mod all_gather;
mod all_sum_reduce;
mod blocks;
mod broadcast;
mod reduce_scatter;
mod repartition;
mod sum_reduce;

pub use all_gather::*;
pub use all_sum_reduce::*;
pub use broadcast::*;
pub use reduce_scatter::*;
pub use repartition::*;
pub use sum_reduce::*;

use ndarray::ArrayD;
use num_traits::NumCast;

use crate::{Element, Result};

/// A distributed linear operator with an adjoint.
pub trait Primitive<T: Element> {
    /// Applies the operator to this worker's subtensor. Out-of-place.
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>>;

    /// Applies the adjoint operator to this worker's gradient subtensor.
    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>>;
}

/// Divides every element by `scale`, when one is given.
pub(crate) fn scale_down<T: Element>(tensor: &ArrayD<T>, scale: Option<usize>) -> ArrayD<T> {
    match scale.and_then(<T as NumCast>::from) {
        Some(scale) => tensor.mapv(|v| v / scale),
        None => tensor.clone(),
    }
}
