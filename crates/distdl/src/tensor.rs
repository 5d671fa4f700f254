use core::fmt::Debug;

use derive_new::new;
use ndarray::{ArrayD, IxDyn};
use num_traits::{Num, NumCast};

use crate::comm::ReduceOp;
use crate::{DistError, Partition, Result};

/// Scalar types that can be stored in distributed tensors and reduced across workers.
pub trait Element: Num + NumCast + Copy + PartialOrd + Debug + Send + Sync + 'static {}

impl Element for f32 {}
impl Element for f64 {}
impl Element for i32 {}
impl Element for i64 {}

/// Shape metadata of a (local) tensor.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct TensorStructure {
    /// Extent along each axis.
    pub shape: Vec<usize>,
}

impl TensorStructure {
    /// Structure of an existing tensor.
    pub fn of<T>(tensor: &ArrayD<T>) -> Self {
        Self::new(tensor.shape().to_vec())
    }

    /// Number of elements described by the structure.
    pub fn volume(&self) -> usize {
        self.shape.iter().product()
    }
}

/// The placeholder tensor held by workers that are inactive in a partition.
///
/// With `batch` set, the leading extent is preserved and the tensor has shape
/// `[batch, 0]`; otherwise its shape is `[0]`.
pub fn zero_volume_tensor<T: Element>(batch: Option<usize>) -> ArrayD<T> {
    match batch {
        Some(batch) => ArrayD::zeros(IxDyn(&[batch, 0])),
        None => ArrayD::zeros(IxDyn(&[0])),
    }
}

/// Builds a tensor of `shape` from row-major `data`.
pub(crate) fn from_flat<T: Element>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
    let expected = shape.iter().product::<usize>();
    if data.len() != expected {
        return Err(DistError::BufferSizeMismatch {
            expected,
            actual: data.len(),
        });
    }
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| DistError::ShapeMismatch {
        expected: shape.to_vec(),
        got: vec![expected],
    })
}

/// Row-major copy of the tensor's elements.
pub(crate) fn to_flat<T: Element>(tensor: &ArrayD<T>) -> Vec<T> {
    tensor.iter().copied().collect()
}

/// Assembles the global shape of a tensor distributed over `partition`.
///
/// Every active worker contributes its local shape. Along each partitioned axis
/// the global extent is the sum of the local extents of the workers in the first
/// slab of the other axes; workers in the same slab must agree on that extent.
/// Inactive workers receive `None`.
pub fn assemble_global_shape(
    partition: &Partition,
    local_shape: &[usize],
) -> Result<Option<Vec<usize>>> {
    if !partition.active() {
        return Ok(None);
    }

    let shape = partition.shape();
    if local_shape.len() != shape.len() {
        return Err(DistError::ShapeMismatch {
            expected: vec![shape.len()],
            got: vec![local_shape.len()],
        });
    }

    let dim = shape.len();
    let gathered = partition.all_gather(local_shape)?;
    let mut global = vec![0; dim];

    let locals: Vec<&[usize]> = gathered.chunks(dim).collect();

    for (rank, local) in locals.iter().enumerate() {
        let index = partition.index_of_rank(rank);
        for axis in 0..dim {
            // The worker at coordinate zero on every other axis sets the extent of this slab.
            let mut line_index = vec![0; dim];
            line_index[axis] = index[axis];
            let line_rank = partition.rank_of_index(&line_index).unwrap_or_default();

            if line_rank == rank {
                global[axis] += local[axis];
            } else if locals[line_rank][axis] != local[axis] {
                return Err(DistError::ShapeMismatch {
                    expected: locals[line_rank].to_vec(),
                    got: local.to_vec(),
                });
            }
        }
    }

    Ok(Some(global))
}

/// Inner product of two local tensors summed over every worker of `partition`.
///
/// Inactive workers may pass zero-volume tensors; they contribute nothing but
/// must still be members of `partition`.
pub fn global_inner_product<T: Element>(
    partition: &Partition,
    a: &ArrayD<T>,
    b: &ArrayD<T>,
) -> Result<T> {
    if a.shape() != b.shape() {
        return Err(DistError::ShapeMismatch {
            expected: a.shape().to_vec(),
            got: b.shape().to_vec(),
        });
    }

    let local = a
        .iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y);
    let reduced = partition.all_reduce(&[local], ReduceOp::Sum)?;

    Ok(reduced[0])
}
