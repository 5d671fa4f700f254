use ndarray::ArrayD;

use crate::slicing::{block_slices, slice_view, slice_view_mut};
use crate::tensor::{from_flat, to_flat};
use crate::{DistError, Element, Partition, Result};

/// Block layout of a tensor over an all-reduction partition: the tensor of shape
/// `full` is cut into `group.shape()` equal blocks of shape `block`, and member `r`
/// owns the block at its partition index.
#[derive(Debug)]
pub(crate) struct BlockLayout {
    pub(crate) full: Vec<usize>,
    pub(crate) block: Vec<usize>,
}

impl BlockLayout {
    /// Layout of a full tensor of shape `full` split over `group`.
    pub(crate) fn split(group: &Partition, full: &[usize]) -> Result<Self> {
        check_dim(group, full)?;

        let mut block = Vec::with_capacity(full.len());
        for (axis, (&extent, &parts)) in full.iter().zip(group.shape()).enumerate() {
            if extent % parts != 0 {
                return Err(DistError::Indivisible { axis, extent, parts });
            }
            block.push(extent / parts);
        }

        Ok(Self {
            full: full.to_vec(),
            block,
        })
    }

    /// Layout of the full tensor assembled from blocks of shape `block` over `group`.
    pub(crate) fn join(group: &Partition, block: &[usize]) -> Result<Self> {
        check_dim(group, block)?;

        Ok(Self {
            full: block.iter().zip(group.shape()).map(|(&b, &p)| b * p).collect(),
            block: block.to_vec(),
        })
    }

    /// Flattens `tensor` block by block, in member order.
    pub(crate) fn pack<T: Element>(&self, group: &Partition, tensor: &ArrayD<T>) -> Result<Vec<T>> {
        check_shape(&self.full, tensor.shape())?;

        let mut flat = Vec::with_capacity(tensor.len());
        for rank in 0..group.size() {
            let slices = block_slices(&self.block, &group.index_of_rank(rank));
            flat.extend(slice_view(tensor, &slices).iter().copied());
        }
        Ok(flat)
    }

    /// Inverse of [`BlockLayout::pack`].
    pub(crate) fn unpack<T: Element>(&self, group: &Partition, flat: Vec<T>) -> Result<ArrayD<T>> {
        let volume = self.block.iter().product::<usize>();
        if flat.len() != volume * group.size() {
            return Err(DistError::BufferSizeMismatch {
                expected: volume * group.size(),
                actual: flat.len(),
            });
        }

        let mut tensor = ArrayD::zeros(self.full.clone());
        for (rank, chunk) in flat.chunks(volume.max(1)).take(group.size()).enumerate() {
            let block = from_flat(&self.block, chunk.to_vec())?;
            let slices = block_slices(&self.block, &group.index_of_rank(rank));
            slice_view_mut(&mut tensor, &slices).assign(&block);
        }
        Ok(tensor)
    }

    pub(crate) fn check_block<T: Element>(&self, tensor: &ArrayD<T>) -> Result<Vec<T>> {
        check_shape(&self.block, tensor.shape())?;
        Ok(to_flat(tensor))
    }
}

fn check_dim(group: &Partition, shape: &[usize]) -> Result<()> {
    if shape.len() != group.dim() {
        return Err(DistError::InvalidTopology(format!(
            "Tensor has {} axes but the partition has {}",
            shape.len(),
            group.dim()
        )));
    }
    Ok(())
}

pub(crate) fn check_shape(expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(DistError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}
