use ndarray::ArrayD;

use super::Primitive;
use super::blocks::BlockLayout;
use crate::comm::ReduceOp;
use crate::{DistError, Element, Partition, Result, zero_volume_tensor};

/// Sums subtensors across a partition axis and splits the sum along that axis.
///
/// The workers of `P_x` that share coordinates on every other axis form a
/// reduce-scatter group. In the forward pass each group sums its members' subtensors
/// and the member at coordinate `c` on the scatter axis keeps block `c` of the sum.
/// The subtensor extent along the axis must be divisible by the partition's extent
/// along it.
///
/// The adjoint is an all-gather: the gradient blocks are collected along the same
/// axis and concatenated.
///
/// Only a single scatter axis is supported.
#[derive(Debug)]
pub struct ReduceScatter {
    p_reduce_scatter: Partition,
    axis: usize,
    /// Full (pre-scatter) layout recorded by the last forward pass.
    layout: Option<BlockLayout>,
    forwarded: bool,
}

impl ReduceScatter {
    /// Creates the layer; collective over every holder of `p_x`.
    pub fn new(p_x: &Partition, axes: &[usize]) -> Result<Self> {
        let &[axis] = axes else {
            return Err(DistError::Unsupported(format!(
                "reduce-scatter needs exactly one axis, got {axes:?}"
            )));
        };
        let p_reduce_scatter = p_x.create_allreduction_partition(axes)?;

        Ok(Self {
            p_reduce_scatter,
            axis,
            layout: None,
            forwarded: false,
        })
    }

    /// The partition the reduce-scatter runs within.
    pub fn partition(&self) -> &Partition {
        &self.p_reduce_scatter
    }

    /// The scatter axis.
    pub fn axis(&self) -> usize {
        self.axis
    }
}

impl<T: Element> Primitive<T> for ReduceScatter {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        self.forwarded = true;
        self.layout = None;

        if !self.p_reduce_scatter.active() {
            return Ok(zero_volume_tensor(None));
        }

        let group = &self.p_reduce_scatter;
        let layout = BlockLayout::split(group, input.shape())?;
        let packed = layout.pack(group, input)?;
        let scattered = group.reduce_scatter(&packed, ReduceOp::Sum)?;
        let output = crate::tensor::from_flat(&layout.block, scattered)?;

        log::debug!(
            "reduce-scatter along axis {}: {:?} -> {:?}",
            self.axis,
            layout.full,
            layout.block
        );
        self.layout = Some(layout);
        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>> {
        if !self.forwarded {
            return Err(DistError::BackwardBeforeForward);
        }
        let Some(layout) = &self.layout else {
            return Ok(zero_volume_tensor(None));
        };

        let group = &self.p_reduce_scatter;
        let local = layout.check_block(grad_output)?;
        let gathered = group.all_gather(&local)?;
        layout.unpack(group, gathered)
    }
}
