use ndarray::ArrayD;

use super::blocks::BlockLayout;
use super::{Primitive, scale_down};
use crate::comm::ReduceOp;
use crate::tensor::{from_flat, to_flat};
use crate::{DistError, Element, Partition, Result, zero_volume_tensor};

/// Concatenates subtensors across one or more partition axes.
///
/// The workers of `P_x` that share coordinates on every axis not in `axes` form an
/// all-gather group. Every member ends up with the concatenation of the group's
/// subtensors, the subtensor of the member at coordinates `c` placed at block `c`.
/// All members must hold subtensors of the same shape.
///
/// The adjoint is a reduce-scatter: each member receives the sum of the gradient
/// blocks at its own coordinates. With `scale_backward` set, the gradient is divided
/// by it first.
#[derive(Debug)]
pub struct AllGather {
    p_all_gather: Partition,
    axes: Vec<usize>,
    scale_backward: Option<usize>,
    /// Layout of the gathered tensor recorded by the last forward pass.
    layout: Option<BlockLayout>,
    forwarded: bool,
}

impl AllGather {
    /// Creates the layer; collective over every holder of `p_x`.
    pub fn new(p_x: &Partition, axes: &[usize], scale_backward: Option<usize>) -> Result<Self> {
        if axes.is_empty() {
            return Err(DistError::Unsupported(
                "all-gather needs at least one axis".to_string(),
            ));
        }
        let p_all_gather = p_x.create_allreduction_partition(axes)?;

        Ok(Self {
            p_all_gather,
            axes: axes.to_vec(),
            scale_backward,
            layout: None,
            forwarded: false,
        })
    }

    /// The partition the all-gather runs within.
    pub fn partition(&self) -> &Partition {
        &self.p_all_gather
    }

    /// The gathered axes.
    pub fn axes(&self) -> &[usize] {
        &self.axes
    }
}

impl<T: Element> Primitive<T> for AllGather {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        self.forwarded = true;
        self.layout = None;

        if !self.p_all_gather.active() {
            return Ok(zero_volume_tensor(None));
        }

        let group = &self.p_all_gather;
        let layout = BlockLayout::join(group, input.shape())?;
        let gathered = group.all_gather(&to_flat(input))?;
        let output = layout.unpack(group, gathered)?;

        log::debug!(
            "all-gather along axes {:?}: {:?} -> {:?}",
            self.axes,
            layout.block,
            layout.full
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

        let group = &self.p_all_gather;
        let grad = scale_down(grad_output, self.scale_backward);
        let packed = layout.pack(group, &grad)?;
        let scattered = group.reduce_scatter(&packed, ReduceOp::Sum)?;
        from_flat(&layout.block, scattered)
    }
}
