use ndarray::ArrayD;

use super::blocks::check_shape;
use super::broadcast::{BroadcastPlan, placeholder};
use super::{Primitive, scale_down};
use crate::comm::ReduceOp;
use crate::tensor::{from_flat, to_flat};
use crate::{DistError, Element, Partition, Result};

/// Point-to-point tag carrying a subtensor shape to a root that holds no input.
const SHAPE_TAG: u32 = 0x5348;

/// Sums subtensors of `P_x` onto the workers of `P_y` they reduce to.
///
/// The dual of [`Broadcast`](super::Broadcast): the shape of `P_y` must broadcast
/// to the shape of `P_x`, and the `P_x` worker at index `j` contributes to the
/// `P_y` worker at `j` with the broadcast axes zeroed. The adjoint broadcasts the
/// gradient back to every contributor, divided by `scale_backward` when set.
#[derive(Debug)]
pub struct SumReduce {
    plan: BroadcastPlan,
    preserve_batch: bool,
    scale_backward: Option<usize>,
    input_shape: Option<Vec<usize>>,
    output_shape: Option<Vec<usize>>,
}

impl SumReduce {
    /// Creates the layer; collective over every worker holding `p_x` and `p_y`.
    pub fn new(
        p_x: &Partition,
        p_y: &Partition,
        preserve_batch: bool,
        scale_backward: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            plan: BroadcastPlan::new(p_y, p_x)?,
            preserve_batch,
            scale_backward,
            input_shape: None,
            output_shape: None,
        })
    }
}

impl<T: Element> Primitive<T> for SumReduce {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        let mut output = placeholder(self.preserve_batch, input);
        self.input_shape = Some(input.shape().to_vec());
        self.output_shape = None;

        if let Some(contributor) = &self.plan.leaf_group {
            if !self.plan.is_local() {
                let group = &contributor.partition;
                if !contributor.root_is_leaf && group.rank() == Some(1) {
                    group.send(input.shape().to_vec(), 0, SHAPE_TAG)?;
                }
                group.reduce(&to_flat(input), 0, ReduceOp::Sum)?;
            }
        }

        if let Some(root) = &self.plan.root_group {
            let group = &root.partition;
            let (shape, local) = if self.plan.is_local() {
                (input.shape().to_vec(), to_flat(input))
            } else if group.size() > 1 {
                let shape: Vec<usize> = group.recv(1, SHAPE_TAG)?;
                let zeros = vec![T::zero(); shape.iter().product()];
                (shape, zeros)
            } else {
                return Err(DistError::InvalidTopology(format!(
                    "No worker reduces onto world rank {}",
                    group.world_rank()
                )));
            };
            let reduced = group.reduce(&local, 0, ReduceOp::Sum)?.unwrap_or_default();
            output = from_flat(&shape, reduced)?;
            self.output_shape = Some(shape);
        }

        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>> {
        let input_shape = self.input_shape.as_ref().ok_or(DistError::BackwardBeforeForward)?;
        let mut grad_input = placeholder(self.preserve_batch, grad_output);

        if let (Some(root), Some(output_shape)) = (&self.plan.root_group, &self.output_shape) {
            check_shape(output_shape, grad_output.shape())?;
            let grad = scale_down(grad_output, self.scale_backward);
            root.partition.broadcast(to_flat(&grad), 0)?;
            if self.plan.is_local() {
                grad_input = grad;
            }
        }

        if let Some(contributor) = &self.plan.leaf_group {
            if !self.plan.is_local() {
                let data: Vec<T> = contributor.partition.broadcast(Vec::new(), 0)?;
                grad_input = from_flat(input_shape, data)?;
            }
        }

        Ok(grad_input)
    }
}
