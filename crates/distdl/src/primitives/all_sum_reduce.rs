use ndarray::ArrayD;

use super::blocks::check_shape;
use super::{Primitive, scale_down};
use crate::comm::ReduceOp;
use crate::tensor::{from_flat, to_flat};
use crate::{DistError, Element, Partition, Result, zero_volume_tensor};

/// Sums subtensors across one or more partition axes and returns the sum to every
/// member.
///
/// All-sum-reduce is self-adjoint. With `scale_backward` set, the gradient is
/// divided by it before the adjoint reduction.
#[derive(Debug)]
pub struct AllSumReduce {
    p_allreduce: Partition,
    scale_backward: Option<usize>,
    /// Subtensor shape recorded by the last forward pass.
    shape: Option<Vec<usize>>,
    forwarded: bool,
}

impl AllSumReduce {
    /// Creates the layer; collective over every holder of `p_x`.
    pub fn new(p_x: &Partition, axes: &[usize], scale_backward: Option<usize>) -> Result<Self> {
        let p_allreduce = p_x.create_allreduction_partition(axes)?;

        Ok(Self {
            p_allreduce,
            scale_backward,
            shape: None,
            forwarded: false,
        })
    }

    /// The partition the reduction runs within.
    pub fn partition(&self) -> &Partition {
        &self.p_allreduce
    }
}

impl<T: Element> Primitive<T> for AllSumReduce {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        self.forwarded = true;
        self.shape = None;

        if !self.p_allreduce.active() {
            return Ok(zero_volume_tensor(None));
        }

        let reduced = self.p_allreduce.all_reduce(&to_flat(input), ReduceOp::Sum)?;
        self.shape = Some(input.shape().to_vec());
        from_flat(input.shape(), reduced)
    }

    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>> {
        if !self.forwarded {
            return Err(DistError::BackwardBeforeForward);
        }
        let Some(shape) = &self.shape else {
            return Ok(zero_volume_tensor(None));
        };
        check_shape(shape, grad_output.shape())?;

        let grad = scale_down(grad_output, self.scale_backward);
        let reduced = self.p_allreduce.all_reduce(&to_flat(&grad), ReduceOp::Sum)?;
        from_flat(shape, reduced)
    }
}
