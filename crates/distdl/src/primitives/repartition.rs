use ndarray::{ArrayD, IxDyn};

use super::Primitive;
use super::blocks::check_shape;
use super::broadcast::placeholder;
use crate::slicing::{
    compute_partition_intersection, compute_subshape, slice_view, slice_view_mut,
};
use crate::tensor::from_flat;
use crate::{DistError, Element, Partition, Result, assemble_global_shape};

const FORWARD_TAG: u32 = 0x5250;
const ADJOINT_TAG: u32 = 0x5251;

/// Moves a tensor from one balanced decomposition, over `P_x`, to another over `P_y`.
///
/// Both partitions must have the tensor's dimension. Every `P_x` worker sends the
/// region it shares with each `P_y` worker point-to-point; a worker in both keeps
/// its own overlap locally. The global shape is assembled on `P_x` at every forward
/// call, so `P_x` subtensors must follow the balanced decomposition of that shape.
///
/// The adjoint is the reverse exchange from `P_y` back to `P_x`.
#[derive(Debug)]
pub struct Repartition {
    p_x: Partition,
    p_y: Partition,
    union: Partition,
    preserve_batch: bool,
    global_shape: Option<Vec<usize>>,
    forwarded: bool,
}

impl Repartition {
    /// Creates the layer; collective over every worker holding `p_x` and `p_y`.
    pub fn new(p_x: &Partition, p_y: &Partition, preserve_batch: bool) -> Result<Self> {
        for partition in [p_x, p_y] {
            if partition.size() != partition.topology().size() {
                return Err(DistError::InvalidPartition(format!(
                    "Members of partition {:?} are not known to world rank {}",
                    partition.shape(),
                    partition.world_rank()
                )));
            }
        }
        if p_x.dim() != p_y.dim() {
            return Err(DistError::InvalidTopology(format!(
                "Cannot repartition from {:?} to {:?}",
                p_x.shape(),
                p_y.shape()
            )));
        }

        // P_x rank 0 comes first, so it is rank 0 of the union.
        let mut members = p_x.world_ranks().to_vec();
        for &rank in p_y.world_ranks() {
            if !members.contains(&rank) {
                members.push(rank);
            }
        }
        let union = p_x
            .create_group_partitions(&[members])
            .pop()
            .ok_or_else(|| DistError::InvalidPartition("Empty repartition union".into()))?;

        Ok(Self {
            p_x: p_x.clone(),
            p_y: p_y.clone(),
            union,
            preserve_batch,
            global_shape: None,
            forwarded: false,
        })
    }

    fn union_rank(&self, world_rank: usize) -> Result<usize> {
        self.union
            .world_ranks()
            .iter()
            .position(|&rank| rank == world_rank)
            .ok_or_else(|| {
                DistError::InvalidPartition(format!("World rank {world_rank} is not in the union"))
            })
    }

    /// Sends the overlaps of `input` from the `from` decomposition and assembles this
    /// worker's subtensor of the `to` decomposition. Returns `None` outside `to`.
    fn exchange<T: Element>(
        &self,
        from: &Partition,
        to: &Partition,
        global: &[usize],
        input: &ArrayD<T>,
        tag: u32,
    ) -> Result<Option<ArrayD<T>>> {
        let own_rank = self.union.world_rank();
        let mut kept = None;

        if let Some(index) = from.index() {
            check_shape(&compute_subshape(from.shape(), &index, global), input.shape())?;
            let overlaps = compute_partition_intersection(from, to, global)?;
            for (rank, slices) in overlaps.into_iter().enumerate() {
                let Some(slices) = slices else { continue };
                let region: Vec<T> = slice_view(input, &slices).iter().copied().collect();
                let dest = to.world_ranks()[rank];
                if dest == own_rank {
                    kept = Some(region);
                } else {
                    self.union.send(region, self.union_rank(dest)?, tag)?;
                }
            }
        }

        let Some(index) = to.index() else {
            return Ok(None);
        };
        let mut output = ArrayD::zeros(IxDyn(&compute_subshape(to.shape(), &index, global)));
        let overlaps = compute_partition_intersection(to, from, global)?;
        for (rank, slices) in overlaps.into_iter().enumerate() {
            let Some(slices) = slices else { continue };
            let source = from.world_ranks()[rank];
            let region = if source == own_rank {
                kept.take().unwrap_or_default()
            } else {
                self.union.recv(self.union_rank(source)?, tag)?
            };
            let shape: Vec<usize> = slices.iter().map(|slice| slice.len()).collect();
            slice_view_mut(&mut output, &slices).assign(&from_flat(&shape, region)?);
        }

        Ok(Some(output))
    }
}

impl<T: Element> Primitive<T> for Repartition {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        self.forwarded = true;
        self.global_shape = None;
        if !self.union.active() {
            return Ok(placeholder(self.preserve_batch, input));
        }

        let assembled = assemble_global_shape(&self.p_x, input.shape())?.unwrap_or_default();
        let global: Vec<usize> = self.union.broadcast(assembled, 0)?;
        if global.len() != self.p_y.dim() {
            return Err(DistError::ShapeMismatch {
                expected: vec![self.p_y.dim()],
                got: vec![global.len()],
            });
        }

        let output = self.exchange(&self.p_x, &self.p_y, &global, input, FORWARD_TAG)?;
        self.global_shape = Some(global);
        Ok(output.unwrap_or_else(|| placeholder(self.preserve_batch, input)))
    }

    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>> {
        if !self.forwarded {
            return Err(DistError::BackwardBeforeForward);
        }
        let Some(global) = &self.global_shape else {
            return Ok(placeholder(self.preserve_batch, grad_output));
        };

        let grad_input = self.exchange(&self.p_y, &self.p_x, global, grad_output, ADJOINT_TAG)?;
        Ok(grad_input.unwrap_or_else(|| placeholder(self.preserve_batch, grad_output)))
    }
}
