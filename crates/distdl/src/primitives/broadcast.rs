use ndarray::ArrayD;

use super::blocks::check_shape;
use super::{Primitive, scale_down};
use crate::comm::ReduceOp;
use crate::tensor::{from_flat, to_flat};
use crate::{DistError, Element, Partition, Result, zero_volume_tensor};

/// One root worker and the leaves it serves.
#[derive(Clone, Debug)]
pub(crate) struct BroadcastGroup {
    /// Linear partition with the root at rank 0.
    pub(crate) partition: Partition,
    /// Whether the root also holds a leaf subtensor of this group.
    pub(crate) root_is_leaf: bool,
}

/// The broadcast groups between a root partition and a leaf partition whose shape
/// the root shape broadcasts to.
///
/// The root shape is left-padded with ones to the leaf dimension; every axis must
/// then either match or have extent 1 in the root. The leaf at index `j` is served
/// by the root at `j` with the broadcast axes set to zero.
#[derive(Debug)]
pub(crate) struct BroadcastPlan {
    /// The group this worker is root of.
    pub(crate) root_group: Option<BroadcastGroup>,
    /// The group this worker is a leaf of.
    pub(crate) leaf_group: Option<BroadcastGroup>,
}

impl BroadcastPlan {
    /// Builds the plan; collective over every holder of `p_root`.
    pub(crate) fn new(p_root: &Partition, p_leaf: &Partition) -> Result<Self> {
        for partition in [p_root, p_leaf] {
            if partition.size() != partition.topology().size() {
                return Err(DistError::InvalidPartition(format!(
                    "Members of partition {:?} are not known to world rank {}",
                    partition.shape(),
                    partition.world_rank()
                )));
            }
        }

        let root_shape = p_root.shape();
        let leaf_shape = p_leaf.shape();
        let incompatible = || {
            DistError::InvalidTopology(format!(
                "Partition shape {root_shape:?} cannot be broadcast to {leaf_shape:?}"
            ))
        };
        if root_shape.len() > leaf_shape.len() {
            return Err(incompatible());
        }
        let offset = leaf_shape.len() - root_shape.len();
        if root_shape
            .iter()
            .zip(&leaf_shape[offset..])
            .any(|(&r, &l)| r != l && r != 1)
        {
            return Err(incompatible());
        }

        let mut groups: Vec<Vec<usize>> =
            p_root.world_ranks().iter().map(|&rank| vec![rank]).collect();
        let mut root_is_leaf = vec![false; groups.len()];
        let mut leaf_roots = Vec::with_capacity(p_leaf.size());

        for leaf_rank in 0..p_leaf.size() {
            let leaf_index = p_leaf.index_of_rank(leaf_rank);
            let root_index: Vec<usize> = leaf_index[offset..]
                .iter()
                .zip(root_shape)
                .map(|(&c, &extent)| if extent == 1 { 0 } else { c })
                .collect();
            let root_rank = p_root.rank_of_index(&root_index).ok_or_else(incompatible)?;

            let world_rank = p_leaf.world_ranks()[leaf_rank];
            if world_rank == groups[root_rank][0] {
                root_is_leaf[root_rank] = true;
            } else {
                groups[root_rank].push(world_rank);
            }
            leaf_roots.push(root_rank);
        }

        let partitions = p_root.create_group_partitions(&groups);
        let group = |root_rank: usize| BroadcastGroup {
            partition: partitions[root_rank].clone(),
            root_is_leaf: root_is_leaf[root_rank],
        };

        Ok(Self {
            root_group: p_root.rank().map(group),
            leaf_group: p_leaf.rank().map(|leaf_rank| group(leaf_roots[leaf_rank])),
        })
    }

    /// Whether this worker is root and leaf of the same group, so its data moves locally.
    pub(crate) fn is_local(&self) -> bool {
        match (&self.root_group, &self.leaf_group) {
            (Some(root), Some(leaf)) => root.partition == leaf.partition,
            _ => false,
        }
    }
}

/// Copies subtensors from `P_x` to every worker of `P_y` they broadcast to.
///
/// The shape of `P_x` must broadcast to the shape of `P_y` (after left-padding with
/// ones, every axis of `P_x` matches `P_y` or has extent 1). A worker of `P_y` at
/// index `j` receives the subtensor of the `P_x` worker at `j` with the broadcast
/// axes zeroed. A worker that is both source and destination copies locally.
///
/// The adjoint is a sum-reduction of the gradients back onto the source. With
/// `scale_backward` set, gradients are divided by it first. Workers with no output
/// (or no gradient input) return a zero-volume tensor, keeping the leading extent
/// when `preserve_batch` is set.
#[derive(Debug)]
pub struct Broadcast {
    plan: BroadcastPlan,
    preserve_batch: bool,
    scale_backward: Option<usize>,
    input_shape: Option<Vec<usize>>,
    output_shape: Option<Vec<usize>>,
}

impl Broadcast {
    /// Creates the layer; collective over every worker holding `p_x` and `p_y`.
    pub fn new(
        p_x: &Partition,
        p_y: &Partition,
        preserve_batch: bool,
        scale_backward: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            plan: BroadcastPlan::new(p_x, p_y)?,
            preserve_batch,
            scale_backward,
            input_shape: None,
            output_shape: None,
        })
    }
}

pub(crate) fn placeholder<T: Element>(preserve_batch: bool, like: &ArrayD<T>) -> ArrayD<T> {
    let batch = preserve_batch.then(|| like.shape().first().copied().unwrap_or(0));
    zero_volume_tensor(batch)
}

impl<T: Element> Primitive<T> for Broadcast {
    fn forward(&mut self, input: &ArrayD<T>) -> Result<ArrayD<T>> {
        let mut output = placeholder(self.preserve_batch, input);
        self.input_shape = Some(input.shape().to_vec());
        self.output_shape = None;

        if let Some(root) = &self.plan.root_group {
            if root.partition.size() > 1 {
                root.partition.broadcast(input.shape().to_vec(), 0)?;
                root.partition.broadcast(to_flat(input), 0)?;
            }
        }

        if let Some(leaf) = &self.plan.leaf_group {
            if self.plan.is_local() {
                output = input.clone();
            } else {
                let shape: Vec<usize> = leaf.partition.broadcast(Vec::new(), 0)?;
                let data: Vec<T> = leaf.partition.broadcast(Vec::new(), 0)?;
                output = from_flat(&shape, data)?;
            }
            self.output_shape = Some(output.shape().to_vec());
        }

        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<T>) -> Result<ArrayD<T>> {
        let input_shape = self.input_shape.as_ref().ok_or(DistError::BackwardBeforeForward)?;
        let mut grad_input = placeholder(self.preserve_batch, grad_output);

        let mut reduced_locally = None;
        if let (Some(leaf), Some(output_shape)) = (&self.plan.leaf_group, &self.output_shape) {
            check_shape(output_shape, grad_output.shape())?;
            let grad = scale_down(grad_output, self.scale_backward);
            reduced_locally = leaf.partition.reduce(&to_flat(&grad), 0, ReduceOp::Sum)?;
        }

        if let Some(root) = &self.plan.root_group {
            let reduced = if self.plan.is_local() {
                reduced_locally.unwrap_or_default()
            } else {
                let zeros = vec![T::zero(); input_shape.iter().product()];
                root.partition
                    .reduce(&zeros, 0, ReduceOp::Sum)?
                    .unwrap_or_default()
            };
            grad_input = from_flat(input_shape, reduced)?;
        }

        Ok(grad_input)
    }
}
