//! Partitions of the world's workers.
//!
//! A [`Partition`] is an ordered group of world ranks with its own communicator
//! context and a [`CartesianTopology`]. Every worker of the world holds a handle to
//! each partition it helped create, whether or not it is a member; non-members hold
//! an *inactive* handle. Partition creation is collective over the parent: all
//! holders of the parent must create sub-partitions in the same order, which lets
//! every member derive the same communicator context without communication.

mod collectives;
mod topology;

use core::cell::Cell;
use std::rc::Rc;

pub use topology::*;

use crate::comm::{ContextId, Endpoint};
use crate::{DistError, Result};

struct Inner {
    endpoint: Rc<Endpoint>,
    context: ContextId,
    /// World ranks in partition rank order.
    members: Vec<usize>,
    /// Partition rank of this worker, if it is a member.
    rank: Option<usize>,
    topology: CartesianTopology,
    /// Number of collectives issued on this partition.
    sequence: Cell<u64>,
    /// Number of partitions created from this one.
    children: Cell<u32>,
}

/// A group of workers over which tensors are distributed.
///
/// Cloning yields another handle to the same communicator.
#[derive(Clone)]
pub struct Partition {
    inner: Rc<Inner>,
}

impl core::fmt::Debug for Partition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Partition")
            .field("context", &self.inner.context)
            .field("members", &self.inner.members)
            .field("rank", &self.inner.rank)
            .field("shape", &self.inner.topology.shape())
            .finish()
    }
}

impl PartialEq for Partition {
    fn eq(&self, other: &Self) -> bool {
        self.inner.context == other.inner.context
            && self.inner.members == other.inner.members
            && self.inner.topology == other.inner.topology
    }
}

impl Eq for Partition {}

impl Partition {
    /// The partition holding every rank of the world.
    pub(crate) fn world(endpoint: Rc<Endpoint>) -> Self {
        let size = endpoint.world_size();
        Self::from_parts(
            endpoint,
            ContextId::world(),
            (0..size).collect(),
            CartesianTopology::linear(size),
        )
    }

    fn from_parts(
        endpoint: Rc<Endpoint>,
        context: ContextId,
        members: Vec<usize>,
        topology: CartesianTopology,
    ) -> Self {
        let world_rank = endpoint.rank();
        let rank = members.iter().position(|&member| member == world_rank);
        Self {
            inner: Rc::new(Inner {
                endpoint,
                context,
                members,
                rank,
                topology,
                sequence: Cell::new(0),
                children: Cell::new(0),
            }),
        }
    }

    fn next_child_context(&self) -> ContextId {
        let id = self.inner.children.get();
        self.inner.children.set(id + 1);
        self.inner.context.child(id)
    }

    /// Whether this worker is a member of the partition.
    pub fn active(&self) -> bool {
        self.inner.rank.is_some()
    }

    /// Partition rank of this worker, `None` when inactive.
    pub fn rank(&self) -> Option<usize> {
        self.inner.rank
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.inner.members.len()
    }

    /// Shape of the partition's Cartesian topology.
    pub fn shape(&self) -> &[usize] {
        self.inner.topology.shape()
    }

    /// Number of topology axes.
    pub fn dim(&self) -> usize {
        self.inner.topology.dim()
    }

    /// The partition's Cartesian topology.
    pub fn topology(&self) -> &CartesianTopology {
        &self.inner.topology
    }

    /// Cartesian coordinates of this worker, `None` when inactive.
    pub fn index(&self) -> Option<Vec<usize>> {
        self.inner.rank.map(|rank| self.inner.topology.index_of(rank))
    }

    /// Cartesian coordinates of member `rank`.
    pub fn index_of_rank(&self, rank: usize) -> Vec<usize> {
        self.inner.topology.index_of(rank)
    }

    /// Partition rank of the member at `index`.
    pub fn rank_of_index(&self, index: &[usize]) -> Option<usize> {
        self.inner.topology.rank_of(index)
    }

    /// World rank of this worker, whether or not it is a member.
    pub fn world_rank(&self) -> usize {
        self.inner.endpoint.rank()
    }

    /// World ranks of the members, in partition rank order.
    pub fn world_ranks(&self) -> &[usize] {
        &self.inner.members
    }

    /// Creates the partition of the parent ranks `ranks`, in the given order.
    ///
    /// The new partition has a linear topology. Workers outside `ranks` receive an
    /// inactive handle.
    pub fn create_partition_inclusive(&self, ranks: &[usize]) -> Result<Partition> {
        for (i, &rank) in ranks.iter().enumerate() {
            if rank >= self.size() {
                return Err(DistError::InvalidPartition(format!(
                    "Rank {} exceeds partition size {}",
                    rank,
                    self.size()
                )));
            }
            if ranks[..i].contains(&rank) {
                return Err(DistError::InvalidPartition(format!(
                    "Rank {rank} listed more than once"
                )));
            }
        }

        let members: Vec<usize> = ranks.iter().map(|&rank| self.inner.members[rank]).collect();
        let context = self.next_child_context();
        let topology = CartesianTopology::linear(members.len());
        let partition = Self::from_parts(self.inner.endpoint.clone(), context, members, topology);

        log::debug!(
            "world rank {}: created partition {:?}",
            self.world_rank(),
            partition.inner.context
        );
        Ok(partition)
    }

    /// Creates a partition with the same members arranged on a Cartesian grid.
    ///
    /// The product of `shape` must match the member count. Inactive handles that do
    /// not know their members only have the shape itself validated.
    pub fn create_cartesian_topology_partition(&self, shape: &[usize]) -> Result<Partition> {
        let workers = if self.active() || !self.inner.members.is_empty() {
            self.size()
        } else {
            shape.iter().product()
        };
        let topology = CartesianTopologyBuilder::new(workers, shape).build()?;
        let context = self.next_child_context();

        Ok(Self::from_parts(
            self.inner.endpoint.clone(),
            context,
            self.inner.members.clone(),
            topology,
        ))
    }

    /// Creates the partition of the workers that share this worker's coordinates on
    /// every axis not in `axes`.
    ///
    /// The result keeps the parent's extent on `axes` and has extent 1 elsewhere, so a
    /// member's index in the new partition equals its parent index on `axes` and zero
    /// on the other axes. Inactive workers receive an inactive partition with no known
    /// members.
    pub fn create_allreduction_partition(&self, axes: &[usize]) -> Result<Partition> {
        check_axes(axes, self.dim())?;

        let group_shape: Vec<usize> = self
            .shape()
            .iter()
            .enumerate()
            .map(|(axis, &extent)| if axes.contains(&axis) { extent } else { 1 })
            .collect();
        let context = self.next_child_context();

        let Some(my_index) = self.index() else {
            let topology = CartesianTopology::new_unchecked(group_shape);
            return Ok(Self::from_parts(
                self.inner.endpoint.clone(),
                context,
                Vec::new(),
                topology,
            ));
        };

        let topology =
            CartesianTopologyBuilder::new(group_shape.iter().product(), group_shape).build()?;
        let members = (0..topology.size())
            .map(|group_rank| {
                let group_index = topology.index_of(group_rank);
                let parent_index: Vec<usize> = my_index
                    .iter()
                    .zip(&group_index)
                    .enumerate()
                    .map(|(axis, (&mine, &theirs))| {
                        if axes.contains(&axis) { theirs } else { mine }
                    })
                    .collect();
                // Every index of the group lies on the parent grid.
                let parent_rank = self.rank_of_index(&parent_index).unwrap_or_default();
                self.inner.members[parent_rank]
            })
            .collect();

        Ok(Self::from_parts(
            self.inner.endpoint.clone(),
            context,
            members,
            topology,
        ))
    }

    /// Creates one linear partition per group of world ranks.
    ///
    /// All holders of this partition must pass the same groups. The returned vector
    /// has one entry per group; entries for groups this worker is not part of are
    /// inactive.
    pub(crate) fn create_group_partitions(&self, groups: &[Vec<usize>]) -> Vec<Partition> {
        let base = self.next_child_context();

        groups
            .iter()
            .enumerate()
            .map(|(id, members)| {
                Self::from_parts(
                    self.inner.endpoint.clone(),
                    base.child(id as u32),
                    members.clone(),
                    CartesianTopology::linear(members.len()),
                )
            })
            .collect()
    }
}
