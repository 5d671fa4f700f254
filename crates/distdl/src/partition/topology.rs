use crate::{DistError, Result};

/// Represents a logical Cartesian arrangement of the workers of a partition.
///
/// A `CartesianTopology` places the `n` workers of a partition on an N-dimensional
/// grid. Workers are assigned to grid points in row-major order: worker `r` sits at
/// the coordinates obtained by unravelling `r` over the shape, so the last axis varies
/// fastest. The topology carries no physical meaning; it only organizes how tensors
/// are decomposed over the workers.
///
/// For example, a topology with shape `[2, 3]` over six workers places worker `4` at
/// index `[1, 1]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CartesianTopology {
    /// Extent of the grid along each axis.
    shape: Vec<usize>,
}

impl CartesianTopology {
    /// The one-dimensional topology over `size` workers.
    pub fn linear(size: usize) -> Self {
        Self { shape: vec![size] }
    }

    pub(crate) fn new_unchecked(shape: Vec<usize>) -> Self {
        Self { shape }
    }

    /// Extent of the grid along each axis.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    /// Number of grid points.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Coordinates of the worker with partition rank `rank`.
    pub fn index_of(&self, rank: usize) -> Vec<usize> {
        let mut index = vec![0; self.shape.len()];
        let mut rest = rank;
        for (axis, &extent) in self.shape.iter().enumerate().rev() {
            index[axis] = rest % extent;
            rest /= extent;
        }
        index
    }

    /// Partition rank of the worker at `index`, if the index lies on the grid.
    pub fn rank_of(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.shape.len() {
            return None;
        }
        index
            .iter()
            .zip(&self.shape)
            .try_fold(0, |rank, (&i, &extent)| (i < extent).then_some(rank * extent + i))
    }
}

/// A builder for constructing a [`CartesianTopology`].
///
/// This builder checks that every axis has a non-zero extent and that the grid
/// holds exactly the number of workers of the partition it will describe.
#[derive(Clone, Debug)]
pub struct CartesianTopologyBuilder {
    /// Number of workers the topology must hold.
    workers: usize,
    /// Extent of the grid along each axis.
    shape: Vec<usize>,
}

impl CartesianTopologyBuilder {
    /// Creates a new [`CartesianTopologyBuilder`] for `workers` workers arranged as `shape`.
    ///
    /// # Arguments
    /// * `workers` - The number of workers in the partition.
    /// * `shape` - The extent of the grid along each axis.
    pub fn new<S: Into<Vec<usize>>>(workers: usize, shape: S) -> Self {
        Self {
            workers,
            shape: shape.into(),
        }
    }

    /// Builds a [`CartesianTopology`] from the current configuration.
    ///
    /// # Returns
    /// A `CartesianTopology` if the configuration is valid, or a
    /// [`DistError::InvalidTopology`] otherwise.
    pub fn build(self) -> Result<CartesianTopology> {
        if self.shape.is_empty() {
            return Err(DistError::InvalidTopology(
                "Topology needs at least one axis".to_string(),
            ));
        }

        if let Some(axis) = self.shape.iter().position(|&extent| extent == 0) {
            return Err(DistError::InvalidTopology(format!(
                "Axis {} of shape {:?} is empty",
                axis, self.shape
            )));
        }

        let expected_workers = self.shape.iter().product::<usize>();
        if self.workers != expected_workers {
            return Err(DistError::InvalidTopology(format!(
                "Worker count ({}) doesn't match topology shape {:?}",
                self.workers, self.shape,
            )));
        }

        Ok(CartesianTopology { shape: self.shape })
    }
}

/// Validates a selection of axes of a `dim`-dimensional topology.
pub(crate) fn check_axes(axes: &[usize], dim: usize) -> Result<()> {
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= dim {
            return Err(DistError::InvalidTopology(format!(
                "Axis {axis} exceeds topology dimension {dim}"
            )));
        }
        if axes[..i].contains(&axis) {
            return Err(DistError::InvalidTopology(format!(
                "Axis {axis} selected more than once"
            )));
        }
    }
    Ok(())
}
