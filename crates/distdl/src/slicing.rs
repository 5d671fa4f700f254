//! Geometry of subtensors under a balanced block decomposition.
//!
//! A global extent `n` split over `p` workers gives every worker `n / p` elements and
//! the first `n % p` workers one extra element. All functions work per axis on shape
//! vectors of equal length.

use core::ops::Range;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Slice};

use crate::{DistError, Partition, Result};

/// Local shape of the subtensor at `index` on a partition of shape `dims`.
pub fn compute_subshape(dims: &[usize], index: &[usize], sizes: &[usize]) -> Vec<usize> {
    dims.iter()
        .zip(index)
        .zip(sizes)
        .map(|((&p, &c), &n)| n / p + usize::from(c < n % p))
        .collect()
}

/// Global start of the subtensor at `index`, per axis.
pub fn compute_starts(dims: &[usize], index: &[usize], sizes: &[usize]) -> Vec<usize> {
    dims.iter()
        .zip(index)
        .zip(sizes)
        .map(|((&p, &c), &n)| (n / p) * c + c.min(n % p))
        .collect()
}

/// Global stop (exclusive) of the subtensor at `index`, per axis.
pub fn compute_stops(dims: &[usize], index: &[usize], sizes: &[usize]) -> Vec<usize> {
    compute_starts(dims, index, sizes)
        .into_iter()
        .zip(compute_subshape(dims, index, sizes))
        .map(|(start, subsize)| start + subsize)
        .collect()
}

/// Overlap of two boxes, as `(starts, stops, subsizes)`.
///
/// Axes without overlap have a zero subsize and `stop < start` is clamped away.
pub fn compute_intersection(
    r0_starts: &[usize],
    r0_stops: &[usize],
    r1_starts: &[usize],
    r1_stops: &[usize],
) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let starts: Vec<usize> = r0_starts.iter().zip(r1_starts).map(|(&a, &b)| a.max(b)).collect();
    let stops: Vec<usize> = r0_stops.iter().zip(r1_stops).map(|(&a, &b)| a.min(b)).collect();
    let subsizes = starts
        .iter()
        .zip(&stops)
        .map(|(&start, &stop)| stop.saturating_sub(start))
        .collect();

    (starts, stops, subsizes)
}

/// Pairs starts and stops into per-axis ranges.
pub fn assemble_slices(starts: &[usize], stops: &[usize]) -> Vec<Range<usize>> {
    starts.iter().zip(stops).map(|(&start, &stop)| start..stop).collect()
}

/// Number of elements covered by `slices`.
pub fn compute_nd_slice_volume(slices: &[Range<usize>]) -> usize {
    slices.iter().map(|slice| slice.end - slice.start).product()
}

/// Overlap of this worker's subtensor in `partition_a` with every subtensor of
/// `partition_b`, for a global tensor of shape `sizes`.
///
/// Entry `s` holds the slices, relative to this worker's subtensor, of the region
/// shared with member `s` of `partition_b`, or `None` if they do not overlap.
pub fn compute_partition_intersection(
    partition_a: &Partition,
    partition_b: &Partition,
    sizes: &[usize],
) -> Result<Vec<Option<Vec<Range<usize>>>>> {
    let a_index = partition_a.index().ok_or(DistError::NotActive)?;
    let a_dims = partition_a.shape();
    let b_dims = partition_b.shape();
    if a_dims.len() != sizes.len() || b_dims.len() != sizes.len() {
        return Err(DistError::ShapeMismatch {
            expected: sizes.to_vec(),
            got: a_dims.to_vec(),
        });
    }

    let r_starts = compute_starts(a_dims, &a_index, sizes);
    let r_stops = compute_stops(a_dims, &a_index, sizes);

    let slices = (0..partition_b.size())
        .map(|s| {
            let s_index = partition_b.index_of_rank(s);
            let s_starts = compute_starts(b_dims, &s_index, sizes);
            let s_stops = compute_stops(b_dims, &s_index, sizes);

            let (i_starts, _, i_subsizes) =
                compute_intersection(&r_starts, &r_stops, &s_starts, &s_stops);
            if i_subsizes.iter().product::<usize>() == 0 {
                return None;
            }

            let rel_starts: Vec<usize> =
                i_starts.iter().zip(&r_starts).map(|(&i, &r)| i - r).collect();
            let rel_stops: Vec<usize> =
                rel_starts.iter().zip(&i_subsizes).map(|(&s, &n)| s + n).collect();
            Some(assemble_slices(&rel_starts, &rel_stops))
        })
        .collect();

    Ok(slices)
}

/// Slices of the block at `index` when every block has shape `block_shape`.
pub fn block_slices(block_shape: &[usize], index: &[usize]) -> Vec<Range<usize>> {
    block_shape
        .iter()
        .zip(index)
        .map(|(&extent, &c)| c * extent..(c + 1) * extent)
        .collect()
}

/// View of `tensor` restricted to `slices`.
pub fn slice_view<'a, T>(tensor: &'a ArrayD<T>, slices: &[Range<usize>]) -> ArrayViewD<'a, T> {
    tensor.slice_each_axis(|axis| Slice::from(slices[axis.axis.index()].clone()))
}

/// Mutable view of `tensor` restricted to `slices`.
pub fn slice_view_mut<'a, T>(
    tensor: &'a mut ArrayD<T>,
    slices: &[Range<usize>],
) -> ArrayViewMutD<'a, T> {
    tensor.slice_each_axis_mut(|axis| Slice::from(slices[axis.axis.index()].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::World;

    #[test]
    fn test_balanced_decomposition() {
        // 10 over 3 workers: 4, 3, 3
        let subshapes: Vec<_> = (0..3).map(|c| compute_subshape(&[3], &[c], &[10])[0]).collect();
        let starts: Vec<_> = (0..3).map(|c| compute_starts(&[3], &[c], &[10])[0]).collect();
        let stops: Vec<_> = (0..3).map(|c| compute_stops(&[3], &[c], &[10])[0]).collect();

        assert_eq!(subshapes, vec![4, 3, 3]);
        assert_eq!(starts, vec![0, 4, 7]);
        assert_eq!(stops, vec![4, 7, 10]);
    }

    #[test]
    fn test_multi_axis_subshape() {
        assert_eq!(compute_subshape(&[2, 3], &[1, 0], &[5, 7]), vec![2, 3]);
        assert_eq!(compute_starts(&[2, 3], &[1, 2], &[5, 7]), vec![3, 5]);
    }

    #[test]
    fn test_intersection() {
        let (starts, stops, subsizes) = compute_intersection(&[0, 2], &[4, 6], &[3, 7], &[5, 9]);
        assert_eq!(starts, vec![3, 7]);
        assert_eq!(stops, vec![4, 6]);
        assert_eq!(subsizes, vec![1, 0]);
    }

    #[test]
    fn test_slices_and_volume() {
        let slices = assemble_slices(&[1, 0, 2], &[3, 4, 5]);
        assert_eq!(slices, vec![1..3, 0..4, 2..5]);
        assert_eq!(compute_nd_slice_volume(&slices), 24);
        assert_eq!(block_slices(&[2, 3], &[1, 2]), vec![2..4, 6..9]);
    }

    #[test]
    fn test_slice_views() {
        let mut tensor = ArrayD::from_shape_vec(vec![2, 3], (0..6).collect::<Vec<i32>>()).unwrap();
        let view = slice_view(&tensor, &[1..2, 1..3]);
        assert_eq!(view.iter().copied().collect::<Vec<_>>(), vec![4, 5]);

        slice_view_mut(&mut tensor, &[0..1, 0..1]).fill(9);
        assert_eq!(tensor[[0, 0]], 9);
    }

    #[test]
    fn test_partition_intersection() {
        let results = World::new(3)
            .unwrap()
            .launch(|world| {
                // Same three workers seen as a 1x3 and a 3x1 decomposition of a 3x3 tensor.
                let p_a = world.create_cartesian_topology_partition(&[1, 3]).unwrap();
                let p_b = world.create_cartesian_topology_partition(&[3, 1]).unwrap();
                compute_partition_intersection(&p_a, &p_b, &[3, 3]).unwrap()
            })
            .unwrap();

        // Worker 0 owns column 0; it shares one element with each row owner.
        assert_eq!(
            results[0],
            vec![Some(vec![0..1, 0..1]), Some(vec![1..2, 0..1]), Some(vec![2..3, 0..1])]
        );
    }

    #[test]
    fn test_partition_intersection_disjoint() {
        let results = World::new(2)
            .unwrap()
            .launch(|world| {
                let p_a = world.create_cartesian_topology_partition(&[2]).unwrap();
                let p_b = world.create_cartesian_topology_partition(&[2]).unwrap();
                compute_partition_intersection(&p_a, &p_b, &[4]).unwrap()
            })
            .unwrap();

        assert_eq!(results[1], vec![None, Some(vec![0..2])]);
    }
}
