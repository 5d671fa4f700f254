#![allow(dead_code)]

use distdl::primitives::Primitive;
use distdl::{Partition, global_inner_product, zero_volume_tensor};
use ndarray::{ArrayD, IxDyn};

/// Deterministic values in `[-1, 1)` that differ per seed and element.
pub fn pattern(shape: &[usize], seed: usize) -> ArrayD<f64> {
    let volume = shape.iter().product::<usize>();
    let data = (0..volume)
        .map(|i| ((i * 7919 + seed * 104_729 + 17) % 2003) as f64 / 1001.5 - 1.0)
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
}

/// A pattern tensor on members of `partition`, a zero-volume tensor elsewhere.
pub fn local_input(partition: &Partition, shape: &[usize], seed: usize) -> ArrayD<f64> {
    if partition.active() {
        pattern(shape, seed + partition.world_rank())
    } else {
        zero_volume_tensor(None)
    }
}

/// Partition of `count` consecutive world ranks starting at `first`, on `shape`.
pub fn grid(world: &Partition, first: usize, shape: &[usize]) -> Partition {
    let count = shape.iter().product::<usize>();
    let ranks: Vec<usize> = (first..first + count).collect();
    world
        .create_partition_inclusive(&ranks)
        .unwrap()
        .create_cartesian_topology_partition(shape)
        .unwrap()
}

/// Returns `(<F x, dy>, <x, F* dy>)` summed over the world.
pub fn adjoint_pair(
    world: &Partition,
    layer: &mut impl Primitive<f64>,
    x: &ArrayD<f64>,
) -> (f64, f64) {
    let y = layer.forward(x).unwrap();
    let dy = pattern(y.shape(), 31 * (world.world_rank() + 1));
    let dx = layer.backward(&dy).unwrap();
    assert_eq!(dx.shape(), x.shape());

    let lhs = global_inner_product(world, &y, &dy).unwrap();
    let rhs = global_inner_product(world, x, &dx).unwrap();
    (lhs, rhs)
}

pub fn assert_adjoint(pairs: &[(f64, f64)]) {
    for &(lhs, rhs) in pairs {
        let scale = lhs.abs().max(rhs.abs()).max(1.0);
        assert!(
            (lhs - rhs).abs() <= 1e-10 * scale,
            "<F x, y> = {lhs} but <x, F* y> = {rhs}"
        );
    }
}
