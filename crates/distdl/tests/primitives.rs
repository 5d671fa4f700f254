mod common;

use common::{adjoint_pair, assert_adjoint, grid, local_input};
use distdl::comm::World;
use distdl::primitives::{
    AllGather, AllSumReduce, Broadcast, ReduceScatter, Repartition, SumReduce,
};
use distdl::slicing::compute_subshape;
use rstest::rstest;

#[rstest]
#[case::columns(6, &[2, 3], 1, &[4, 6])]
#[case::rows(3, &[3, 1], 0, &[6, 2])]
#[case::idle_worker(5, &[2, 2], 0, &[4, 3])]
fn reduce_scatter_is_adjoint(
    #[case] workers: usize,
    #[case] shape: &[usize],
    #[case] axis: usize,
    #[case] local: &[usize],
) {
    let pairs = World::new(workers)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 0, shape);
            let mut layer = ReduceScatter::new(&p_x, &[axis]).unwrap();
            adjoint_pair(&world, &mut layer, &local_input(&p_x, local, 1))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[rstest]
#[case::columns(6, &[2, 3], &[1], &[2, 1])]
#[case::both_axes(4, &[2, 2], &[0, 1], &[3, 2])]
#[case::linear(5, &[4], &[0], &[5])]
fn all_gather_is_adjoint(
    #[case] workers: usize,
    #[case] shape: &[usize],
    #[case] axes: &[usize],
    #[case] local: &[usize],
) {
    let pairs = World::new(workers)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 0, shape);
            let mut layer = AllGather::new(&p_x, axes, None).unwrap();
            adjoint_pair(&world, &mut layer, &local_input(&p_x, local, 2))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[rstest]
#[case::rows(&[1])]
#[case::columns(&[0])]
#[case::everything(&[0, 1])]
fn all_sum_reduce_is_adjoint(#[case] axes: &[usize]) {
    let pairs = World::new(7)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 1, &[2, 3]);
            let mut layer = AllSumReduce::new(&p_x, axes, None).unwrap();
            adjoint_pair(&world, &mut layer, &local_input(&p_x, &[3, 2], 3))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[rstest]
#[case::disjoint(8, 0, &[2, 1], 2, &[2, 3])]
#[case::overlapping(6, 0, &[2, 1], 0, &[2, 3])]
#[case::single_root(6, 3, &[1], 0, &[2, 3])]
#[case::same_partition(4, 0, &[2, 2], 0, &[2, 2])]
fn broadcast_is_adjoint(
    #[case] workers: usize,
    #[case] x_first: usize,
    #[case] x_shape: &[usize],
    #[case] y_first: usize,
    #[case] y_shape: &[usize],
) {
    let pairs = World::new(workers)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, x_first, x_shape);
            let p_y = grid(&world, y_first, y_shape);
            let mut layer = Broadcast::new(&p_x, &p_y, false, None).unwrap();
            adjoint_pair(&world, &mut layer, &local_input(&p_x, &[3, 4], 4))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[rstest]
#[case::disjoint(8, 2, &[2, 3], 0, &[2, 1])]
#[case::overlapping(6, 0, &[2, 3], 0, &[2, 1])]
#[case::single_root(6, 0, &[2, 3], 5, &[1])]
fn sum_reduce_is_adjoint(
    #[case] workers: usize,
    #[case] x_first: usize,
    #[case] x_shape: &[usize],
    #[case] y_first: usize,
    #[case] y_shape: &[usize],
) {
    let pairs = World::new(workers)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, x_first, x_shape);
            let p_y = grid(&world, y_first, y_shape);
            let mut layer = SumReduce::new(&p_x, &p_y, false, None).unwrap();
            adjoint_pair(&world, &mut layer, &local_input(&p_x, &[2, 5], 5))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[rstest]
#[case::gather(4, 0, &[2, 2], 3, &[1, 1], &[7, 5])]
#[case::scatter(5, 4, &[1, 1], 0, &[2, 2], &[7, 5])]
#[case::transpose(6, 0, &[2, 3], 0, &[3, 2], &[7, 8])]
#[case::disjoint(7, 0, &[3, 1], 3, &[2, 2], &[5, 6])]
fn repartition_is_adjoint(
    #[case] workers: usize,
    #[case] x_first: usize,
    #[case] x_shape: &[usize],
    #[case] y_first: usize,
    #[case] y_shape: &[usize],
    #[case] global: &[usize],
) {
    let pairs = World::new(workers)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, x_first, x_shape);
            let p_y = grid(&world, y_first, y_shape);
            let mut layer = Repartition::new(&p_x, &p_y, false).unwrap();
            let local = match p_x.index() {
                Some(index) => compute_subshape(x_shape, &index, global),
                None => Vec::new(),
            };
            adjoint_pair(&world, &mut layer, &local_input(&p_x, &local, 6))
        })
        .unwrap();

    assert_adjoint(&pairs);
}
