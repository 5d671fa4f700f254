mod common;

use common::{adjoint_pair, assert_adjoint, grid, local_input, pattern};
use distdl::comm::World;
use distdl::primitives::{AllGather, Broadcast, Primitive, ReduceScatter, SumReduce};
use distdl::{Partition, Result};
use ndarray::ArrayD;

/// Elementwise scaling, standing in for a local layer between two primitives.
struct Scale(f64);

impl Primitive<f64> for Scale {
    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(input * self.0)
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        Ok(grad_output * self.0)
    }
}

struct Network(Vec<Box<dyn Primitive<f64>>>);

impl Primitive<f64> for Network {
    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.0
            .iter_mut()
            .try_fold(input.clone(), |x, layer| layer.forward(&x))
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.0
            .iter_mut()
            .rev()
            .try_fold(grad_output.clone(), |dy, layer| layer.backward(&dy))
    }
}

fn gather_scale_scatter(p_x: &Partition, weight: f64) -> Network {
    Network(vec![
        Box::new(AllGather::new(p_x, &[1], None).unwrap()),
        Box::new(Scale(weight)),
        Box::new(ReduceScatter::new(p_x, &[1]).unwrap()),
    ])
}

fn broadcast_scale_reduce(p_x: &Partition, p_y: &Partition, weight: f64) -> Network {
    Network(vec![
        Box::new(Broadcast::new(p_x, p_y, false, None).unwrap()),
        Box::new(Scale(weight)),
        Box::new(SumReduce::new(p_y, p_x, false, None).unwrap()),
    ])
}

#[test]
fn gather_then_scatter_round_trips_scaled() {
    let results = World::new(6)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 0, &[2, 3]);
            let mut network = gather_scale_scatter(&p_x, 0.5);

            let x = pattern(&[2, 2], world.world_rank());
            let y = network.forward(&x).unwrap();
            let dx = network.backward(&y).unwrap();
            (x, y, dx)
        })
        .unwrap();

    // Every row member gathers the same tensor, so the scatter sums three copies.
    for (x, y, dx) in results {
        assert_eq!(y, &x * 1.5);
        assert_eq!(dx, &y * 1.5);
    }
}

#[test]
fn gather_then_scatter_is_adjoint() {
    let pairs = World::new(7)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 0, &[2, 3]);
            let mut network = gather_scale_scatter(&p_x, -2.0);
            adjoint_pair(&world, &mut network, &local_input(&p_x, &[4, 3], 9))
        })
        .unwrap();

    assert_adjoint(&pairs);
}

#[test]
fn broadcast_then_sum_reduce_round_trips_scaled() {
    let results = World::new(6)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 0, &[2, 1]);
            let p_y = grid(&world, 0, &[2, 3]);
            let mut network = broadcast_scale_reduce(&p_x, &p_y, 2.0);

            let x = local_input(&p_x, &[3, 3], 11);
            let y = network.forward(&x).unwrap();
            (x, y)
        })
        .unwrap();

    for (rank, (x, y)) in results.iter().enumerate() {
        if rank < 2 {
            assert_eq!(y, &(x * 6.0));
        } else {
            assert_eq!(y.shape(), &[0]);
        }
    }
}

#[test]
fn broadcast_then_sum_reduce_is_adjoint() {
    let pairs = World::new(8)
        .unwrap()
        .launch(|world| {
            let p_x = grid(&world, 6, &[2, 1]);
            let p_y = grid(&world, 0, &[2, 3]);
            let mut network = broadcast_scale_reduce(&p_x, &p_y, 0.25);
            adjoint_pair(&world, &mut network, &local_input(&p_x, &[2, 4], 13))
        })
        .unwrap();

    assert_adjoint(&pairs);
}
