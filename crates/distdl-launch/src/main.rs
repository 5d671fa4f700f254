//! Runs the distdl demo programs on an in-process world of workers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use distdl::comm::World;
use distdl::primitives::{
    AllGather, AllSumReduce, Broadcast, Primitive, ReduceScatter, Repartition, SumReduce,
};
use distdl::slicing::compute_subshape;
use distdl::{DistError, LaunchConfig, Partition, Result, zero_volume_tensor};
use ndarray::{ArrayD, IxDyn};
use tracing_subscriber::EnvFilter;

/// Workers every demo runs on.
const DEMO_WORKERS: usize = 6;

/// Launch a distdl demo on a world of worker threads.
#[derive(Parser, Debug)]
#[command(name = "distdl-launch", version, about, long_about = None)]
struct Cli {
    /// Number of workers, overriding the config file and environment.
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// JSON launch configuration.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Allow more workers than the host has cores.
    #[arg(long)]
    oversubscribe: bool,

    /// Log filter, e.g. `debug` or `distdl=trace`.
    #[arg(long, env = "DISTDL_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    demo: Demo,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Demo {
    /// Reduce-scatter a 2x6 tensor along the columns of a 2x3 partition.
    ReduceScatter,
    /// All-gather 2x1 blocks along the columns of a 2x3 partition.
    AllGather,
    /// All-sum-reduce along the rows of a 2x3 partition.
    AllSumReduce,
    /// Broadcast from a 2x1 partition to a 2x3 partition.
    Broadcast,
    /// Sum-reduce from a 2x3 partition onto a 2x1 partition.
    SumReduce,
    /// Repartition a 7x5 tensor from a 2x2 partition onto the last worker.
    Repartition,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("distdl-launch: {err}");
            return ExitCode::FAILURE;
        }
    };

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter.unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    match run(cli.demo, &config) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{:?} failed: {err}", cli.demo);
            ExitCode::FAILURE
        }
    }
}

/// Config file, then `DISTDL_*` environment, then command-line flags.
fn resolve_config(cli: &Cli) -> Result<LaunchConfig> {
    let base = match &cli.config {
        Some(path) => LaunchConfig::load(path)?,
        None => LaunchConfig {
            num_workers: DEMO_WORKERS,
            ..LaunchConfig::default()
        },
    };

    let mut config = base.with_env_overrides()?;
    if let Some(workers) = cli.workers {
        config.num_workers = workers;
    }
    config.oversubscribe |= cli.oversubscribe;
    Ok(config)
}

fn run(demo: Demo, config: &LaunchConfig) -> Result<Vec<String>> {
    let world = World::from_config(config)?;
    if world.size() < DEMO_WORKERS {
        return Err(DistError::InvalidWorld(format!(
            "The demos need at least {DEMO_WORKERS} workers, got {}",
            world.size()
        )));
    }
    log::info!("Running {demo:?} on {} workers", world.size());

    world
        .launch(|world| match demo {
            Demo::ReduceScatter => reduce_scatter(&world),
            Demo::AllGather => all_gather(&world),
            Demo::AllSumReduce => all_sum_reduce(&world),
            Demo::Broadcast => broadcast(&world),
            Demo::SumReduce => sum_reduce(&world),
            Demo::Repartition => repartition(&world),
        })?
        .into_iter()
        .collect()
}

/// The first `shape.iter().product()` workers on a Cartesian grid.
fn grid(world: &Partition, shape: &[usize]) -> Result<Partition> {
    let ranks: Vec<usize> = (0..shape.iter().product()).collect();
    world
        .create_partition_inclusive(&ranks)?
        .create_cartesian_topology_partition(shape)
}

fn filled(partition: &Partition, shape: &[usize]) -> ArrayD<f64> {
    match partition.rank() {
        Some(rank) => ArrayD::from_elem(IxDyn(shape), rank as f64 + 1.0),
        None => zero_volume_tensor(None),
    }
}

fn report(world: &Partition, x: &ArrayD<f64>, y: &ArrayD<f64>, dx: &ArrayD<f64>) -> String {
    format!(
        "rank {}: x {:?} {:?} -> y {:?} {:?} | dx {:?}",
        world.world_rank(),
        x.shape(),
        x.iter().next(),
        y.shape(),
        y.iter().collect::<Vec<_>>(),
        dx.iter().next()
    )
}

fn exercise(world: &Partition, layer: &mut impl Primitive<f64>, x: ArrayD<f64>) -> Result<String> {
    let y = layer.forward(&x)?;
    let dx = layer.backward(&y)?;
    Ok(report(world, &x, &y, &dx))
}

fn reduce_scatter(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 3])?;
    let mut layer = ReduceScatter::new(&p_x, &[1])?;
    exercise(world, &mut layer, filled(&p_x, &[2, 6]))
}

fn all_gather(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 3])?;
    let mut layer = AllGather::new(&p_x, &[1], None)?;
    exercise(world, &mut layer, filled(&p_x, &[2, 1]))
}

fn all_sum_reduce(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 3])?;
    let mut layer = AllSumReduce::new(&p_x, &[1], None)?;
    exercise(world, &mut layer, filled(&p_x, &[2, 2]))
}

fn broadcast(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 1])?;
    let p_y = grid(world, &[2, 3])?;
    let mut layer = Broadcast::new(&p_x, &p_y, false, None)?;
    exercise(world, &mut layer, filled(&p_x, &[3, 2]))
}

fn sum_reduce(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 3])?;
    let p_y = grid(world, &[2, 1])?;
    let mut layer = SumReduce::new(&p_x, &p_y, false, None)?;
    exercise(world, &mut layer, filled(&p_x, &[3, 2]))
}

fn repartition(world: &Partition) -> Result<String> {
    let p_x = grid(world, &[2, 2])?;
    let p_y = world
        .create_partition_inclusive(&[world.size() - 1])?
        .create_cartesian_topology_partition(&[1, 1])?;
    let mut layer = Repartition::new(&p_x, &p_y, false)?;
    let local = p_x
        .index()
        .map(|index| compute_subshape(p_x.shape(), &index, &[7, 5]))
        .unwrap_or_default();
    exercise(world, &mut layer, filled(&p_x, &local))
}
