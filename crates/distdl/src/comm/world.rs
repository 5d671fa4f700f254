use std::rc::Rc;
use std::thread;

use crate::comm::connect;
use crate::{DistError, LaunchConfig, Partition, Result};

/// A group of worker threads that communicate by message passing.
///
/// Each worker is identified by its world rank. [`World::launch`] runs the same
/// program on every worker, handing it the world [`Partition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct World {
    size: usize,
}

impl World {
    /// Creates a world with `size` workers.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DistError::InvalidWorld(
                "A world needs at least one worker".to_string(),
            ));
        }
        Ok(Self { size })
    }

    /// Creates a world sized by a validated launch configuration.
    pub fn from_config(config: &LaunchConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.num_workers)
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `program` on every worker and returns the results in rank order.
    ///
    /// A worker that panics is reported as [`DistError::WorkerPanicked`]; peers
    /// waiting on it observe [`DistError::Disconnected`] instead of hanging.
    pub fn launch<F, R>(&self, program: F) -> Result<Vec<R>>
    where
        F: Fn(Partition) -> R + Sync,
        R: Send,
    {
        log::info!("Launching {} workers", self.size);

        let endpoints = connect(self.size);
        let program = &program;
        let size = self.size;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(size);
            for endpoint in endpoints {
                let rank = endpoint.rank();
                let handle = thread::Builder::new()
                    .name(format!("distdl-worker-{rank}"))
                    .spawn_scoped(scope, move || {
                        log::debug!("Worker {rank} started");
                        program(Partition::world(Rc::new(endpoint)))
                    })
                    .map_err(|err| {
                        DistError::InvalidWorld(format!("Failed to spawn worker {rank}: {err}"))
                    })?;
                handles.push(handle);
            }

            // Join every worker before reporting, so no panic escapes the scope.
            let joined: Vec<Result<R>> = handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().map_err(|_| {
                        log::error!("Worker {rank} panicked");
                        DistError::WorkerPanicked { rank }
                    })
                })
                .collect();

            joined.into_iter().collect()
        })
    }
}
