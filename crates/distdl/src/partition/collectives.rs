use crate::comm::{ReduceOp, Tag};
use crate::{DistError, Element, Partition, Result};

/// Communication within a partition.
///
/// Every call is only valid on members; inactive workers get [`DistError::NotActive`].
/// Collectives must be invoked by all members in the same order. Ranks and roots are
/// partition ranks.
impl Partition {
    /// Partition rank of this worker and the tag of the next collective.
    fn begin_collective(&self) -> Result<(usize, Tag)> {
        let rank = self.rank().ok_or(DistError::NotActive)?;
        let sequence = self.inner.sequence.get();
        self.inner.sequence.set(sequence + 1);
        Ok((rank, Tag::Collective(sequence)))
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size() {
            return Err(DistError::InvalidPartition(format!(
                "Root {} exceeds partition size {}",
                root,
                self.size()
            )));
        }
        Ok(())
    }

    fn send_to<T: Send + 'static>(&self, dest: usize, tag: Tag, data: Vec<T>) -> Result<()> {
        self.inner
            .endpoint
            .send(self.inner.members[dest], &self.inner.context, tag, data)
    }

    fn recv_from<T: Send + 'static>(&self, source: usize, tag: Tag) -> Result<Vec<T>> {
        self.inner
            .endpoint
            .recv(self.inner.members[source], &self.inner.context, tag)
    }

    fn recv_sized<T: Send + 'static>(
        &self,
        source: usize,
        tag: Tag,
        expected: usize,
    ) -> Result<Vec<T>> {
        let data = self.recv_from::<T>(source, tag)?;
        if data.len() != expected {
            return Err(DistError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Sends `data` to member `dest`.
    pub fn send<T: Send + 'static>(&self, data: Vec<T>, dest: usize, tag: u32) -> Result<()> {
        self.rank().ok_or(DistError::NotActive)?;
        self.check_root(dest)?;
        self.send_to(dest, Tag::User(tag), data)
    }

    /// Receives the next message with `tag` from member `source`.
    pub fn recv<T: Send + 'static>(&self, source: usize, tag: u32) -> Result<Vec<T>> {
        self.rank().ok_or(DistError::NotActive)?;
        self.check_root(source)?;
        self.recv_from(source, Tag::User(tag))
    }

    /// Blocks until every member has reached the barrier.
    pub fn barrier(&self) -> Result<()> {
        let (rank, tag) = self.begin_collective()?;

        if rank == 0 {
            for source in 1..self.size() {
                self.recv_from::<u8>(source, tag)?;
            }
            for dest in 1..self.size() {
                self.send_to(dest, tag, Vec::<u8>::new())?;
            }
        } else {
            self.send_to(0, tag, Vec::<u8>::new())?;
            self.recv_from::<u8>(0, tag)?;
        }
        Ok(())
    }

    /// Distributes the root's `data` to every member.
    ///
    /// Non-root members may pass an empty vector; every member returns the root's data.
    pub fn broadcast<T: Clone + Send + 'static>(
        &self,
        data: Vec<T>,
        root: usize,
    ) -> Result<Vec<T>> {
        self.check_root(root)?;
        let (rank, tag) = self.begin_collective()?;

        if rank != root {
            return self.recv_from(root, tag);
        }

        for dest in (0..self.size()).filter(|&dest| dest != root) {
            self.send_to(dest, tag, data.clone())?;
        }
        Ok(data)
    }

    /// Reduces every member's `data` onto `root`.
    ///
    /// The root returns the reduction, folded in partition rank order; other members
    /// return `None`.
    pub fn reduce<T: Element>(
        &self,
        data: &[T],
        root: usize,
        op: ReduceOp,
    ) -> Result<Option<Vec<T>>> {
        self.check_root(root)?;
        let (rank, tag) = self.begin_collective()?;

        if rank != root {
            self.send_to(root, tag, data.to_vec())?;
            return Ok(None);
        }

        let mut acc: Option<Vec<T>> = None;
        for source in 0..self.size() {
            let contribution = if source == root {
                data.to_vec()
            } else {
                self.recv_sized(source, tag, data.len())?
            };
            match acc.as_mut() {
                Some(acc) => op.apply(acc, &contribution),
                None => acc = Some(contribution),
            }
        }

        log::debug!("reduce onto {root} over {} members", self.size());
        Ok(acc)
    }

    /// Reduces every member's `data` and returns the result to all members.
    pub fn all_reduce<T: Element>(&self, data: &[T], op: ReduceOp) -> Result<Vec<T>> {
        let reduced = self.reduce(data, 0, op)?;
        self.broadcast(reduced.unwrap_or_default(), 0)
    }

    /// Concatenates every member's `data` in partition rank order.
    ///
    /// All contributions must have the same length.
    pub fn all_gather<T: Clone + Send + 'static>(&self, data: &[T]) -> Result<Vec<T>> {
        let (rank, tag) = self.begin_collective()?;

        for dest in (0..self.size()).filter(|&dest| dest != rank) {
            self.send_to(dest, tag, data.to_vec())?;
        }

        let mut gathered = Vec::with_capacity(data.len() * self.size());
        for source in 0..self.size() {
            if source == rank {
                gathered.extend_from_slice(data);
            } else {
                gathered.extend(self.recv_sized::<T>(source, tag, data.len())?);
            }
        }

        log::debug!("all-gather of {} elements over {} members", data.len(), self.size());
        Ok(gathered)
    }

    /// Reduces every member's `data` and leaves block `r` of the result on member `r`.
    ///
    /// The length of `data` must be divisible by the partition size.
    pub fn reduce_scatter<T: Element>(&self, data: &[T], op: ReduceOp) -> Result<Vec<T>> {
        let size = self.size();
        if size == 0 || data.len() % size != 0 {
            return Err(DistError::Indivisible {
                axis: 0,
                extent: data.len(),
                parts: size,
            });
        }
        let (rank, tag) = self.begin_collective()?;
        let block = data.len() / size;

        for dest in (0..size).filter(|&dest| dest != rank) {
            self.send_to(dest, tag, data[dest * block..(dest + 1) * block].to_vec())?;
        }

        let mut acc: Option<Vec<T>> = None;
        for source in 0..size {
            let contribution = if source == rank {
                data[rank * block..(rank + 1) * block].to_vec()
            } else {
                self.recv_sized(source, tag, block)?
            };
            match acc.as_mut() {
                Some(acc) => op.apply(acc, &contribution),
                None => acc = Some(contribution),
            }
        }

        log::debug!("reduce-scatter of {} elements over {size} members", data.len());
        Ok(acc.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use crate::DistError;
    use crate::comm::{ReduceOp, World};

    #[test]
    fn test_barrier_and_broadcast() {
        let results = World::new(4)
            .unwrap()
            .launch(|world| {
                world.barrier().unwrap();
                let data = if world.rank() == Some(2) { vec![7, 8, 9] } else { Vec::new() };
                world.broadcast(data, 2).unwrap()
            })
            .unwrap();

        assert_eq!(results, vec![vec![7, 8, 9]; 4]);
    }

    #[test]
    fn test_reduce_to_root() {
        let results = World::new(3)
            .unwrap()
            .launch(|world| {
                let rank = world.rank().unwrap() as i64;
                world.reduce(&[rank, 10 * rank], 1, ReduceOp::Sum).unwrap()
            })
            .unwrap();

        assert_eq!(results, vec![None, Some(vec![3, 30]), None]);
    }

    #[test]
    fn test_all_reduce_max() {
        let results = World::new(3)
            .unwrap()
            .launch(|world| {
                let rank = world.rank().unwrap() as f32;
                world.all_reduce(&[rank, -rank], ReduceOp::Max).unwrap()
            })
            .unwrap();

        assert_eq!(results, vec![vec![2.0, 0.0]; 3]);
    }

    #[test]
    fn test_all_gather_concatenates_in_rank_order() {
        let results = World::new(3)
            .unwrap()
            .launch(|world| {
                let rank = world.rank().unwrap() as i32;
                world.all_gather(&[rank, rank]).unwrap()
            })
            .unwrap();

        assert_eq!(results, vec![vec![0, 0, 1, 1, 2, 2]; 3]);
    }

    #[test]
    fn test_all_gather_size_mismatch() {
        let results = World::new(2)
            .unwrap()
            .launch(|world| {
                let data = vec![1.0f64; world.rank().unwrap() + 1];
                world.all_gather(&data)
            })
            .unwrap();

        assert_eq!(
            results[0],
            Err(DistError::BufferSizeMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_reduce_scatter_sum() {
        let results = World::new(2)
            .unwrap()
            .launch(|world| {
                let rank = world.rank().unwrap() as i32;
                world
                    .reduce_scatter(&[rank, rank, 10 + rank, 10 + rank], ReduceOp::Sum)
                    .unwrap()
            })
            .unwrap();

        assert_eq!(results, vec![vec![1, 1], vec![21, 21]]);
    }

    #[test]
    fn test_reduce_scatter_indivisible() {
        let results = World::new(2)
            .unwrap()
            .launch(|world| world.reduce_scatter(&[1.0f32, 2.0, 3.0], ReduceOp::Sum))
            .unwrap();

        assert!(matches!(results[0], Err(DistError::Indivisible { .. })));
    }

    #[test]
    fn test_inactive_worker_cannot_communicate() {
        let results = World::new(2)
            .unwrap()
            .launch(|world| {
                let p = world.create_partition_inclusive(&[0]).unwrap();
                if p.active() { Ok(()) } else { p.barrier() }
            })
            .unwrap();

        assert_eq!(results, vec![Ok(()), Err(DistError::NotActive)]);
    }

    #[test]
    fn test_point_to_point_on_subpartition() {
        let results = World::new(3)
            .unwrap()
            .launch(|world| {
                let p = world.create_partition_inclusive(&[2, 0]).unwrap();
                match p.rank() {
                    Some(0) => {
                        p.send(vec![42u64], 1, 5).unwrap();
                        None
                    }
                    Some(1) => Some(p.recv::<u64>(0, 5).unwrap()),
                    _ => None,
                }
            })
            .unwrap();

        // Partition rank 1 is world rank 0.
        assert_eq!(results, vec![Some(vec![42]), None, None]);
    }
}
