use core::any::{Any, type_name};
use core::cell::RefCell;
use std::collections::VecDeque;

use async_channel::{Receiver, Sender};
use hashbrown::HashMap;

use crate::{DistError, Result};

type Payload = Box<dyn Any + Send>;

/// Identifies a communicator.
///
/// The world communicator has the empty path; every partition created from a parent
/// appends the parent's creation counter, so all members derive the same id.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub(crate) struct ContextId(Vec<u32>);

impl ContextId {
    pub(crate) fn world() -> Self {
        Self::default()
    }

    pub(crate) fn child(&self, id: u32) -> Self {
        let mut path = self.0.clone();
        path.push(id);
        Self(path)
    }
}

/// Message tag within a context.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub(crate) enum Tag {
    /// Internal traffic of the n-th collective call on a partition.
    Collective(u64),
    /// User point-to-point traffic.
    User(u32),
}

pub(crate) struct Envelope {
    context: ContextId,
    tag: Tag,
    payload: Payload,
}

/// A worker's connection to every rank of the world, itself included.
pub(crate) struct Endpoint {
    rank: usize,
    /// Indexed by destination world rank.
    senders: Vec<Sender<Envelope>>,
    /// Indexed by source world rank.
    receivers: Vec<Receiver<Envelope>>,
    /// Messages that arrived ahead of the receive they match.
    pending: RefCell<HashMap<(usize, ContextId, Tag), VecDeque<Payload>>>,
}

impl Endpoint {
    pub(crate) fn new(
        rank: usize,
        senders: Vec<Sender<Envelope>>,
        receivers: Vec<Receiver<Envelope>>,
    ) -> Self {
        Self {
            rank,
            senders,
            receivers,
            pending: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn world_size(&self) -> usize {
        self.senders.len()
    }

    pub(crate) fn send<T: Send + 'static>(
        &self,
        dest: usize,
        context: &ContextId,
        tag: Tag,
        data: Vec<T>,
    ) -> Result<()> {
        let sender = self.senders.get(dest).ok_or(DistError::Disconnected { peer: dest })?;
        log::trace!("rank {} -> {dest}: {} elements, {tag:?}", self.rank, data.len());

        sender
            .send_blocking(Envelope {
                context: context.clone(),
                tag,
                payload: Box::new(data),
            })
            .map_err(|_| DistError::Disconnected { peer: dest })
    }

    pub(crate) fn recv<T: Send + 'static>(
        &self,
        source: usize,
        context: &ContextId,
        tag: Tag,
    ) -> Result<Vec<T>> {
        let payload = self.recv_payload(source, context, tag)?;
        log::trace!("rank {} <- {source}: {tag:?}", self.rank);

        payload
            .downcast::<Vec<T>>()
            .map(|data| *data)
            .map_err(|_| DistError::TypeMismatch {
                expected: type_name::<T>(),
            })
    }

    /// Pops the oldest stashed message for `key`, dropping the queue once it is empty.
    fn take_pending(&self, key: &(usize, ContextId, Tag)) -> Option<Payload> {
        let mut pending = self.pending.borrow_mut();
        let queue = pending.get_mut(key)?;
        let payload = queue.pop_front();
        if queue.is_empty() {
            pending.remove(key);
        }
        payload
    }

    fn recv_payload(&self, source: usize, context: &ContextId, tag: Tag) -> Result<Payload> {
        let key = (source, context.clone(), tag);
        if let Some(payload) = self.take_pending(&key) {
            return Ok(payload);
        }

        let receiver = self
            .receivers
            .get(source)
            .ok_or(DistError::Disconnected { peer: source })?;

        loop {
            let envelope = receiver
                .recv_blocking()
                .map_err(|_| DistError::Disconnected { peer: source })?;

            if envelope.context == key.1 && envelope.tag == tag {
                return Ok(envelope.payload);
            }

            self.pending
                .borrow_mut()
                .entry((source, envelope.context, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }
}

/// Creates the fully connected endpoints of a world with `size` ranks.
pub(crate) fn connect(size: usize) -> Vec<Endpoint> {
    let mut senders: Vec<Vec<Sender<Envelope>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();
    let mut receivers: Vec<Vec<Receiver<Envelope>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();

    for source in 0..size {
        for dest in 0..size {
            let (tx, rx) = async_channel::unbounded();
            senders[source].push(tx);
            receivers[dest].push(rx);
        }
    }

    senders
        .into_iter()
        .zip(receivers)
        .enumerate()
        .map(|(rank, (tx, rx))| Endpoint::new(rank, tx, rx))
        .collect()
}
