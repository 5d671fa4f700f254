//! In-process message passing.
//!
//! A [`World`] runs one worker thread per rank. Every worker owns an endpoint with
//! a buffered channel to every other rank, so sends never block and messages between
//! a pair of ranks are delivered in order. Messages are matched on the communicator
//! context of the sending partition and a tag, following MPI matching rules.

mod endpoint;
mod reduce;
mod world;

pub(crate) use endpoint::*;
pub use reduce::*;
pub use world::*;
