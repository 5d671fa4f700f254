#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Distributed tensor primitives over Cartesian worker partitions.
//!
//! Workers are ranks of a message-passing [`World`](comm::World). Tensors are
//! distributed over a [`Partition`], optionally arranged in a Cartesian topology,
//! and moved between workers by the linear primitives in [`primitives`], each of
//! which provides an explicit adjoint.

mod config;
mod error;
mod tensor;

pub mod comm;
pub mod partition;
pub mod primitives;
pub mod slicing;

pub use config::*;
pub use error::*;
pub use partition::Partition;
pub use tensor::*;
