use thiserror::Error;

/// Result type alias using [`DistError`].
pub type Result<T> = core::result::Result<T, DistError>;

/// Errors raised by partitions, communication and the distributed primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistError {
    /// The world could not be created with the requested size.
    #[error("Invalid world: {0}")]
    InvalidWorld(String),

    /// More workers were requested than the host can run concurrently.
    #[error("Requested {requested} workers but only {available} are available")]
    Oversubscribed {
        /// Number of workers requested.
        requested: usize,
        /// Hardware parallelism reported by the host.
        available: usize,
    },

    /// A worker thread panicked.
    #[error("Worker {rank} panicked")]
    WorkerPanicked {
        /// World rank of the worker.
        rank: usize,
    },

    /// A peer hung up before a message could be exchanged.
    #[error("Rank {peer} disconnected")]
    Disconnected {
        /// World rank of the peer.
        peer: usize,
    },

    /// A received payload did not carry the expected element type.
    #[error("Payload type mismatch: expected {expected}")]
    TypeMismatch {
        /// Name of the expected element type.
        expected: &'static str,
    },

    /// A communication call was made on a partition this worker is not part of.
    #[error("Worker is not active in the partition")]
    NotActive,

    /// Invalid member list for a partition.
    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    /// Invalid Cartesian topology or axis selection.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Buffer lengths disagree between participants of a collective.
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch {
        /// Expected number of elements.
        expected: usize,
        /// Actual number of elements.
        actual: usize,
    },

    /// An extent cannot be split evenly across the partition.
    #[error("Extent {extent} along axis {axis} is not divisible by {parts} workers")]
    Indivisible {
        /// Tensor axis being split.
        axis: usize,
        /// Extent of the tensor along the axis.
        extent: usize,
        /// Number of workers along the axis.
        parts: usize,
    },

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// The requested feature is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// `backward` was invoked before `forward`.
    #[error("Backward called before forward")]
    BackwardBeforeForward,

    /// Launch configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),
}
