use thiserror::Error;

use crate::transport::TransportError;

/// Failures detected before any listener starts. These are fatal: the CLI
/// reports them and exits non-zero without ever touching the stream.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("partition {requested} does not exist, topic has partitions {known:?}")]
    UnknownPartition { requested: i32, known: Vec<i32> },

    #[error("topic reports no partitions")]
    NoPartitions,
}
