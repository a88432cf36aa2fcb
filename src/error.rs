//! Error kinds surfaced by the sampler and tree operations.

use thiserror::Error;

/// Errors that are fatal to a clustering run.
///
/// A proposal kernel that finds no legal move is a *skip*, not an error;
/// skips never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input: action probabilities that do not sum to 1,
    /// a parameter definition violating fragment-size quantisation, mismatched
    /// column lengths, or a node id from a different tree.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The tree arena is exhausted.
    #[error("tree arena exhausted")]
    OutOfMemory,

    /// A proposal kernel reached a nominal-parameter code path.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
