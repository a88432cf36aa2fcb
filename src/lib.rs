//! treeclust: cluster analysis by sampling decision-tree partitionings of
//! the parameter space with the Metropolis-Hastings algorithm.
//!
//! A run explores axis-aligned partition trees over a tabular dataset and
//! hands every accepted tree, together with its log-likelihood, to a
//! consumer callback. Each tree induces a set of segments (leaf cells)
//! carrying an observation count and a volume; see [`segments`].
//!
//! The run seed can be fixed through the `TREECLUST_SEED` environment
//! variable (a decimal integer), or passed directly via
//! [`cluster_with_rng`].

mod clustering;
mod error;
mod likelihood;
mod param;
mod random;
mod segment;
mod tree;

pub use clustering::{cluster, cluster_with_rng, Options, RunStats};
pub use error::{Error, Result};
pub use likelihood::log_likelihood;
pub use param::{Column, Dataset, ParamDef, ParamType, Value, ValueKind};
pub use segment::{segments, Segment};
pub use tree::{Node, NodeId, Partition, Range, Tree};
