//! Plan execution for the Meridian runtime.
//!
//! Takes a deserialized execution plan, resolves the concrete sub-plan,
//! runs its node tree against pooled connections, deduplicates cross-store
//! graph fetches within the execution ([`graph`]), and streams the result
//! as a tabular data set ([`tds`]).

pub mod executor;
pub mod graph;
pub mod tds;

pub use executor::{ExecutionResult, Executor};
pub use graph::{GraphFetchBatch, GraphObject, KeyAccessor, ObjectToken, PrimaryKey};
pub use tds::{Activity, TdsFraming, TdsWriter};
