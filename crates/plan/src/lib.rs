//! Execution plan documents and composite plan selection.
//!
//! Plans arrive pre-compiled as JSON from an external compiler; this crate
//! deserializes them ([`model`]) and resolves the concrete sub-plan to run
//! when a plan is composite ([`selector`]).

pub mod model;
pub mod selector;

pub use model::{
    ExecutionNode, ExecutionPlan, SingleExecutionPlan, SqlStatement, StatementKind, TdsColumn,
    TdsType,
};
pub use selector::{select, MapParameterAccessor, ParameterAccessor};
