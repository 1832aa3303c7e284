//! Live connection and opener capabilities.
//!
//! Wire protocols are out of scope for the runtime: a vendor's
//! [`crate::vendor::DatabaseManager`] supplies a [`ConnectionOpener`] that
//! dials the built URL with a resolved credential, and the pool manages the
//! returned [`LiveConnection`] from then on.

use async_trait::async_trait;
use meridian_common::value::Value;
use meridian_error::Result;

use crate::credential::Credential;

/// A materialized result set from a single statement.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// An open connection to a relational backend.
///
/// Implementations are supplied by the embedder (real drivers) or by tests
/// (in-memory fakes). `execute` blocks the calling task for the statement's
/// duration; there is no statement-level cancellation below this seam.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<RowSet>;

    async fn close(&self) -> Result<()>;
}

/// Opens connections for a vendor. One opener per vendor capability,
/// stateless and process-wide.
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    async fn open(&self, url: &str, credential: &Credential) -> Result<Box<dyn LiveConnection>>;
}
