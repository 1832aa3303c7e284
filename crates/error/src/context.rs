//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis.

use serde::{Deserialize, Serialize};

/// Structured context attached to a [`crate::MeridianError`].
///
/// Each variant carries the fields relevant to that failure class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for MERIDIAN-1001 (VendorNotSupported)
    Vendor {
        requested: String,
        supported: Vec<String>,
    },

    /// Context for pool errors (MERIDIAN-1002..1005)
    Pool {
        pool: String,
        vendor: Option<String>,
        active: Option<usize>,
        max_size: Option<usize>,
    },

    /// Context for MERIDIAN-2002/2003 (composite plan selection)
    PlanSelection {
        parameter: String,
        provided: Option<String>,
        /// Valid keys, sorted, so the message is deterministic.
        valid_keys: Vec<String>,
    },

    /// Context for MERIDIAN-2001 (SqlExecutionFailed)
    Sql {
        statement: String,
        pool: String,
        vendor: String,
    },

    /// Context for MERIDIAN-2004 (GraphFetchFailed)
    GraphFetch {
        node_index: usize,
        store: Option<String>,
    },

    /// Context for MERIDIAN-2005 (SchemaMismatch)
    Schema {
        expected_columns: usize,
        actual_values: usize,
        column: Option<String>,
    },

    /// Context for MERIDIAN-3002 (InvalidDataSource)
    DataSource { vendor: String, reason: String },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}
