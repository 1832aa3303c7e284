//! Request/response DTOs for the admin and execution API surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /server/v1/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// The pre-compiled execution plan document.
    pub plan: serde_json::Value,
    /// Raw request parameters, keyed by parameter name.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Serialization framing: "pure" (default) or "default".
    #[serde(default)]
    pub format: Option<String>,
}

/// Response of `DELETE /server/v1/executorInfo/relational/pools/{poolName}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionResponse {
    pub pool: String,
    pub evicted_idle: usize,
    pub remaining_active: usize,
}

/// Error body returned by the API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
