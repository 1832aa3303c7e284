use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following the MERIDIAN-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connection / pool errors
/// - **2000-2999**: Execution and plan-selection errors
/// - **3000-3999**: Configuration errors
/// - **5000-5999**: Internal/System errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connection Errors (1000-1999) ===
    /// MERIDIAN-1001: Database vendor not registered
    VendorNotSupported = 1001,
    /// MERIDIAN-1002: Connection pool exhausted (borrow timed out)
    PoolExhausted = 1002,
    /// MERIDIAN-1003: Opening a connection failed
    ConnectionFailed = 1003,
    /// MERIDIAN-1004: No pool registered under that name
    PoolNotFound = 1004,
    /// MERIDIAN-1005: Pool has been removed and closed
    PoolClosed = 1005,

    // === Execution Errors (2000-2999) ===
    /// MERIDIAN-2001: SQL statement failed
    SqlExecutionFailed = 2001,
    /// MERIDIAN-2002: Composite plan key parameter missing
    PlanKeyMissing = 2002,
    /// MERIDIAN-2003: Composite plan key not in the plan mapping
    PlanKeyUnknown = 2003,
    /// MERIDIAN-2004: Cross-store graph fetch failed
    GraphFetchFailed = 2004,
    /// MERIDIAN-2005: Row does not match the declared result schema
    SchemaMismatch = 2005,

    // === Configuration Errors (3000-3999) ===
    /// MERIDIAN-3001: Malformed execution plan document
    InvalidPlanDocument = 3001,
    /// MERIDIAN-3002: Datasource specification not valid for the vendor
    InvalidDataSource = 3002,
    /// MERIDIAN-3003: Credential resolution failed
    CredentialResolution = 3003,

    // === Internal Errors (5000-5999) ===
    /// MERIDIAN-5001: Unexpected internal state
    Internal = 5001,
    /// MERIDIAN-5002: Serialization/deserialization failed
    SerializationFailed = 5002,

    /// MERIDIAN-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "MERIDIAN-2003")
    pub fn as_str(&self) -> String {
        format!("MERIDIAN-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Execution,
            3000..=3999 => ErrorCategory::Config,
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may usefully retry the failed operation.
    ///
    /// Configuration and selection errors are never retryable; pool
    /// exhaustion is the one class a caller is expected to back off and
    /// retry at a higher level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::PoolExhausted | ErrorCode::ConnectionFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("MERIDIAN-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::VendorNotSupported),
            1002 => Ok(Self::PoolExhausted),
            1003 => Ok(Self::ConnectionFailed),
            1004 => Ok(Self::PoolNotFound),
            1005 => Ok(Self::PoolClosed),
            2001 => Ok(Self::SqlExecutionFailed),
            2002 => Ok(Self::PlanKeyMissing),
            2003 => Ok(Self::PlanKeyUnknown),
            2004 => Ok(Self::GraphFetchFailed),
            2005 => Ok(Self::SchemaMismatch),
            3001 => Ok(Self::InvalidPlanDocument),
            3002 => Ok(Self::InvalidDataSource),
            3003 => Ok(Self::CredentialResolution),
            5001 => Ok(Self::Internal),
            5002 => Ok(Self::SerializationFailed),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category, used for API status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connection,
    Execution,
    Config,
    Internal,
}
