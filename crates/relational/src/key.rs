//! Connection identity.
//!
//! A [`ConnectionKey`] canonically identifies a logical connection target:
//! the vendor-specific datasource coordinates plus the strategy by which
//! credentials are obtained. Two logically-identical connection requests
//! must produce equal keys, because the key is what the pool registry
//! deduplicates on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor-specific connection target, independent of credentials.
///
/// A closed set of variants; each is value-equal and never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "camelCase")]
pub enum DataSourceSpecificationKey {
    /// Classic host/port/database target (Postgres, MySQL, ...).
    #[serde(rename_all = "camelCase")]
    StaticWithHost {
        host: String,
        port: u16,
        database: String,
    },
    /// Cloud project/dataset target.
    #[serde(rename_all = "camelCase")]
    BigQuery { project: String, dataset: String },
    /// Snowflake account/warehouse target.
    #[serde(rename_all = "camelCase")]
    Snowflake {
        account: String,
        warehouse: String,
        database: String,
        region: String,
    },
    /// Databricks SQL endpoint.
    #[serde(rename_all = "camelCase")]
    Databricks { hostname: String, http_path: String },
    /// Local file database (SQLite and friends).
    #[serde(rename_all = "camelCase")]
    Embedded { path: String },
}

impl DataSourceSpecificationKey {
    fn short_id(&self) -> String {
        match self {
            DataSourceSpecificationKey::StaticWithHost {
                host,
                port,
                database,
            } => format!("host_{}_{}_{}", host, port, database),
            DataSourceSpecificationKey::BigQuery { project, dataset } => {
                format!("bq_{}_{}", project, dataset)
            }
            DataSourceSpecificationKey::Snowflake {
                account,
                warehouse,
                database,
                region,
            } => format!("sf_{}_{}_{}_{}", account, region, warehouse, database),
            DataSourceSpecificationKey::Databricks {
                hostname,
                http_path,
            } => format!("dbx_{}_{}", hostname, http_path),
            DataSourceSpecificationKey::Embedded { path } => format!("file_{}", path),
        }
    }
}

/// How credentials for a connection are obtained — never the credentials
/// themselves. Vault references identify secrets held by the (out of
/// scope) authentication subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "camelCase")]
pub enum AuthenticationStrategyKey {
    #[serde(rename_all = "camelCase")]
    UserNamePassword {
        username: String,
        password_vault_ref: String,
    },
    #[serde(rename_all = "camelCase")]
    ApiToken { token_vault_ref: String },
    #[serde(rename_all = "camelCase")]
    Kerberos { principal: String },
    #[serde(rename_all = "camelCase")]
    OAuth { scopes: Vec<String> },
    Anonymous,
}

impl AuthenticationStrategyKey {
    fn short_id(&self) -> String {
        match self {
            AuthenticationStrategyKey::UserNamePassword { username, .. } => {
                format!("userpass_{}", username)
            }
            AuthenticationStrategyKey::ApiToken { token_vault_ref } => {
                format!("token_{}", token_vault_ref)
            }
            AuthenticationStrategyKey::Kerberos { principal } => {
                format!("kerberos_{}", principal)
            }
            AuthenticationStrategyKey::OAuth { scopes } => {
                format!("oauth_{}", scopes.join("_"))
            }
            AuthenticationStrategyKey::Anonymous => "anonymous".to_string(),
        }
    }
}

/// Canonical identity of a pooled connection target.
///
/// Invariant: equal inputs produce equal keys, and equal keys map to the
/// same pool instance in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    datasource: DataSourceSpecificationKey,
    auth: AuthenticationStrategyKey,
}

impl ConnectionKey {
    pub fn new(datasource: DataSourceSpecificationKey, auth: AuthenticationStrategyKey) -> Self {
        Self { datasource, auth }
    }

    pub fn datasource(&self) -> &DataSourceSpecificationKey {
        &self.datasource
    }

    pub fn auth(&self) -> &AuthenticationStrategyKey {
        &self.auth
    }

    /// Deterministic human-readable identifier, used as the pool name in
    /// logs, metrics grouping and the admin API. Safe for URL path
    /// segments: everything outside `[A-Za-z0-9_.-]` is folded to `_`.
    pub fn short_id(&self) -> String {
        let raw = format!(
            "{}__{}",
            self.datasource.short_id(),
            self.auth.short_id()
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}
