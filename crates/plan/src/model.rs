//! Plan document model.
//!
//! Mirrors the JSON produced by the plan compiler. A document is either a
//! single execution-node tree with a declared result shape, or a composite
//! keyed by a named parameter. The composite mapping is immutable once the
//! document is loaded.

use indexmap::IndexMap;
use meridian_error::{ErrorCode, MeridianError, Result};
use meridian_relational::{AuthenticationStrategyKey, DataSourceSpecificationKey, DatabaseVendor};
use serde::{Deserialize, Serialize};

/// A pre-compiled execution plan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionPlan {
    Composite {
        #[serde(rename = "executionKeyName")]
        execution_key_name: String,
        #[serde(rename = "executionKeys")]
        execution_keys: Vec<String>,
        #[serde(rename = "executionPlans")]
        execution_plans: IndexMap<String, SingleExecutionPlan>,
    },
    Single(SingleExecutionPlan),
}

impl ExecutionPlan {
    /// Deserialize and validate a plan document.
    ///
    /// For a composite, every declared execution key must map to a sub-plan;
    /// a dangling key is rejected here so selection can trust the mapping.
    pub fn from_json(document: &serde_json::Value) -> Result<Self> {
        let plan: ExecutionPlan = serde_json::from_value(document.clone()).map_err(|e| {
            MeridianError::new(
                ErrorCode::InvalidPlanDocument,
                format!("Malformed plan document: {}", e),
            )
        })?;

        if let ExecutionPlan::Composite {
            execution_keys,
            execution_plans,
            execution_key_name,
        } = &plan
        {
            for key in execution_keys {
                if !execution_plans.contains_key(key) {
                    return Err(MeridianError::new(
                        ErrorCode::InvalidPlanDocument,
                        format!(
                            "Composite plan declares key '{}' for parameter '{}' but maps no sub-plan to it",
                            key, execution_key_name
                        ),
                    ));
                }
            }
        }

        Ok(plan)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, ExecutionPlan::Composite { .. })
    }

    /// Valid composite keys, sorted. Empty for a single plan.
    pub fn valid_keys(&self) -> Vec<String> {
        match self {
            ExecutionPlan::Composite {
                execution_plans, ..
            } => {
                let mut keys: Vec<String> = execution_plans.keys().cloned().collect();
                keys.sort();
                keys
            }
            ExecutionPlan::Single(_) => Vec::new(),
        }
    }
}

/// One concrete node tree plus its declared result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleExecutionPlan {
    pub root: ExecutionNode,
    #[serde(default)]
    pub columns: Vec<TdsColumn>,
}

/// A node in the execution tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "camelCase")]
pub enum ExecutionNode {
    /// An ordered SQL statement batch against one relational store.
    #[serde(rename_all = "camelCase")]
    Relational {
        vendor: DatabaseVendor,
        datasource: DataSourceSpecificationKey,
        auth: AuthenticationStrategyKey,
        statements: Vec<SqlStatement>,
        #[serde(default)]
        children: Vec<ExecutionNode>,
    },

    /// A cross-store fetch joined to its parent rows.
    ///
    /// `sql` is a template; `${field}` placeholders are bound from the
    /// parent row before execution. `primary_key_fields` names the columns
    /// forming the parent's structural identity, in order; its arity is
    /// fixed for the node and checked when the plan is bound.
    #[serde(rename_all = "camelCase")]
    GraphFetch {
        node_index: usize,
        /// Association property the fetched children attach under.
        edge: String,
        vendor: DatabaseVendor,
        datasource: DataSourceSpecificationKey,
        auth: AuthenticationStrategyKey,
        sql: String,
        primary_key_fields: Vec<String>,
        #[serde(default)]
        children: Vec<ExecutionNode>,
    },
}

/// One statement in a relational node's batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlStatement {
    pub sql: String,
    #[serde(default)]
    pub kind: StatementKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum StatementKind {
    /// Produces the node's result rows.
    #[default]
    Query,
    /// Side-effecting setup (temp-table create, staged load).
    Update,
    /// Temp-table teardown; failure is expected-benign.
    CleanupDdl,
}

/// A named, typed column in the declared result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdsColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub tds_type: TdsType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TdsType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single_doc() -> serde_json::Value {
        json!({
            "root": {
                "_type": "relational",
                "vendor": "postgres",
                "datasource": { "_type": "staticWithHost", "host": "db1", "port": 5432, "database": "orders" },
                "auth": { "_type": "anonymous" },
                "statements": [ { "sql": "SELECT id, name FROM t" } ]
            },
            "columns": [
                { "name": "id", "type": "integer" },
                { "name": "name", "type": "string" }
            ]
        })
    }

    #[test]
    fn test_parse_single_plan() {
        let plan = ExecutionPlan::from_json(&single_doc()).unwrap();
        assert!(!plan.is_composite());
        match plan {
            ExecutionPlan::Single(single) => {
                assert_eq!(single.columns.len(), 2);
                match single.root {
                    ExecutionNode::Relational { statements, .. } => {
                        assert_eq!(statements[0].kind, StatementKind::Query);
                    }
                    _ => panic!("Expected relational root"),
                }
            }
            _ => panic!("Expected single plan"),
        }
    }

    #[test]
    fn test_parse_composite_plan() {
        let doc = json!({
            "executionKeyName": "type",
            "executionKeys": ["A", "B"],
            "executionPlans": { "A": single_doc(), "B": single_doc() }
        });
        let plan = ExecutionPlan::from_json(&doc).unwrap();
        assert!(plan.is_composite());
        assert_eq!(plan.valid_keys(), vec!["A", "B"]);
    }

    #[test]
    fn test_dangling_execution_key_is_rejected() {
        let doc = json!({
            "executionKeyName": "type",
            "executionKeys": ["A", "B"],
            "executionPlans": { "A": single_doc() }
        });
        let err = ExecutionPlan::from_json(&doc).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPlanDocument);
        assert!(err.message.contains("'B'"));
    }

    #[test]
    fn test_malformed_document() {
        let err = ExecutionPlan::from_json(&json!({ "root": 42 })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPlanDocument);
    }

    #[test]
    fn test_graph_fetch_node_fields() {
        let doc = json!({
            "root": {
                "_type": "graphFetch",
                "nodeIndex": 0,
                "edge": "addresses",
                "vendor": "sqlite",
                "datasource": { "_type": "embedded", "path": "/tmp/t.db" },
                "auth": { "_type": "anonymous" },
                "sql": "SELECT * FROM child WHERE parent_id = ${id}",
                "primaryKeyFields": ["id", "region"]
            }
        });
        let plan = ExecutionPlan::from_json(&doc).unwrap();
        match plan {
            ExecutionPlan::Single(single) => match single.root {
                ExecutionNode::GraphFetch {
                    node_index,
                    primary_key_fields,
                    ..
                } => {
                    assert_eq!(node_index, 0);
                    assert_eq!(primary_key_fields, vec!["id", "region"]);
                }
                _ => panic!("Expected graph-fetch root"),
            },
            _ => panic!("Expected single plan"),
        }
    }
}
