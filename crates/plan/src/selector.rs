//! Composite plan selection.
//!
//! `select` is the identity for a single plan. For a composite plan it reads
//! the value bound to the plan's `executionKeyName` through the caller's
//! [`ParameterAccessor`], falling back to the raw untyped parameter map when
//! the accessor has no binding. When the raw value is a sequence, its first
//! element is taken; that fallback is a compatibility shim carried over from
//! older plan clients and is logged whenever it fires.

use std::collections::HashMap;

use meridian_common::value::Value;
use meridian_error::{ErrorCode, ErrorContext, MeridianError, Result};
use tracing::warn;

use crate::model::{ExecutionPlan, SingleExecutionPlan};

/// Typed parameter lookup supplied by the caller.
pub trait ParameterAccessor: Sync {
    fn get(&self, name: &str) -> Option<Value>;
}

/// The common case: parameters already materialized into a map.
#[derive(Debug, Default)]
pub struct MapParameterAccessor {
    params: HashMap<String, Value>,
}

impl MapParameterAccessor {
    pub fn new(params: HashMap<String, Value>) -> Self {
        Self { params }
    }
}

impl ParameterAccessor for MapParameterAccessor {
    fn get(&self, name: &str) -> Option<Value> {
        self.params.get(name).cloned()
    }
}

/// Resolve the concrete sub-plan to execute.
pub fn select<'a>(
    plan: &'a ExecutionPlan,
    accessor: &dyn ParameterAccessor,
    raw_params: &HashMap<String, serde_json::Value>,
) -> Result<&'a SingleExecutionPlan> {
    let (key_name, plans) = match plan {
        ExecutionPlan::Single(single) => return Ok(single),
        ExecutionPlan::Composite {
            execution_key_name,
            execution_plans,
            ..
        } => (execution_key_name, execution_plans),
    };

    let key = accessor
        .get(key_name)
        .and_then(|v| v.as_key())
        .or_else(|| raw_param_key(key_name, raw_params))
        .ok_or_else(|| {
            MeridianError::new(
                ErrorCode::PlanKeyMissing,
                format!("No value provided for execution key parameter '{}'", key_name),
            )
            .with_context(ErrorContext::PlanSelection {
                parameter: key_name.clone(),
                provided: None,
                valid_keys: plan.valid_keys(),
            })
            .with_hint("Pass the parameter in the request, or use the matching single plan")
        })?;

    plans.get(&key).ok_or_else(|| {
        let valid_keys = plan.valid_keys();
        MeridianError::new(
            ErrorCode::PlanKeyUnknown,
            format!(
                "Execution key '{}' = '{}' matches no sub-plan; valid keys: {}",
                key_name,
                key,
                valid_keys.join(", ")
            ),
        )
        .with_context(ErrorContext::PlanSelection {
            parameter: key_name.clone(),
            provided: Some(key),
            valid_keys,
        })
    })
}

/// Raw-parameter fallback, including the first-element-of-a-sequence shim.
fn raw_param_key(key_name: &str, raw_params: &HashMap<String, serde_json::Value>) -> Option<String> {
    let raw = raw_params.get(key_name)?;
    let scalar = match raw {
        serde_json::Value::Array(items) => {
            let first = items.first()?;
            warn!(
                parameter = key_name,
                len = items.len(),
                "Execution key parameter is a sequence; taking its first element"
            );
            first
        }
        other => other,
    };
    Value::try_from(scalar).ok()?.as_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionNode;
    use meridian_relational::{
        AuthenticationStrategyKey, DataSourceSpecificationKey, DatabaseVendor,
    };
    use serde_json::json;

    fn single(marker: &str) -> SingleExecutionPlan {
        SingleExecutionPlan {
            root: ExecutionNode::Relational {
                vendor: DatabaseVendor::Sqlite,
                datasource: DataSourceSpecificationKey::Embedded {
                    path: format!("/tmp/{}.db", marker),
                },
                auth: AuthenticationStrategyKey::Anonymous,
                statements: Vec::new(),
                children: Vec::new(),
            },
            columns: Vec::new(),
        }
    }

    fn composite() -> ExecutionPlan {
        let mut plans = indexmap::IndexMap::new();
        plans.insert("A".to_string(), single("a"));
        plans.insert("B".to_string(), single("b"));
        ExecutionPlan::Composite {
            execution_key_name: "type".to_string(),
            execution_keys: vec!["A".to_string(), "B".to_string()],
            execution_plans: plans,
        }
    }

    fn marker(plan: &SingleExecutionPlan) -> &str {
        match &plan.root {
            ExecutionNode::Relational {
                datasource: DataSourceSpecificationKey::Embedded { path },
                ..
            } => path,
            _ => panic!("Unexpected node shape"),
        }
    }

    fn accessor(pairs: &[(&str, &str)]) -> MapParameterAccessor {
        MapParameterAccessor::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn test_single_plan_selection_is_identity() {
        let plan = ExecutionPlan::Single(single("only"));
        let selected = select(&plan, &accessor(&[]), &HashMap::new()).unwrap();
        assert_eq!(marker(selected), "/tmp/only.db");
    }

    #[test]
    fn test_accessor_value_selects_sub_plan() {
        let plan = composite();
        let selected = select(&plan, &accessor(&[("type", "B")]), &HashMap::new()).unwrap();
        assert_eq!(marker(selected), "/tmp/b.db");
    }

    #[test]
    fn test_unknown_key_lists_sorted_valid_keys() {
        let plan = composite();
        let err = select(&plan, &accessor(&[("type", "C")]), &HashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanKeyUnknown);
        assert!(err.message.contains("A, B"));
    }

    #[test]
    fn test_missing_key_names_the_parameter() {
        let plan = composite();
        let err = select(&plan, &accessor(&[]), &HashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::PlanKeyMissing);
        assert!(err.message.contains("'type'"));
    }

    #[test]
    fn test_raw_params_fallback() {
        let plan = composite();
        let raw = HashMap::from([("type".to_string(), json!("A"))]);
        let selected = select(&plan, &accessor(&[]), &raw).unwrap();
        assert_eq!(marker(selected), "/tmp/a.db");
    }

    #[test]
    fn test_raw_params_sequence_takes_first_element() {
        let plan = composite();
        let raw = HashMap::from([("type".to_string(), json!(["B", "A"]))]);
        let selected = select(&plan, &accessor(&[]), &raw).unwrap();
        assert_eq!(marker(selected), "/tmp/b.db");
    }

    #[test]
    fn test_accessor_wins_over_raw_params() {
        let plan = composite();
        let raw = HashMap::from([("type".to_string(), json!("A"))]);
        let selected = select(&plan, &accessor(&[("type", "B")]), &raw).unwrap();
        assert_eq!(marker(selected), "/tmp/b.db");
    }

    #[test]
    fn test_integer_key_coerces_to_text() {
        let mut plans = indexmap::IndexMap::new();
        plans.insert("1".to_string(), single("one"));
        let plan = ExecutionPlan::Composite {
            execution_key_name: "version".to_string(),
            execution_keys: vec!["1".to_string()],
            execution_plans: plans,
        };
        let raw = HashMap::from([("version".to_string(), json!(1))]);
        let selected = select(&plan, &accessor(&[]), &raw).unwrap();
        assert_eq!(marker(selected), "/tmp/one.db");
    }
}
