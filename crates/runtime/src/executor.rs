//! Plan execution.
//!
//! Resolves the concrete sub-plan, runs the relational root's statement
//! batch over a pooled connection, then walks graph-fetch children across
//! stores with per-execution deduplication. Connections are held only for
//! the duration of one node's batch; a cancelled execution drops its borrow
//! guard and the connection returns to its pool.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use meridian_common::config::PoolSettings;
use meridian_common::value::Value;
use meridian_error::{ErrorCode, ErrorContext, MeridianError, Result};
use meridian_plan::{
    selector, ExecutionNode, ExecutionPlan, ParameterAccessor, SingleExecutionPlan, SqlStatement,
    StatementKind, TdsColumn, TdsType,
};
use meridian_relational::{
    AuthenticationStrategyKey, ConnectionKey, CredentialProvider, DataSourceSpecificationKey,
    DatabaseVendor, PoolRegistry, PooledConnection, RowSet, VendorRegistry,
};
use tracing::{debug, info};

use crate::graph::{GraphFetchBatch, GraphObject, KeyAccessor, ObjectToken};
use crate::tds::{Activity, TdsFraming, TdsWriter};

/// Materialized outcome of one execution: the root result shape plus the
/// activities performed to produce it.
#[derive(Debug)]
pub struct ExecutionResult {
    pub columns: Vec<TdsColumn>,
    pub rows: Vec<Vec<Value>>,
    pub roots: Vec<Arc<GraphObject>>,
    pub activities: Vec<Activity>,
}

impl ExecutionResult {
    /// Stream this result as a tabular data set.
    pub fn stream<W: Write>(&self, out: W, framing: TdsFraming) -> Result<W> {
        let mut writer = TdsWriter::new(out, framing);
        writer.attach_schema(self.columns.clone())?;
        for row in &self.rows {
            writer.write_row(row)?;
        }
        writer.finish(&self.activities)
    }
}

/// Runs execution plans against the pool registry and vendor table.
pub struct Executor {
    vendors: Arc<VendorRegistry>,
    pools: Arc<PoolRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    settings: PoolSettings,
}

impl Executor {
    pub fn new(
        vendors: Arc<VendorRegistry>,
        pools: Arc<PoolRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            vendors,
            pools,
            credentials,
            settings,
        }
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Execute a plan document end to end.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        accessor: &dyn ParameterAccessor,
        raw_params: &HashMap<String, serde_json::Value>,
        user: &str,
    ) -> Result<ExecutionResult> {
        let selected = selector::select(plan, accessor, raw_params)?;
        self.execute_single(selected, user).await
    }

    async fn execute_single(
        &self,
        plan: &SingleExecutionPlan,
        user: &str,
    ) -> Result<ExecutionResult> {
        let mut batch = GraphFetchBatch::new();
        let mut activities = Vec::new();

        let (vendor, datasource, auth, statements, children) = match &plan.root {
            ExecutionNode::Relational {
                vendor,
                datasource,
                auth,
                statements,
                children,
            } => (vendor, datasource, auth, statements, children),
            ExecutionNode::GraphFetch { node_index, .. } => {
                return Err(MeridianError::new(
                    ErrorCode::InvalidPlanDocument,
                    format!(
                        "Plan root must be a relational node, found graph-fetch node {}",
                        node_index
                    ),
                ));
            }
        };

        let rows = self
            .run_statement_batch(*vendor, datasource, auth, statements, user, &mut activities)
            .await?;

        let roots: Vec<Arc<GraphObject>> = rows
            .rows
            .iter()
            .map(|row| GraphObject::from_row(&rows.columns, row.clone()))
            .collect();

        for child in children {
            self.run_graph_fetch(child, &roots, &mut batch, user, &mut activities)
                .await?;
        }

        let columns = if plan.columns.is_empty() {
            infer_columns(&rows)
        } else {
            plan.columns.clone()
        };

        info!(
            rows = rows.rows.len(),
            roots = roots.len(),
            activities = activities.len(),
            "Execution complete"
        );

        Ok(ExecutionResult {
            columns,
            rows: rows.rows,
            roots,
            activities,
        })
    }

    /// Run one node's ordered statement batch on a borrowed connection.
    ///
    /// Failures of cleanup DDL (temp-table teardown) are expected-benign
    /// and swallowed; any other statement failure aborts the batch with the
    /// statement and connection identity attached.
    async fn run_statement_batch(
        &self,
        vendor: DatabaseVendor,
        datasource: &DataSourceSpecificationKey,
        auth: &AuthenticationStrategyKey,
        statements: &[SqlStatement],
        user: &str,
        activities: &mut Vec<Activity>,
    ) -> Result<RowSet> {
        let guard = self.borrow(vendor, datasource, auth, user).await?;

        let mut result = RowSet::empty();
        for statement in statements {
            match guard.connection().execute(&statement.sql).await {
                Ok(rows) => {
                    activities.push(Activity {
                        sql: statement.sql.clone(),
                        pool: guard.pool_name().to_string(),
                    });
                    if statement.kind == StatementKind::Query {
                        result = rows;
                    }
                }
                Err(e) if statement.kind == StatementKind::CleanupDdl => {
                    debug!(
                        pool = guard.pool_name(),
                        sql = %statement.sql,
                        error = %e,
                        "Ignoring cleanup DDL failure"
                    );
                }
                Err(e) => {
                    return Err(MeridianError::new(
                        ErrorCode::SqlExecutionFailed,
                        format!("Statement failed on pool '{}': {}", guard.pool_name(), e),
                    )
                    .with_context(ErrorContext::Sql {
                        statement: statement.sql.clone(),
                        pool: guard.pool_name().to_string(),
                        vendor: vendor.to_string(),
                    }));
                }
            }
        }
        Ok(result)
    }

    /// Fetch one graph-fetch node's children for every parent object,
    /// deduplicating parents through the batch cache.
    async fn run_graph_fetch(
        &self,
        node: &ExecutionNode,
        parents: &[Arc<GraphObject>],
        batch: &mut GraphFetchBatch,
        user: &str,
        activities: &mut Vec<Activity>,
    ) -> Result<()> {
        let (node_index, edge, vendor, datasource, auth, sql, pk_fields, grandchildren) =
            match node {
                ExecutionNode::GraphFetch {
                    node_index,
                    edge,
                    vendor,
                    datasource,
                    auth,
                    sql,
                    primary_key_fields,
                    children,
                } => (
                    *node_index,
                    edge,
                    *vendor,
                    datasource,
                    auth,
                    sql,
                    primary_key_fields,
                    children,
                ),
                ExecutionNode::Relational { .. } => {
                    return Err(MeridianError::new(
                        ErrorCode::InvalidPlanDocument,
                        "Relational nodes cannot appear below the plan root",
                    ));
                }
            };

        batch.register_node(node_index, field_accessors(pk_fields))?;

        let guard = self.borrow(vendor, datasource, auth, user).await?;
        let mut fetched: Vec<Arc<GraphObject>> = Vec::new();

        for parent in parents {
            // Same allocation reached through a second path: nothing to do,
            // its children are already attached.
            if batch
                .get_by_identity(node_index, ObjectToken::of(parent))
                .is_some()
            {
                continue;
            }

            let key = batch.key_of(node_index, parent)?;
            if let Some(cached) = batch.get_by_key(node_index, &key) {
                // Structurally-equal parent already fetched: share its
                // children with this path instead of re-fetching.
                for child in cached.children(edge) {
                    parent.attach_child(edge, child);
                }
                continue;
            }

            let bound_sql = bind_template(sql, parent);
            let rows = guard
                .connection()
                .execute(&bound_sql)
                .await
                .map_err(|e| {
                    MeridianError::new(
                        ErrorCode::GraphFetchFailed,
                        format!("Cross-store fetch failed at node {}: {}", node_index, e),
                    )
                    .with_context(ErrorContext::GraphFetch {
                        node_index,
                        store: Some(vendor.to_string()),
                    })
                })?;
            activities.push(Activity {
                sql: bound_sql,
                pool: guard.pool_name().to_string(),
            });

            for row in &rows.rows {
                let child = GraphObject::from_row(&rows.columns, row.clone());
                parent.attach_child(edge, Arc::clone(&child));
                fetched.push(child);
            }
            batch.put(node_index, Arc::clone(parent))?;
        }

        // Release this node's connection before descending.
        drop(guard);

        for grandchild in grandchildren {
            Box::pin(self.run_graph_fetch(grandchild, &fetched, batch, user, activities)).await?;
        }
        Ok(())
    }

    async fn borrow(
        &self,
        vendor: DatabaseVendor,
        datasource: &DataSourceSpecificationKey,
        auth: &AuthenticationStrategyKey,
        user: &str,
    ) -> Result<PooledConnection> {
        let manager = self.vendors.lookup(vendor)?;
        let key = ConnectionKey::new(datasource.clone(), auth.clone());
        let pool = self.pools.get_or_create(
            key,
            self.settings.max_size,
            &manager,
            Arc::clone(&self.credentials),
            user,
        )?;
        pool.borrow(Duration::from_millis(self.settings.borrow_timeout_ms))
            .await
    }
}

fn field_accessors(fields: &[String]) -> Vec<KeyAccessor> {
    fields
        .iter()
        .map(|field| {
            let field = field.clone();
            Arc::new(move |object: &GraphObject| object.field(&field)) as KeyAccessor
        })
        .collect()
}

/// Bind `${field}` placeholders from the parent object's fields, rendering
/// each value as a SQL literal.
fn bind_template(sql: &str, object: &GraphObject) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&object.field(&after[..end]).to_sql_literal());
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder; emit verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Derive a result shape from the row set when the plan declares none.
fn infer_columns(rows: &RowSet) -> Vec<TdsColumn> {
    rows.columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let tds_type = rows
                .rows
                .iter()
                .find_map(|row| match row.get(i) {
                    Some(Value::Null) | None => None,
                    Some(Value::Boolean(_)) => Some(TdsType::Boolean),
                    Some(Value::Integer(_)) => Some(TdsType::Integer),
                    Some(Value::Float(_)) => Some(TdsType::Float),
                    Some(Value::String(_)) => Some(TdsType::String),
                })
                .unwrap_or(TdsType::String);
            TdsColumn {
                name: name.clone(),
                tds_type,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(fields: &[(&str, Value)]) -> Arc<GraphObject> {
        let columns: Vec<String> = fields.iter().map(|(n, _)| n.to_string()).collect();
        let values: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();
        GraphObject::from_row(&columns, values)
    }

    #[test]
    fn test_bind_template_substitutes_literals() {
        let parent = object(&[
            ("id", Value::Integer(7)),
            ("name", Value::String("O'Brien".to_string())),
        ]);
        let sql = bind_template(
            "SELECT * FROM a WHERE pid = ${id} AND owner = ${name}",
            &parent,
        );
        assert_eq!(sql, "SELECT * FROM a WHERE pid = 7 AND owner = 'O''Brien'");
    }

    #[test]
    fn test_bind_template_unknown_field_is_null() {
        let parent = object(&[("id", Value::Integer(1))]);
        assert_eq!(
            bind_template("WHERE x = ${missing}", &parent),
            "WHERE x = NULL"
        );
    }

    #[test]
    fn test_bind_template_unterminated_placeholder() {
        let parent = object(&[("id", Value::Integer(1))]);
        assert_eq!(bind_template("WHERE x = ${id", &parent), "WHERE x = ${id");
    }

    #[test]
    fn test_infer_columns_skips_leading_nulls() {
        let rows = RowSet {
            columns: vec!["a".to_string()],
            rows: vec![vec![Value::Null], vec![Value::Integer(3)]],
        };
        assert_eq!(infer_columns(&rows)[0].tds_type, TdsType::Integer);
    }
}
