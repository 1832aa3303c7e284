//! Per-execution graph-fetch cache.
//!
//! When a query graph crosses store boundaries, the same parent object may
//! be reached through multiple paths; this cache guarantees each distinct
//! parent is materialized from its store exactly once per execution batch,
//! and that fetched children are attached back to every path reaching it.
//!
//! A batch is owned by exactly one execution and never shared across
//! executions. Lookups run against two explicit tables behind one facade: a
//! structural table keyed by the primary-key tuple, and an identity table
//! keyed by an opaque token for objects that are already in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meridian_common::value::Value;
use meridian_error::{ErrorCode, ErrorContext, MeridianError, Result};

/// Reads one primary-key component from a materialized object.
///
/// Accessors are resolved once, when the plan is bound, not per row.
pub type KeyAccessor = Arc<dyn Fn(&GraphObject) -> Value + Send + Sync>;

/// A materialized object in the fetched graph: one row's named fields plus
/// the child objects attached per association edge.
#[derive(Debug)]
pub struct GraphObject {
    fields: HashMap<String, Value>,
    children: Mutex<HashMap<String, Vec<Arc<GraphObject>>>>,
}

impl GraphObject {
    pub fn from_row(columns: &[String], values: Vec<Value>) -> Arc<Self> {
        let fields = columns.iter().cloned().zip(values).collect();
        Arc::new(Self {
            fields,
            children: Mutex::new(HashMap::new()),
        })
    }

    pub fn field(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Children attached under `edge`, in attachment order.
    pub fn children(&self, edge: &str) -> Vec<Arc<GraphObject>> {
        lock_children(&self.children)
            .get(edge)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attach_child(&self, edge: &str, child: Arc<GraphObject>) {
        lock_children(&self.children)
            .entry(edge.to_string())
            .or_default()
            .push(child);
    }
}

fn lock_children(
    children: &Mutex<HashMap<String, Vec<Arc<GraphObject>>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Arc<GraphObject>>>> {
    children
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Structural identity of an object: its primary-key component values, in
/// the node's declared order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<KeyPart>);

impl PrimaryKey {
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts.into_iter().map(KeyPart::from).collect())
    }
}

/// A hashable key component. Floats hash by bit pattern, which is exact for
/// key values that round-tripped through the same store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(String),
}

impl From<Value> for KeyPart {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => KeyPart::Null,
            Value::Boolean(b) => KeyPart::Boolean(b),
            Value::Integer(i) => KeyPart::Integer(i),
            Value::Float(f) => KeyPart::Float(f.to_bits()),
            Value::String(s) => KeyPart::String(s),
        }
    }
}

/// Opaque in-memory identity of an already-materialized object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectToken(usize);

impl ObjectToken {
    pub fn of(object: &Arc<GraphObject>) -> Self {
        Self(Arc::as_ptr(object) as usize)
    }
}

struct NodeCache {
    accessors: Vec<KeyAccessor>,
    by_key: HashMap<PrimaryKey, Arc<GraphObject>>,
    by_identity: HashMap<ObjectToken, Arc<GraphObject>>,
}

/// The cache for one top-level execution, indexed by graph-fetch node.
///
/// Dropped with the execution; a new batch always starts empty.
#[derive(Default)]
pub struct GraphFetchBatch {
    nodes: HashMap<usize, NodeCache>,
}

impl GraphFetchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a graph-fetch node's primary-key accessors.
    ///
    /// The accessor set is validated here, once, so a malformed binding
    /// fails before any row is processed. Re-registering a node with a
    /// different arity is rejected for the same reason.
    pub fn register_node(
        &mut self,
        node_index: usize,
        accessors: Vec<KeyAccessor>,
    ) -> Result<()> {
        if accessors.is_empty() {
            return Err(binding_error(
                node_index,
                "graph-fetch node bound with no primary-key accessors",
            ));
        }
        if let Some(existing) = self.nodes.get(&node_index) {
            if existing.accessors.len() != accessors.len() {
                return Err(binding_error(
                    node_index,
                    "graph-fetch node re-bound with a different primary-key arity",
                ));
            }
            return Ok(());
        }
        self.nodes.insert(
            node_index,
            NodeCache {
                accessors,
                by_key: HashMap::new(),
                by_identity: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Compute an object's primary key with the node's bound accessors.
    pub fn key_of(&self, node_index: usize, object: &GraphObject) -> Result<PrimaryKey> {
        let node = self.node(node_index)?;
        Ok(PrimaryKey(
            node.accessors
                .iter()
                .map(|accessor| KeyPart::from(accessor(object)))
                .collect(),
        ))
    }

    pub fn get_by_key(&self, node_index: usize, key: &PrimaryKey) -> Option<Arc<GraphObject>> {
        self.nodes
            .get(&node_index)
            .and_then(|node| node.by_key.get(key))
            .map(Arc::clone)
    }

    pub fn get_by_identity(
        &self,
        node_index: usize,
        token: ObjectToken,
    ) -> Option<Arc<GraphObject>> {
        self.nodes
            .get(&node_index)
            .and_then(|node| node.by_identity.get(&token))
            .map(Arc::clone)
    }

    /// Record a materialized object under both its structural key and its
    /// in-memory identity. Returns the computed key.
    pub fn put(&mut self, node_index: usize, object: Arc<GraphObject>) -> Result<PrimaryKey> {
        let key = self.key_of(node_index, &object)?;
        let node = self.node_mut(node_index)?;
        node.by_identity.insert(ObjectToken::of(&object), Arc::clone(&object));
        node.by_key.insert(key.clone(), object);
        Ok(key)
    }

    fn node(&self, node_index: usize) -> Result<&NodeCache> {
        self.nodes
            .get(&node_index)
            .ok_or_else(|| binding_error(node_index, "graph-fetch node used before binding"))
    }

    fn node_mut(&mut self, node_index: usize) -> Result<&mut NodeCache> {
        self.nodes
            .get_mut(&node_index)
            .ok_or_else(|| binding_error(node_index, "graph-fetch node used before binding"))
    }
}

fn binding_error(node_index: usize, message: &str) -> MeridianError {
    MeridianError::new(
        ErrorCode::GraphFetchFailed,
        format!("{} (node {})", message, node_index),
    )
    .with_context(ErrorContext::GraphFetch {
        node_index,
        store: None,
    })
}
