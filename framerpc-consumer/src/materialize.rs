//! Materialised fabric: a real, enumerable tree built from a snapshot
//! graph, with callables installed at every function path. Shared graph
//! nodes become shared tree nodes, so cycles and aliases read naturally
//! and a callable installed at a canonical path is visible through every
//! alias of its parent.

use crate::handles::HandleCore;
use crate::proxy::{RemoteFunction, Scope};
use framerpc_core::{path, NodeId, RpcError, SnapshotNode, WireValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub enum MatValue {
    Value(WireValue),
    Object(Arc<MatObject>),
    List(Arc<MatList>),
    Function(RemoteFunction),
}

pub struct MatObject {
    entries: RwLock<Vec<(String, MatValue)>>,
    handle: Option<Arc<HandleCore>>,
}

pub struct MatList {
    items: RwLock<Vec<MatValue>>,
    handle: Option<Arc<HandleCore>>,
}

impl fmt::Debug for MatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: materialised trees may be cyclic.
        match self {
            MatValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            MatValue::Object(o) => f.debug_struct("Object").field("keys", &o.keys()).finish(),
            MatValue::List(l) => f.debug_struct("List").field("len", &l.len()).finish(),
            MatValue::Function(func) => func.fmt(f),
        }
    }
}

impl MatObject {
    fn shell(handle: Option<Arc<HandleCore>>) -> Arc<Self> {
        Arc::new(MatObject {
            entries: RwLock::new(Vec::new()),
            handle,
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("materialized entries poisoned")
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<MatValue> {
        self.entries
            .read()
            .expect("materialized entries poisoned")
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn set(&self, key: &str, value: MatValue) {
        let mut entries = self.entries.write().expect("materialized entries poisoned");
        if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            entries.push((key.to_string(), value));
        }
    }
}

impl MatList {
    fn shell(handle: Option<Arc<HandleCore>>) -> Arc<Self> {
        Arc::new(MatList {
            items: RwLock::new(Vec::new()),
            handle,
        })
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("materialized items poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<MatValue> {
        self.items
            .read()
            .expect("materialized items poisoned")
            .get(index)
            .cloned()
    }

    fn set(&self, index: usize, value: MatValue) {
        let mut items = self.items.write().expect("materialized items poisoned");
        while items.len() <= index {
            items.push(MatValue::Value(WireValue::Null));
        }
        items[index] = value;
    }
}

impl MatValue {
    pub fn get(&self, key: &str) -> Option<MatValue> {
        match self {
            MatValue::Object(o) => o.get(key),
            MatValue::List(l) => path::as_index(key).and_then(|i| l.get(i)),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            MatValue::Object(o) => o.keys(),
            MatValue::List(l) => (0..l.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    fn set(&self, key: &str, value: MatValue) {
        match self {
            MatValue::Object(o) => o.set(key, value),
            MatValue::List(l) => {
                if let Some(i) = path::as_index(key) {
                    l.set(i, value);
                }
            }
            _ => {}
        }
    }

    /// Release the handle backing this tree's root.
    pub fn release(&self) -> Result<(), RpcError> {
        let handle = match self {
            MatValue::Object(o) => o.handle.as_ref(),
            MatValue::List(l) => l.handle.as_ref(),
            _ => None,
        };
        match handle {
            Some(core) => {
                core.release();
                Ok(())
            }
            None => Err(RpcError::app("reference is not handle-scoped")),
        }
    }
}

/// Build the enumerable tree for a scope. Two phases keep sharing intact:
/// shells for every composite node first, then entry fill, then callable
/// installation along each function path.
pub(crate) fn materialize(scope: &Arc<Scope>) -> MatValue {
    let graph = &scope.graph;
    let mut built: HashMap<NodeId, MatValue> = HashMap::new();

    for (i, node) in graph.nodes.iter().enumerate() {
        let id = NodeId(i as u32);
        let handle = if id == graph.root {
            scope.handle.clone()
        } else {
            None
        };
        let shell = match node {
            SnapshotNode::Record(_) => MatValue::Object(MatObject::shell(handle)),
            SnapshotNode::List(_) => MatValue::List(MatList::shell(handle)),
            SnapshotNode::Leaf(v) => MatValue::Value(v.clone()),
        };
        built.insert(id, shell);
    }

    for (i, node) in graph.nodes.iter().enumerate() {
        let id = NodeId(i as u32);
        match node {
            SnapshotNode::Record(entries) => {
                for (key, child) in entries {
                    if let Some(child_value) = built.get(child) {
                        built[&id].set(key, child_value.clone());
                    }
                }
            }
            SnapshotNode::List(items) => {
                for (index, child) in items.iter().enumerate() {
                    if let Some(child_value) = built.get(child) {
                        built[&id].set(&index.to_string(), child_value.clone());
                    }
                }
            }
            SnapshotNode::Leaf(_) => {}
        }
    }

    let root = built
        .get(&graph.root)
        .cloned()
        .unwrap_or(MatValue::Value(WireValue::Null));

    for function_path in scope.functions.iter() {
        install_function(scope, &root, function_path);
    }

    root
}

/// Walk (and create, when the snapshot lacks them) the intermediates of a
/// function path, then install the callable at the leaf key. Containers
/// are chosen from the snapshot node at each prefix; absent that, a
/// numeric next segment makes a list.
fn install_function(scope: &Arc<Scope>, root: &MatValue, function_path: &str) {
    let (parent_path, key) = path::split_parent(function_path);
    let segments: Vec<&str> = path::segments(parent_path).collect();

    let mut current = root.clone();
    let mut prefix = String::new();
    for (pos, segment) in segments.iter().enumerate() {
        let next_prefix = path::join(&prefix, segment);
        let child = match current.get(segment) {
            Some(existing @ (MatValue::Object(_) | MatValue::List(_))) => existing,
            _ => {
                let as_list = match scope
                    .graph
                    .get_deep(&next_prefix)
                    .and_then(|id| scope.graph.node(id))
                {
                    Some(SnapshotNode::List(_)) => true,
                    Some(_) => false,
                    None => {
                        let next_segment = segments.get(pos + 1).copied().unwrap_or(key);
                        path::as_index(next_segment).is_some()
                    }
                };
                let created = if as_list {
                    MatValue::List(MatList::shell(None))
                } else {
                    MatValue::Object(MatObject::shell(None))
                };
                current.set(segment, created.clone());
                created
            }
        };
        current = child;
        prefix = next_prefix;
    }

    current.set(
        key,
        MatValue::Function(RemoteFunction {
            scope: scope.clone(),
            method: function_path.to_string(),
        }),
    );
}
