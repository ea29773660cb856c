//! Proxy fabric. A [`Scope`] holds everything one snapshot's proxies need:
//! the value graph, the function path set, the canonical index for alias
//! resolution, and (for handle-backed scopes) the handle core. Lazy
//! proxies resolve members on access; the materialised fabric
//! (`materialize`) builds a real tree over the same scope.

use crate::consumer::ConsumerShared;
use crate::handles::HandleCore;
use crate::materialize::{materialize, MatValue};
use framerpc_core::{
    path, HandleKind, NodeId, Payload, RpcError, SnapshotGraph, SnapshotNode, WireValue,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub(crate) struct Scope {
    pub(crate) shared: Arc<ConsumerShared>,
    pub(crate) handle: Option<Arc<HandleCore>>,
    pub(crate) graph: Arc<SnapshotGraph>,
    pub(crate) functions: Arc<Vec<String>>,
    pub(crate) fn_set: Arc<HashSet<String>>,
    pub(crate) canonical: Arc<HashMap<NodeId, String>>,
}

impl Scope {
    pub(crate) fn new(
        shared: Arc<ConsumerShared>,
        handle: Option<Arc<HandleCore>>,
        graph: SnapshotGraph,
        functions: Vec<String>,
    ) -> Arc<Self> {
        let canonical = graph.canonical_index();
        let fn_set: HashSet<String> = functions.iter().cloned().collect();
        Arc::new(Scope {
            shared,
            handle,
            graph: Arc::new(graph),
            functions: Arc::new(functions),
            fn_set: Arc::new(fn_set),
            canonical: Arc::new(canonical),
        })
    }
}

/// Lazy proxy over a dotted prefix of a scope. Member access resolves
/// against the function set first, then the canonical index for aliases,
/// then the value graph.
#[derive(Clone)]
pub struct RemoteObject {
    pub(crate) scope: Arc<Scope>,
    pub(crate) prefix: String,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RemoteObject {
    pub(crate) fn root(scope: Arc<Scope>) -> Self {
        RemoteObject {
            scope,
            prefix: String::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve one member. Resolution order: function path, alias
    /// function path, plain value or sub-proxy, proxy anchored on
    /// descendant function paths (literal then alias). `None` means the
    /// member does not exist anywhere in the scope.
    pub fn get(&self, key: &str) -> Option<RemoteRef> {
        let scope = &self.scope;
        let full = path::join(&self.prefix, key);

        if scope.fn_set.contains(&full) {
            return Some(RemoteRef::Function(RemoteFunction {
                scope: scope.clone(),
                method: full,
            }));
        }

        // A cyclic snapshot reaches the same node through many prefixes;
        // translate this prefix to its canonical path before retrying the
        // function set.
        let alias = scope
            .graph
            .get_deep(&self.prefix)
            .and_then(|pid| scope.canonical.get(&pid))
            .filter(|c| **c != self.prefix)
            .map(|c| path::join(c, key));
        if let Some(alias_path) = &alias {
            if scope.fn_set.contains(alias_path) {
                return Some(RemoteRef::Function(RemoteFunction {
                    scope: scope.clone(),
                    method: alias_path.clone(),
                }));
            }
        }

        if let Some(node_id) = scope.graph.get_deep(&full) {
            match scope.graph.node(node_id)? {
                SnapshotNode::Leaf(v) => return Some(RemoteRef::Value(v.clone())),
                SnapshotNode::Record(_) | SnapshotNode::List(_) => {
                    return Some(RemoteRef::Object(RemoteObject {
                        scope: scope.clone(),
                        prefix: full,
                    }))
                }
            }
        }

        if path::any_at_or_under(scope.functions.iter(), &full) {
            return Some(RemoteRef::Object(RemoteObject {
                scope: scope.clone(),
                prefix: full,
            }));
        }
        if let Some(alias_path) = alias {
            if path::any_at_or_under(scope.functions.iter(), &alias_path) {
                return Some(RemoteRef::Object(RemoteObject {
                    scope: scope.clone(),
                    prefix: full,
                }));
            }
        }

        None
    }

    /// Release the handle backing this proxy.
    pub fn release(&self) -> Result<(), RpcError> {
        match &self.scope.handle {
            Some(core) => {
                core.release();
                Ok(())
            }
            None => Err(RpcError::app("reference is not handle-scoped")),
        }
    }
}

/// A callable resolved from a scope: posts a call and decodes the reply.
#[derive(Clone)]
pub struct RemoteFunction {
    pub(crate) scope: Arc<Scope>,
    pub(crate) method: String,
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("method", &self.method)
            .finish()
    }
}

impl RemoteFunction {
    pub async fn call(&self, args: Vec<WireValue>) -> Result<RemoteRef, RpcError> {
        let handle = match &self.scope.handle {
            Some(core) => {
                if core.is_released() {
                    return Err(RpcError::HandleReleased(core.id.clone()));
                }
                Some(core.id.clone())
            }
            None => None,
        };
        let payload = self
            .scope
            .shared
            .call(self.method.clone(), args, handle)
            .await?;
        decode_payload(&self.scope.shared, payload)
    }

    /// Release the handle backing this callable (function-kind handles).
    pub fn release(&self) -> Result<(), RpcError> {
        match &self.scope.handle {
            Some(core) => {
                core.release();
                Ok(())
            }
            None => Err(RpcError::app("reference is not handle-scoped")),
        }
    }
}

/// Any reference a consumer can hold: a plain value, a lazy proxy, a
/// materialised tree, or a callable.
#[derive(Clone, Debug)]
pub enum RemoteRef {
    Value(WireValue),
    Object(RemoteObject),
    Tree(MatValue),
    Function(RemoteFunction),
}

impl RemoteRef {
    pub fn get(&self, key: &str) -> Option<RemoteRef> {
        match self {
            RemoteRef::Object(o) => o.get(key),
            RemoteRef::Tree(t) => t.get(key).map(RemoteRef::from),
            _ => None,
        }
    }

    /// Walk a dotted path with [`get`](Self::get) semantics.
    pub fn at(&self, dotted: &str) -> Option<RemoteRef> {
        let mut current = self.clone();
        for segment in path::segments(dotted) {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub async fn call(&self, args: Vec<WireValue>) -> Result<RemoteRef, RpcError> {
        match self {
            RemoteRef::Function(f) => f.call(args).await,
            _ => Err(RpcError::app("reference is not callable")),
        }
    }

    /// Resolve a dotted path and call the function found there.
    pub async fn invoke(&self, dotted: &str, args: Vec<WireValue>) -> Result<RemoteRef, RpcError> {
        let target = self
            .at(dotted)
            .ok_or_else(|| RpcError::method_not_found(dotted))?;
        target.call(args).await
    }

    pub fn release(&self) -> Result<(), RpcError> {
        match self {
            RemoteRef::Object(o) => o.release(),
            RemoteRef::Tree(t) => t.release(),
            RemoteRef::Function(f) => f.release(),
            RemoteRef::Value(_) => Err(RpcError::app("reference is not handle-scoped")),
        }
    }

    pub fn as_value(&self) -> Option<&WireValue> {
        match self {
            RemoteRef::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(|v| v.as_f64())
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(|v| v.as_str())
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(|v| v.as_bool())
    }

    /// Enumerable keys. Lazy proxies hide structure and enumerate
    /// nothing; materialised trees list their entries.
    pub fn keys(&self) -> Vec<String> {
        match self {
            RemoteRef::Tree(t) => t.keys(),
            _ => Vec::new(),
        }
    }
}

impl From<MatValue> for RemoteRef {
    fn from(value: MatValue) -> Self {
        match value {
            MatValue::Value(v) => RemoteRef::Value(v),
            MatValue::Function(f) => RemoteRef::Function(f),
            other => RemoteRef::Tree(other),
        }
    }
}

/// Turn a received payload into the reference handed back to the caller.
/// Handle payloads register a core for release tracking; the `values`
/// payload form carries plain data, delivered as a leaf value or a
/// function-free root per the consumer's structure mode.
pub(crate) fn decode_payload(
    shared: &Arc<ConsumerShared>,
    payload: Payload,
) -> Result<RemoteRef, RpcError> {
    match payload {
        Payload::Value { values } => {
            if let Some(leaf) = values.root_leaf() {
                return Ok(RemoteRef::Value(leaf.clone()));
            }
            let scope = Scope::new(shared.clone(), None, values, Vec::new());
            Ok(root_ref(scope))
        }
        Payload::Handle {
            id,
            kind: HandleKind::Function,
            ..
        } => {
            let core = HandleCore::new(shared.clone(), id);
            let scope = Scope::new(
                shared.clone(),
                Some(core),
                SnapshotGraph::leaf(WireValue::Null),
                Vec::new(),
            );
            Ok(RemoteRef::Function(RemoteFunction {
                scope,
                method: String::new(),
            }))
        }
        Payload::Handle {
            id,
            kind: HandleKind::Object,
            values,
            functions,
        } => {
            let core = HandleCore::new(shared.clone(), id);
            let scope = Scope::new(
                shared.clone(),
                Some(core),
                values.unwrap_or_else(SnapshotGraph::empty_record),
                functions.unwrap_or_default(),
            );
            Ok(root_ref(scope))
        }
    }
}

/// Root reference for a scope, honouring the structure mode.
pub(crate) fn root_ref(scope: Arc<Scope>) -> RemoteRef {
    if scope.shared.config.hide_structure {
        RemoteRef::Object(RemoteObject::root(scope))
    } else {
        RemoteRef::from(materialize(&scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ConsumerConfig, ConsumerShared};
    use crate::handles::HandleRegistry;
    use dashmap::DashMap;
    use framerpc_core::{ApiNode, ApiObject, Snapshot};
    use std::sync::RwLock;

    fn test_shared(hide_structure: bool) -> Arc<ConsumerShared> {
        Arc::new(ConsumerShared {
            name: "api".to_string(),
            config: ConsumerConfig {
                hide_structure,
                ..Default::default()
            },
            pending: DashMap::new(),
            peer: RwLock::new(None),
            handles: HandleRegistry::default(),
        })
    }

    fn cyclic_scope() -> Arc<Scope> {
        let nested = ApiObject::new();
        nested.insert("val", 2i64);
        let cycle = ApiObject::new();
        cycle.insert("a", 1i64);
        cycle.insert("nested", nested.clone());
        cycle.insert("selfref", cycle.clone());
        nested.insert("parent", cycle.clone());
        nested.insert("fn", ApiNode::func_sync(|_| Ok(ApiNode::from(0i64))));

        let root = ApiObject::new();
        root.insert("cycle", cycle);
        let snapshot = Snapshot::capture(&ApiNode::Object(root));
        Scope::new(test_shared(true), None, snapshot.graph, snapshot.functions)
    }

    #[test]
    fn test_lazy_resolves_values_and_functions() {
        let scope = cyclic_scope();
        let root = RemoteObject::root(scope);

        let cycle = match root.get("cycle") {
            Some(RemoteRef::Object(o)) => o,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(cycle.get("a").unwrap().as_f64(), Some(1.0));

        match cycle.get("nested").unwrap().get("fn") {
            Some(RemoteRef::Function(f)) => assert_eq!(f.method, "cycle.nested.fn"),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(root.get("missing").is_none());
        assert!(cycle.get("a").unwrap().get("anything").is_none());
    }

    #[test]
    fn test_lazy_alias_reads_resolve_through_canonical_path() {
        let scope = cyclic_scope();
        let root = RemoteObject::root(scope);

        // Walking through the cycle keeps producing proxies.
        let aliased = root
            .get("cycle")
            .unwrap()
            .get("selfref")
            .unwrap()
            .get("selfref")
            .unwrap();
        assert_eq!(aliased.get("a").unwrap().as_f64(), Some(1.0));

        // An alias read of a function translates to the canonical method.
        match aliased.get("nested").unwrap().get("fn") {
            Some(RemoteRef::Function(f)) => assert_eq!(f.method, "cycle.nested.fn"),
            other => panic!("unexpected: {:?}", other),
        }
        match root.get("cycle").unwrap().at("nested.parent.nested.fn") {
            Some(RemoteRef::Function(f)) => assert_eq!(f.method, "cycle.nested.fn"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_lazy_anchors_on_descendant_function_paths() {
        // A scope whose value graph is empty but whose function set has
        // nested paths, as a function-bearing result with no data looks.
        let scope = Scope::new(
            test_shared(true),
            None,
            SnapshotGraph::leaf(WireValue::Null),
            vec!["helpers.run".to_string()],
        );
        let root = RemoteObject::root(scope);

        let helpers = match root.get("helpers") {
            Some(RemoteRef::Object(o)) => o,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(matches!(
            helpers.get("run"),
            Some(RemoteRef::Function(_))
        ));
        assert!(root.get("nothing").is_none());
    }

    #[test]
    fn test_lazy_returns_builtins_as_leaves() {
        let root_obj = ApiObject::new();
        root_obj.insert("d", WireValue::Date(1_700_000_000_000.0));
        root_obj.insert(
            "m",
            WireValue::Map(vec![(WireValue::from("k"), WireValue::from(1))]),
        );
        let snapshot = Snapshot::capture(&ApiNode::Object(root_obj));
        let scope = Scope::new(test_shared(true), None, snapshot.graph, snapshot.functions);
        let root = RemoteObject::root(scope);

        match root.get("d") {
            Some(RemoteRef::Value(WireValue::Date(ms))) => {
                assert_eq!(ms, 1_700_000_000_000.0)
            }
            other => panic!("unexpected: {:?}", other),
        }
        match root.get("m") {
            Some(RemoteRef::Value(WireValue::Map(entries))) => assert_eq!(entries.len(), 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_release_requires_a_handle_scope() {
        let scope = cyclic_scope();
        let root = RemoteObject::root(scope);
        assert!(root.release().is_err());
    }
}
