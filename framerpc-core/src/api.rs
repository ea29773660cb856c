//! Provider-side API tree. The tree is what a provider publishes: plain
//! values and pass-through built-ins at the leaves, records and lists as
//! structure, async functions at any depth, and computed (getter) members
//! evaluated on read. Shared `Arc` nodes express aliasing; interior locks
//! allow cycles to be tied after construction.

use crate::error::RpcError;
use crate::path;
use crate::value::WireValue;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A callable member of the API tree.
///
/// Functions capture whatever state they close over, so invocation carries
/// no separate receiver. The returned node may itself contain functions, in
/// which case the provider issues a handle for it.
#[async_trait]
pub trait ApiFunction: Send + Sync + fmt::Debug {
    async fn call(&self, args: Vec<WireValue>) -> Result<ApiNode, RpcError>;
}

/// A computed member. Evaluated once during snapshot capture and on demand
/// during call dispatch; a failing getter simply omits its key.
pub trait ApiGetter: Send + Sync {
    fn get(&self) -> Result<ApiNode, RpcError>;
}

/// One node of the API tree.
#[derive(Debug, Clone)]
pub enum ApiNode {
    /// Primitive or pass-through built-in; a traversal leaf.
    Value(WireValue),
    Object(Arc<ApiObject>),
    List(Arc<RwLock<Vec<ApiNode>>>),
    Function(Arc<dyn ApiFunction>),
}

/// A record node: ordered data entries, ordered getter entries, and an
/// optional prototype whose members are readable through the chain.
pub struct ApiObject {
    entries: RwLock<Vec<(String, ApiNode)>>,
    getters: RwLock<Vec<(String, Arc<dyn ApiGetter>)>>,
    proto: Option<Arc<ApiObject>>,
}

impl fmt::Debug for ApiObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.own_keys();
        f.debug_struct("ApiObject")
            .field("keys", &keys)
            .field("has_proto", &self.proto.is_some())
            .finish()
    }
}

impl ApiObject {
    pub fn new() -> Arc<Self> {
        Arc::new(ApiObject {
            entries: RwLock::new(Vec::new()),
            getters: RwLock::new(Vec::new()),
            proto: None,
        })
    }

    pub fn with_proto(proto: Arc<ApiObject>) -> Arc<Self> {
        Arc::new(ApiObject {
            entries: RwLock::new(Vec::new()),
            getters: RwLock::new(Vec::new()),
            proto: Some(proto),
        })
    }

    /// Insert or replace a data entry.
    pub fn insert(&self, key: impl Into<String>, node: impl Into<ApiNode>) {
        let key = key.into();
        let node = node.into();
        let mut entries = self.entries.write().expect("api entries poisoned");
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = node;
        } else {
            entries.push((key, node));
        }
    }

    /// Insert a computed entry.
    pub fn insert_getter(&self, key: impl Into<String>, getter: impl ApiGetter + 'static) {
        self.getters
            .write()
            .expect("api getters poisoned")
            .push((key.into(), Arc::new(getter)));
    }

    fn own_keys(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("api entries poisoned")
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn own_entry(&self, key: &str) -> Option<ApiNode> {
        self.entries
            .read()
            .expect("api entries poisoned")
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, n)| n.clone())
    }

    fn own_getter(&self, key: &str) -> Option<Arc<dyn ApiGetter>> {
        self.getters
            .read()
            .expect("api getters poisoned")
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, g)| g.clone())
    }

    /// Live member lookup with normal property-access semantics: own data
    /// entry, own getter, then the prototype chain. Getter failures read
    /// as absent.
    pub fn get(&self, key: &str) -> Option<ApiNode> {
        if let Some(node) = self.own_entry(key) {
            return Some(node);
        }
        if let Some(getter) = self.own_getter(key) {
            return getter.get().ok();
        }
        self.proto.as_ref().and_then(|p| p.get(key))
    }

    /// Keys whose values appear in a snapshot: own data entries, own
    /// getters, and getters inherited through the prototype chain.
    pub fn readable_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut push = |k: &str| {
            if !keys.iter().any(|existing: &String| existing == k) {
                keys.push(k.to_string());
            }
        };
        for (k, _) in self.entries.read().expect("api entries poisoned").iter() {
            push(k);
        }
        for (k, _) in self.getters.read().expect("api getters poisoned").iter() {
            push(k);
        }
        let mut proto = self.proto.clone();
        while let Some(p) = proto {
            for (k, _) in p.getters.read().expect("api getters poisoned").iter() {
                push(k);
            }
            proto = p.proto.clone();
        }
        keys
    }

    /// Keys visited when collecting function paths: every readable key
    /// plus prototype-chain data entries that are functions (methods).
    pub fn collect_keys(&self) -> Vec<String> {
        let mut keys = self.readable_keys();
        let mut push = |k: &str| {
            if !keys.iter().any(|existing: &String| existing == k) {
                keys.push(k.to_string());
            }
        };
        let mut proto = self.proto.clone();
        while let Some(p) = proto {
            for (k, node) in p.entries.read().expect("api entries poisoned").iter() {
                if matches!(node, ApiNode::Function(_)) {
                    push(k);
                }
            }
            proto = p.proto.clone();
        }
        keys
    }
}

impl ApiNode {
    pub fn object() -> Arc<ApiObject> {
        ApiObject::new()
    }

    pub fn list(items: Vec<ApiNode>) -> ApiNode {
        ApiNode::List(Arc::new(RwLock::new(items)))
    }

    /// Wrap an async closure as a callable node.
    pub fn func<F, Fut>(f: F) -> ApiNode
    where
        F: Fn(Vec<WireValue>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ApiNode, RpcError>> + Send + 'static,
    {
        ApiNode::Function(Arc::new(NativeFunction::new(move |args| {
            Box::pin(f(args))
        })))
    }

    /// Wrap a synchronous closure as a callable node.
    pub fn func_sync<F>(f: F) -> ApiNode
    where
        F: Fn(Vec<WireValue>) -> Result<ApiNode, RpcError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        ApiNode::func(move |args| {
            let f = f.clone();
            async move { f(args) }
        })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, ApiNode::Function(_))
    }

    /// Pointer identity for shared composite nodes, used to preserve
    /// aliasing and terminate traversal of cycles.
    pub fn identity(&self) -> Option<usize> {
        match self {
            ApiNode::Object(o) => Some(Arc::as_ptr(o) as usize),
            ApiNode::List(l) => Some(Arc::as_ptr(l) as *const () as usize),
            _ => None,
        }
    }
}

/// Deep read by dotted path over the live tree. Returns `None` on any
/// missing intermediate; the empty path returns the root.
pub fn get_deep(root: &ApiNode, dotted: &str) -> Option<ApiNode> {
    let mut current = root.clone();
    for segment in path::segments(dotted) {
        current = match &current {
            ApiNode::Object(obj) => obj.get(segment)?,
            ApiNode::List(items) => {
                let idx = path::as_index(segment)?;
                items.read().expect("api list poisoned").get(idx)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Closure-backed [`ApiFunction`].
pub struct NativeFunction {
    f: Box<dyn Fn(Vec<WireValue>) -> BoxFuture<'static, Result<ApiNode, RpcError>> + Send + Sync>,
}

impl NativeFunction {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<WireValue>) -> BoxFuture<'static, Result<ApiNode, RpcError>>
            + Send
            + Sync
            + 'static,
    {
        NativeFunction { f: Box::new(f) }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeFunction")
    }
}

#[async_trait]
impl ApiFunction for NativeFunction {
    async fn call(&self, args: Vec<WireValue>) -> Result<ApiNode, RpcError> {
        (self.f)(args).await
    }
}

/// Closure-backed [`ApiGetter`].
pub struct FnGetter<F>(pub F);

impl<F> ApiGetter for FnGetter<F>
where
    F: Fn() -> Result<ApiNode, RpcError> + Send + Sync,
{
    fn get(&self) -> Result<ApiNode, RpcError> {
        (self.0)()
    }
}

impl From<WireValue> for ApiNode {
    fn from(value: WireValue) -> Self {
        ApiNode::Value(value)
    }
}

impl From<f64> for ApiNode {
    fn from(value: f64) -> Self {
        ApiNode::Value(WireValue::Number(value))
    }
}

impl From<i64> for ApiNode {
    fn from(value: i64) -> Self {
        ApiNode::Value(WireValue::Number(value as f64))
    }
}

impl From<i32> for ApiNode {
    fn from(value: i32) -> Self {
        ApiNode::Value(WireValue::Number(value as f64))
    }
}

impl From<bool> for ApiNode {
    fn from(value: bool) -> Self {
        ApiNode::Value(WireValue::Bool(value))
    }
}

impl From<&str> for ApiNode {
    fn from(value: &str) -> Self {
        ApiNode::Value(WireValue::String(value.to_string()))
    }
}

impl From<String> for ApiNode {
    fn from(value: String) -> Self {
        ApiNode::Value(WireValue::String(value))
    }
}

impl From<Arc<ApiObject>> for ApiNode {
    fn from(obj: Arc<ApiObject>) -> Self {
        ApiNode::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: i64) -> ApiNode {
        ApiNode::from(n)
    }

    #[test]
    fn test_insert_and_get() {
        let obj = ApiObject::new();
        obj.insert("a", 1i64);
        obj.insert("b", "two");

        match obj.get("a") {
            Some(ApiNode::Value(v)) => assert_eq!(v.as_f64(), Some(1.0)),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let obj = ApiObject::new();
        obj.insert("a", 1i64);
        obj.insert("a", 2i64);
        assert_eq!(obj.readable_keys(), vec!["a"]);
        match obj.get("a") {
            Some(ApiNode::Value(v)) => assert_eq!(v.as_f64(), Some(2.0)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_getter_is_readable_and_failure_reads_absent() {
        let obj = ApiObject::new();
        obj.insert_getter("ok", FnGetter(|| Ok(leaf(7))));
        obj.insert_getter("broken", FnGetter(|| Err(RpcError::app("getter boom"))));

        assert!(obj.get("ok").is_some());
        assert!(obj.get("broken").is_none());
        assert_eq!(obj.readable_keys(), vec!["ok", "broken"]);
    }

    #[test]
    fn test_proto_chain_lookup() {
        let proto = ApiObject::new();
        proto.insert("method", ApiNode::func_sync(|_| Ok(ApiNode::from(1i64))));
        proto.insert("data", 5i64);
        proto.insert_getter("computed", FnGetter(|| Ok(leaf(9))));

        let obj = ApiObject::with_proto(proto);
        obj.insert("own", 1i64);

        // Normal access reaches everything on the chain.
        assert!(obj.get("method").is_some());
        assert!(obj.get("data").is_some());
        assert!(obj.get("computed").is_some());

        // Snapshots read own members plus inherited getters only.
        assert_eq!(obj.readable_keys(), vec!["own", "computed"]);

        // Function collection additionally sees inherited methods.
        assert_eq!(obj.collect_keys(), vec!["own", "computed", "method"]);
    }

    #[test]
    fn test_get_deep_walks_objects_and_lists() {
        let inner = ApiObject::new();
        inner.insert("x", 42i64);
        let root_obj = ApiObject::new();
        root_obj.insert("nested", inner);
        root_obj.insert("arr", ApiNode::list(vec![leaf(10), leaf(11)]));
        let root = ApiNode::Object(root_obj);

        assert!(matches!(get_deep(&root, ""), Some(ApiNode::Object(_))));
        match get_deep(&root, "nested.x") {
            Some(ApiNode::Value(v)) => assert_eq!(v.as_f64(), Some(42.0)),
            other => panic!("unexpected: {:?}", other),
        }
        match get_deep(&root, "arr.1") {
            Some(ApiNode::Value(v)) => assert_eq!(v.as_f64(), Some(11.0)),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(get_deep(&root, "nested.missing.x").is_none());
        assert!(get_deep(&root, "arr.9").is_none());
        assert!(get_deep(&root, "arr.x").is_none());
    }

    #[test]
    fn test_cycle_construction_and_lookup() {
        let root_obj = ApiObject::new();
        root_obj.insert("a", 1i64);
        root_obj.insert("selfref", root_obj.clone());
        let root = ApiNode::Object(root_obj);

        match get_deep(&root, "selfref.selfref.selfref.a") {
            Some(ApiNode::Value(v)) => assert_eq!(v.as_f64(), Some(1.0)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_native_function_invocation() {
        let f = ApiNode::func(|args: Vec<WireValue>| async move {
            let n = args
                .first()
                .and_then(|v| v.as_f64())
                .ok_or_else(|| RpcError::app("expected a number"))?;
            Ok(ApiNode::from(n + 1.0))
        });
        match f {
            ApiNode::Function(func) => {
                let out = func.call(vec![WireValue::from(1)]).await.unwrap();
                match out {
                    ApiNode::Value(v) => assert_eq!(v.as_f64(), Some(2.0)),
                    other => panic!("unexpected: {:?}", other),
                }
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
