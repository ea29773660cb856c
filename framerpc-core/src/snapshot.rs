//! Value snapshots. A capture walks the API tree breadth-first and produces
//! two artifacts at once: a function-free value graph and the set of dotted
//! paths at which functions live. Walking once means every getter is
//! evaluated exactly once, and the first path recorded for a shared node is
//! also its shortest.
//!
//! The graph is the wire stand-in for a structured clone: sharing and
//! cycles survive as repeated node references, so traversal of a received
//! snapshot always terminates.

use crate::api::{get_deep as api_get_deep, ApiNode};
use crate::ids::NodeId;
use crate::path;
use crate::value::WireValue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "camelCase")]
pub enum SnapshotNode {
    /// Primitive or pass-through built-in.
    Leaf(WireValue),
    List(Vec<NodeId>),
    /// Entries in discovery order.
    Record(Vec<(String, NodeId)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotGraph {
    pub nodes: Vec<SnapshotNode>,
    pub root: NodeId,
}

/// A captured API tree: its value graph plus every reachable function path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub graph: SnapshotGraph,
    pub functions: Vec<String>,
}

impl SnapshotGraph {
    /// A graph holding a single leaf value.
    pub fn leaf(value: WireValue) -> Self {
        SnapshotGraph {
            nodes: vec![SnapshotNode::Leaf(value)],
            root: NodeId(0),
        }
    }

    pub fn empty_record() -> Self {
        SnapshotGraph {
            nodes: vec![SnapshotNode::Record(Vec::new())],
            root: NodeId(0),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&SnapshotNode> {
        self.nodes.get(id.as_usize())
    }

    /// The root value when the whole graph is a single leaf.
    pub fn root_leaf(&self) -> Option<&WireValue> {
        match self.node(self.root) {
            Some(SnapshotNode::Leaf(v)) => Some(v),
            _ => None,
        }
    }

    /// Deep read by dotted path. Returns `None` on any missing
    /// intermediate; the empty path returns the root.
    pub fn get_deep(&self, dotted: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path::segments(dotted) {
            current = match self.node(current)? {
                SnapshotNode::Record(entries) => {
                    entries.iter().find(|(k, _)| k == segment).map(|(_, id)| *id)?
                }
                SnapshotNode::List(items) => {
                    let idx = path::as_index(segment)?;
                    items.get(idx).copied()?
                }
                SnapshotNode::Leaf(_) => return None,
            };
        }
        Some(current)
    }

    /// Children of a node in stored order, with the path segment reaching
    /// each.
    fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        match self.node(id) {
            Some(SnapshotNode::Record(entries)) => entries.clone(),
            Some(SnapshotNode::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, c)| (i.to_string(), *c))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Map every node to the first path at which a breadth-first walk from
    /// the root discovers it. First-discovered is shortest; alias paths
    /// arising from sharing or cycles translate through this index.
    pub fn canonical_index(&self) -> HashMap<NodeId, String> {
        let mut index = HashMap::new();
        let mut queue = VecDeque::new();
        index.insert(self.root, String::new());
        queue.push_back((self.root, String::new()));

        while let Some((id, prefix)) = queue.pop_front() {
            for (segment, child) in self.children(id) {
                if !index.contains_key(&child) {
                    let child_path = path::join(&prefix, &segment);
                    index.insert(child, child_path.clone());
                    queue.push_back((child, child_path));
                }
            }
        }
        index
    }
}

impl Snapshot {
    /// Capture an API tree. Functions are omitted from the value graph
    /// (list slots keep a null placeholder so indices stay aligned) and
    /// their dotted paths are collected instead. Getters are evaluated
    /// once; a failing getter omits its key from both artifacts.
    pub fn capture(root: &ApiNode) -> Snapshot {
        let mut builder = Builder::default();
        let root_id = match root {
            ApiNode::Function(_) => builder.alloc(SnapshotNode::Leaf(WireValue::Null)),
            other => builder.discover(other, String::new()),
        };
        builder.run();
        Snapshot {
            graph: SnapshotGraph {
                nodes: builder.nodes,
                root: root_id,
            },
            functions: builder.functions,
        }
    }

    pub fn has_functions(&self) -> bool {
        !self.functions.is_empty()
    }
}

#[derive(Default)]
struct Builder {
    nodes: Vec<SnapshotNode>,
    functions: Vec<String>,
    seen: HashMap<usize, NodeId>,
    queue: VecDeque<(ApiNode, NodeId, String)>,
}

impl Builder {
    fn alloc(&mut self, node: SnapshotNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Resolve a composite or leaf node to a graph id, enqueueing
    /// first-seen composites for filling. Shared composites map to the
    /// same id, which is what preserves aliasing and cycles.
    fn discover(&mut self, node: &ApiNode, at: String) -> NodeId {
        if let Some(identity) = node.identity() {
            if let Some(&existing) = self.seen.get(&identity) {
                return existing;
            }
            let placeholder = match node {
                ApiNode::Object(_) => SnapshotNode::Record(Vec::new()),
                _ => SnapshotNode::List(Vec::new()),
            };
            let id = self.alloc(placeholder);
            self.seen.insert(identity, id);
            self.queue.push_back((node.clone(), id, at));
            id
        } else {
            match node {
                ApiNode::Value(v) => self.alloc(SnapshotNode::Leaf(v.clone())),
                // Callers filter functions out before discovery; a bare
                // function degrades to a null leaf.
                _ => self.alloc(SnapshotNode::Leaf(WireValue::Null)),
            }
        }
    }

    fn run(&mut self) {
        while let Some((node, id, prefix)) = self.queue.pop_front() {
            match node {
                ApiNode::Object(obj) => {
                    let mut entries = Vec::new();
                    for key in obj.collect_keys() {
                        let member = match obj.get(&key) {
                            Some(m) => m,
                            None => continue,
                        };
                        if member.is_function() {
                            self.functions.push(path::join(&prefix, &key));
                            continue;
                        }
                        let child = self.discover(&member, path::join(&prefix, &key));
                        entries.push((key, child));
                    }
                    self.nodes[id.as_usize()] = SnapshotNode::Record(entries);
                }
                ApiNode::List(items) => {
                    let items = items.read().expect("api list poisoned").clone();
                    let mut children = Vec::new();
                    for (idx, member) in items.iter().enumerate() {
                        let at = path::join(&prefix, &idx.to_string());
                        if member.is_function() {
                            self.functions.push(at);
                            children.push(self.alloc(SnapshotNode::Leaf(WireValue::Null)));
                            continue;
                        }
                        children.push(self.discover(member, at));
                    }
                    self.nodes[id.as_usize()] = SnapshotNode::List(children);
                }
                _ => {}
            }
        }
    }
}

/// True for function paths reachable in the live tree, the invariant a
/// captured path set must satisfy.
pub fn resolves_to_function(root: &ApiNode, dotted: &str) -> bool {
    matches!(api_get_deep(root, dotted), Some(ApiNode::Function(_)))
}

/// Collect a visited-set over path-addressable identity for checking that
/// traversal of shared structures terminates.
pub fn reachable_node_count(graph: &SnapshotGraph) -> usize {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([graph.root]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        for (_, child) in graph.children(id) {
            queue.push_back(child);
        }
    }
    seen.len()
}
