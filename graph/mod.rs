/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Dependency graph of a page load.
//!
//! Core structures:
//! - `DependencyGraph`: DAG backed by petgraph::StableGraph; an edge `a -> b`
//!   means `b` cannot start before `a` finishes
//! - `GraphNode`: network request or main-thread CPU task, with its observed timing
//! - `clone_with_filter`: pruned, independent copies for per-metric simulation

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};

use crate::network::{InitiatorType, NetworkRequest, ResourceType};
use crate::tasks::TaskId;
use crate::trace::TraceEvent;

pub mod builder;

pub use builder::build_page_dependency_graph;

/// Stable node handle (petgraph NodeIndex, insertion ordered).
pub type NodeKey = NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum NodeKind {
    Network,
    Cpu,
}

/// A main-thread task as seen by the graph: the top-level event and every
/// event nested below it.
#[derive(Debug, Clone)]
pub struct CpuTask {
    pub task: TaskId,
    pub event: TraceEvent,
    pub child_events: Vec<TraceEvent>,
}

impl CpuTask {
    fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        std::iter::once(&self.event).chain(self.child_events.iter())
    }

    /// URLs of scripts evaluated anywhere in this task.
    pub fn evaluated_urls(&self) -> BTreeSet<&str> {
        self.events()
            .filter(|event| event.name == "EvaluateScript")
            .filter_map(TraceEvent::url)
            .collect()
    }

    pub fn is_script_evaluation(&self) -> bool {
        self.events().any(|event| event.name == "EvaluateScript")
    }

    pub fn did_perform_layout(&self) -> bool {
        self.events().any(|event| event.name == "Layout")
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Network(Arc<NetworkRequest>),
    Cpu(Arc<CpuTask>),
}

/// A graph node with its as-observed timing, in trace microseconds.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub data: NodeData,
}

impl GraphNode {
    pub fn network(request: NetworkRequest) -> Self {
        Self {
            id: request.request_id.clone(),
            start_time: request.start_time,
            end_time: request.end_time,
            data: NodeData::Network(Arc::new(request)),
        }
    }

    pub fn cpu(id: String, task: CpuTask) -> Self {
        Self {
            id,
            start_time: task.event.ts,
            end_time: task.event.end_ts(),
            data: NodeData::Cpu(Arc::new(task)),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Network(_) => NodeKind::Network,
            NodeData::Cpu(_) => NodeKind::Cpu,
        }
    }

    pub fn request(&self) -> Option<&NetworkRequest> {
        match &self.data {
            NodeData::Network(request) => Some(request.as_ref()),
            NodeData::Cpu(_) => None,
        }
    }

    pub fn cpu_task(&self) -> Option<&CpuTask> {
        match &self.data {
            NodeData::Cpu(task) => Some(task.as_ref()),
            NodeData::Network(_) => None,
        }
    }

    /// Observed duration, milliseconds.
    pub fn duration_ms(&self) -> f64 {
        ((self.end_time - self.start_time) / 1000.0).max(0.0)
    }

    pub fn has_render_blocking_priority(&self) -> bool {
        self.request()
            .is_some_and(NetworkRequest::has_render_blocking_priority)
    }

    pub fn initiator_type(&self) -> Option<InitiatorType> {
        self.request().map(|request| request.initiator_type)
    }

    pub fn resource_type(&self) -> Option<ResourceType> {
        self.request().map(|request| request.resource_type)
    }

    pub fn is_evaluate_script_for(&self, urls: &BTreeSet<String>) -> bool {
        self.cpu_task().is_some_and(|task| {
            task.is_script_evaluation()
                && task
                    .evaluated_urls()
                    .into_iter()
                    .any(|url| urls.contains(url))
        })
    }

    pub fn did_perform_layout(&self) -> bool {
        self.cpu_task().is_some_and(CpuTask::did_perform_layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The edge would close a cycle; the graph is left unchanged.
    CyclicDependency { from: String, to: String },
    /// The root is the navigation request and never waits on anything.
    DependencyOnRoot { from: String },
    UnknownNode,
    /// The request list has no finished document request to root the graph at.
    NoRootRequest,
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::CyclicDependency { from, to } => {
                write!(f, "Dependency {from} -> {to} would create a cycle")
            }
            GraphError::DependencyOnRoot { from } => {
                write!(f, "Root node cannot depend on {from}")
            }
            GraphError::UnknownNode => write!(f, "Node is not part of this graph"),
            GraphError::NoRootRequest => write!(f, "No main document request to root the graph"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Directed acyclic graph of network and CPU work. The first node added is the root.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    inner: StableGraph<GraphNode, (), Directed>,
    root: Option<NodeKey>,
    id_to_node: HashMap<String, NodeKey>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Ids are expected to be unique; lookups by id resolve to the
    /// first node added with a given id.
    pub fn add_node(&mut self, node: GraphNode) -> NodeKey {
        let id = node.id.clone();
        let key = self.inner.add_node(node);
        self.id_to_node.entry(id).or_insert(key);
        if self.root.is_none() {
            self.root = Some(key);
        }
        key
    }

    /// Record that `to` cannot start before `from` finishes.
    pub fn add_dependency(&mut self, from: NodeKey, to: NodeKey) -> Result<(), GraphError> {
        if !self.inner.contains_node(from) || !self.inner.contains_node(to) {
            return Err(GraphError::UnknownNode);
        }
        if self.inner.find_edge(from, to).is_some() {
            return Ok(());
        }
        if from == to || has_path_connecting(&self.inner, to, from, None) {
            return Err(GraphError::CyclicDependency {
                from: self.inner[from].id.clone(),
                to: self.inner[to].id.clone(),
            });
        }
        if Some(to) == self.root {
            return Err(GraphError::DependencyOnRoot {
                from: self.inner[from].id.clone(),
            });
        }
        self.inner.add_edge(from, to, ());
        Ok(())
    }

    pub fn root(&self) -> Option<NodeKey> {
        self.root
    }

    pub fn is_root(&self, key: NodeKey) -> bool {
        self.root == Some(key)
    }

    pub fn get_node(&self, key: NodeKey) -> Option<&GraphNode> {
        self.inner.node_weight(key)
    }

    pub fn get_node_by_id(&self, id: &str) -> Option<(NodeKey, &GraphNode)> {
        let key = *self.id_to_node.get(id)?;
        Some((key, self.inner.node_weight(key)?))
    }

    /// Iterate over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &GraphNode)> {
        self.inner
            .node_indices()
            .map(move |idx| (idx, &self.inner[idx]))
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn has_edge_between(&self, from: NodeKey, to: NodeKey) -> bool {
        self.inner.find_edge(from, to).is_some()
    }

    /// Nodes `key` waits on, in the order the edges were added.
    pub fn dependencies(&self, key: NodeKey) -> Vec<NodeKey> {
        self.neighbors_in_edge_order(key, Direction::Incoming)
    }

    /// Nodes waiting on `key`, in the order the edges were added.
    pub fn dependents(&self, key: NodeKey) -> Vec<NodeKey> {
        self.neighbors_in_edge_order(key, Direction::Outgoing)
    }

    fn neighbors_in_edge_order(&self, key: NodeKey, direction: Direction) -> Vec<NodeKey> {
        let mut edges: Vec<_> = self
            .inner
            .edges_directed(key, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (edge.id(), other)
            })
            .collect();
        edges.sort_by_key(|(edge, _)| *edge);
        edges.into_iter().map(|(_, other)| other).collect()
    }

    /// Every node `key` transitively waits on.
    pub fn ancestors(&self, key: NodeKey) -> Vec<NodeKey> {
        self.walk(key, Direction::Incoming)
    }

    /// Every node transitively waiting on `key`.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        self.walk(key, Direction::Outgoing)
    }

    /// Breadth-first walk excluding `start`, returned in insertion order.
    fn walk(&self, start: NodeKey, direction: Direction) -> Vec<NodeKey> {
        let mut seen: HashSet<NodeKey> = HashSet::new();
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in self.inner.neighbors_directed(current, direction) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.remove(&start);
        let mut out: Vec<NodeKey> = seen.into_iter().collect();
        out.sort();
        out
    }

    pub fn find_all<F>(&self, mut predicate: F) -> Vec<NodeKey>
    where
        F: FnMut(NodeKey, &GraphNode) -> bool,
    {
        self.nodes()
            .filter(|(key, node)| predicate(*key, node))
            .map(|(key, _)| key)
            .collect()
    }

    /// Nodes that cannot be reached from the root, in insertion order.
    pub fn unreachable_from_root(&self) -> Vec<NodeKey> {
        let Some(root) = self.root else {
            return self.inner.node_indices().collect();
        };
        let reachable: HashSet<NodeKey> = self
            .descendants(root)
            .into_iter()
            .chain(std::iter::once(root))
            .collect();
        self.inner
            .node_indices()
            .filter(|key| !reachable.contains(key))
            .collect()
    }

    /// Build a new, independent graph keeping the nodes `predicate` accepts.
    ///
    /// The root always survives. Only nodes reachable from the root are
    /// considered. Each surviving node depends on its nearest surviving
    /// ancestors, so every edge of the clone stands for a path in `self`.
    pub fn clone_with_filter<F>(&self, mut predicate: F) -> DependencyGraph
    where
        F: FnMut(NodeKey, &GraphNode) -> bool,
    {
        let mut clone = DependencyGraph::new();
        let Some(root) = self.root else {
            return clone;
        };

        let unreachable: HashSet<NodeKey> = self.unreachable_from_root().into_iter().collect();
        let mut mapping: HashMap<NodeKey, NodeKey> = HashMap::new();
        for (key, node) in self.nodes() {
            if unreachable.contains(&key) {
                continue;
            }
            if key == root || predicate(key, node) {
                mapping.insert(key, clone.add_node(node.clone()));
            }
        }

        let mut survivors: Vec<NodeKey> = mapping.keys().copied().collect();
        survivors.sort();
        for key in survivors {
            for ancestor in self.nearest_surviving_ancestors(key, &mapping) {
                clone.inner.add_edge(mapping[&ancestor], mapping[&key], ());
            }
        }

        log::debug!(
            "cloned graph: kept {} of {} nodes, {} edges",
            clone.node_count(),
            self.node_count(),
            clone.edge_count()
        );
        clone
    }

    fn nearest_surviving_ancestors(
        &self,
        key: NodeKey,
        survivors: &HashMap<NodeKey, NodeKey>,
    ) -> Vec<NodeKey> {
        let mut found: BTreeSet<NodeKey> = BTreeSet::new();
        let mut visited: HashSet<NodeKey> = HashSet::new();
        let mut stack = self.dependencies(key);
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if survivors.contains_key(&current) {
                found.insert(current);
            } else {
                stack.extend(self.dependencies(current));
            }
        }
        found.into_iter().collect()
    }
}
