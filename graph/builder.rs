/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Canonical dependency graph construction from a task forest and the
//! observed request list.
//!
//! Edges are inferred from initiator metadata and trace events, so every one
//! of them goes through the cycle-checked `add_dependency`.

use std::collections::HashMap;

use super::{CpuTask, DependencyGraph, GraphError, GraphNode, NodeData, NodeKey};
use crate::network::{NetworkRequest, ResourceType};
use crate::tasks::{TaskForest, TaskId};

/// Top-level tasks shorter than this only become CPU nodes if they link to
/// other work.
const MINIMUM_TASK_DURATION_MS: f64 = 10.0;

const LINKING_EVENT_NAMES: &[&str] = &[
    "EvaluateScript",
    "FunctionCall",
    "ParseHTML",
    "ParseAuthorStyleSheet",
    "XHRReadyStateChange",
    "XHRLoad",
    "ResourceSendRequest",
    "TimerInstall",
    "TimerFire",
    "Layout",
];

#[derive(Default)]
struct NetworkIndex {
    by_url: HashMap<String, Vec<NodeKey>>,
    by_request_id: HashMap<String, NodeKey>,
}

impl NetworkIndex {
    fn insert(&mut self, request: &NetworkRequest, key: NodeKey) {
        self.by_url.entry(request.url.clone()).or_default().push(key);
        self.by_request_id
            .entry(request.request_id.clone())
            .or_insert(key);
    }

    /// Latest-started request for `url` that had finished by `time`.
    fn finished_before(&self, graph: &DependencyGraph, url: &str, time: f64) -> Option<NodeKey> {
        self.by_url
            .get(url)?
            .iter()
            .rev()
            .copied()
            .find(|key| graph.get_node(*key).is_some_and(|node| node.end_time <= time))
    }

    /// First request for `url` that started strictly before `time`.
    fn started_before(&self, graph: &DependencyGraph, url: &str, time: f64) -> Option<NodeKey> {
        self.by_url
            .get(url)?
            .iter()
            .copied()
            .find(|key| graph.get_node(*key).is_some_and(|node| node.start_time < time))
    }
}

/// Build the canonical dependency graph for one page load.
///
/// Unfinished and `data:` requests are skipped. The earliest-started document
/// request becomes the root.
pub fn build_page_dependency_graph(
    forest: &TaskForest,
    requests: &[NetworkRequest],
) -> Result<DependencyGraph, GraphError> {
    let mut records: Vec<&NetworkRequest> = requests
        .iter()
        .filter(|request| request.finished && !request.is_data_uri())
        .collect();
    records.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let root_position = records
        .iter()
        .position(|request| request.resource_type == ResourceType::Document)
        .ok_or(GraphError::NoRootRequest)?;
    let root_request = records.remove(root_position);

    let mut graph = DependencyGraph::new();
    let mut network = NetworkIndex::default();
    let root = graph.add_node(GraphNode::network(root_request.clone()));
    network.insert(root_request, root);

    let mut network_keys = Vec::with_capacity(records.len());
    for request in records {
        let key = graph.add_node(GraphNode::network(request.clone()));
        network.insert(request, key);
        network_keys.push(key);
    }

    let cpu_keys = add_cpu_nodes(&mut graph, forest, root_request.start_time);

    link_network_nodes(&mut graph, &network, &network_keys, root)?;
    link_cpu_nodes(&mut graph, &network, &cpu_keys, root)?;

    log::debug!(
        "built dependency graph: {} network nodes, {} cpu nodes, {} edges",
        network_keys.len() + 1,
        cpu_keys.len(),
        graph.edge_count()
    );
    Ok(graph)
}

fn add_cpu_nodes(graph: &mut DependencyGraph, forest: &TaskForest, not_before: f64) -> Vec<NodeKey> {
    let mut keys = Vec::new();
    for &id in forest.roots() {
        let Some(task) = forest.get(id) else {
            continue;
        };
        if task.start_time < not_before {
            continue;
        }
        let child_events = forest
            .descendants(id)
            .into_iter()
            .filter_map(|child| forest.get(child))
            .map(|child| child.event.clone())
            .collect::<Vec<_>>();
        let links_other_work = std::iter::once(&task.event)
            .chain(child_events.iter())
            .any(|event| LINKING_EVENT_NAMES.contains(&event.name.as_str()));
        if task.duration < MINIMUM_TASK_DURATION_MS && !links_other_work {
            continue;
        }

        let mut event = task.event.clone();
        // Overlap resolution may have shortened the task; the node carries the
        // resolved range.
        event.dur = Some(task.end_time - task.start_time);
        let node = GraphNode::cpu(
            cpu_node_id(task.event.tid, id),
            CpuTask {
                task: id,
                event,
                child_events,
            },
        );
        keys.push(graph.add_node(node));
    }
    keys
}

fn cpu_node_id(tid: i64, task: TaskId) -> String {
    format!("{tid}.{}", task.index())
}

fn link_network_nodes(
    graph: &mut DependencyGraph,
    network: &NetworkIndex,
    network_keys: &[NodeKey],
    root: NodeKey,
) -> Result<(), GraphError> {
    for &key in network_keys {
        let Some(node) = graph.get_node(key) else {
            continue;
        };
        let start_time = node.start_time;
        let initiator_url = node
            .request()
            .and_then(|request| request.initiator_url.clone());

        let initiator = initiator_url
            .as_deref()
            .and_then(|url| network.started_before(graph, url, start_time))
            .filter(|initiator| *initiator != key);
        if initiator.is_none()
            && let Some(url) = &initiator_url
        {
            log::debug!("initiator {url} of request {} not in graph, using root", node.id);
        }
        graph.add_dependency(initiator.unwrap_or(root), key)?;
    }
    Ok(())
}

fn link_cpu_nodes(
    graph: &mut DependencyGraph,
    network: &NetworkIndex,
    cpu_keys: &[NodeKey],
    root: NodeKey,
) -> Result<(), GraphError> {
    let mut timer_installers: HashMap<String, NodeKey> = HashMap::new();

    for &cpu_key in cpu_keys {
        let Some(NodeData::Cpu(task)) = graph.get_node(cpu_key).map(|node| node.data.clone()) else {
            continue;
        };
        let cpu_start = task.event.ts;

        for event in task.events() {
            match event.name.as_str() {
                "EvaluateScript" | "FunctionCall" | "XHRReadyStateChange" | "XHRLoad"
                | "ParseHTML" | "ParseAuthorStyleSheet" => {
                    if let Some(url) = event.url()
                        && let Some(fetch) = network.finished_before(graph, url, cpu_start)
                    {
                        graph.add_dependency(fetch, cpu_key)?;
                    }
                }
                "ResourceSendRequest" => {
                    let sent = event
                        .data_str("requestId")
                        .and_then(|id| network.by_request_id.get(id))
                        .copied()
                        .filter(|key| *key != root)
                        .filter(|key| {
                            graph
                                .get_node(*key)
                                .is_some_and(|node| node.start_time >= cpu_start)
                        });
                    if let Some(sent) = sent {
                        graph.add_dependency(cpu_key, sent)?;
                    }
                }
                "TimerInstall" => {
                    if let Some(timer_id) = event.data_str("timerId") {
                        timer_installers.insert(timer_id.to_string(), cpu_key);
                    }
                }
                "TimerFire" => {
                    let installer = event
                        .data_str("timerId")
                        .and_then(|timer_id| timer_installers.get(timer_id))
                        .copied()
                        .filter(|installer| *installer != cpu_key);
                    if let Some(installer) = installer {
                        graph.add_dependency(installer, cpu_key)?;
                    }
                }
                _ => {}
            }
        }

        if graph.dependencies(cpu_key).is_empty() {
            graph.add_dependency(root, cpu_key)?;
        }
    }
    Ok(())
}
