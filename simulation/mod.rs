/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Resource-constrained replay of a dependency graph.
//!
//! A discrete-event simulation over two kinds of resources: per-origin
//! connection pools shared by network nodes and a single CPU lane for compute
//! nodes. Bandwidth is split evenly between the requests that are
//! downloading at any moment. Simulated time starts at zero when the root
//! becomes eligible and is reported in milliseconds.
//!
//! Waiting nodes are served in the order they became eligible. Network nodes
//! that became eligible together go highest priority first; remaining ties
//! fall back to graph insertion order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use crate::config::{ConfigError, SimulationSettings};
use crate::graph::{DependencyGraph, GraphNode, NodeData, NodeKey, NodeKind};
use crate::network::{NetworkRequest, RequestPriority};

mod connection_pool;

use connection_pool::{ConnectionHandle, ConnectionPool};

const EPSILON_MS: f64 = 1e-9;
const EPSILON_BYTES: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NodeTiming {
    #[serde(skip)]
    pub key: NodeKey,
    pub id: String,
    pub kind: NodeKind,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl NodeTiming {
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SimulationResult {
    /// Latest completion over all nodes.
    pub completion_ms: f64,
    /// One entry per node, in graph insertion order.
    pub node_timings: Vec<NodeTiming>,
}

impl SimulationResult {
    pub fn timing_for(&self, id: &str) -> Option<&NodeTiming> {
        self.node_timings.iter().find(|timing| timing.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// The graph has no root, or some node cannot be reached from it.
    EmptyOrDisconnectedGraph { unreachable_nodes: usize },
    InvalidSettings(ConfigError),
    /// Remaining work stopped being a finite quantity.
    Stalled { rounds: usize },
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::EmptyOrDisconnectedGraph { unreachable_nodes } => write!(
                f,
                "Graph is empty or disconnected ({unreachable_nodes} nodes unreachable from root)"
            ),
            SimulationError::InvalidSettings(err) => write!(f, "Cannot simulate: {err}"),
            SimulationError::Stalled { rounds } => {
                write!(f, "Simulation stalled after {rounds} rounds")
            }
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::InvalidSettings(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Work {
    Cpu { remaining_ms: f64 },
    Latency { remaining_ms: f64, bytes: f64 },
    Transfer { remaining_bytes: f64 },
}

#[derive(Debug)]
struct InFlight {
    order: usize,
    work: Work,
    connection: Option<ConnectionHandle>,
}

#[derive(Debug, Clone)]
pub struct Simulator {
    settings: SimulationSettings,
}

impl Simulator {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn simulate(&self, graph: &DependencyGraph) -> Result<SimulationResult, SimulationError> {
        self.settings
            .validate()
            .map_err(SimulationError::InvalidSettings)?;
        let unreachable = graph.unreachable_from_root();
        if graph.root().is_none() || !unreachable.is_empty() {
            return Err(SimulationError::EmptyOrDisconnectedGraph {
                unreachable_nodes: unreachable.len(),
            });
        }

        let nodes: Vec<(NodeKey, &GraphNode)> = graph.nodes().collect();
        let order_of: HashMap<NodeKey, usize> = nodes
            .iter()
            .enumerate()
            .map(|(order, (key, _))| (*key, order))
            .collect();
        let mut pending_dependencies: Vec<usize> = nodes
            .iter()
            .map(|(key, _)| graph.dependencies(*key).len())
            .collect();
        let dependents: Vec<Vec<usize>> = nodes
            .iter()
            .map(|(key, _)| {
                graph
                    .dependents(*key)
                    .iter()
                    .filter_map(|dependent| order_of.get(dependent).copied())
                    .collect()
            })
            .collect();
        let origins: Vec<Option<String>> = nodes
            .iter()
            .map(|(_, node)| node.request().map(NetworkRequest::connection_key))
            .collect();

        let mut queue = EligibleQueue::default();
        for (order, (_, node)) in nodes.iter().enumerate() {
            if pending_dependencies[order] == 0 {
                queue.push(0.0, order, node);
            }
        }

        let mut pool = ConnectionPool::new(self.settings.max_concurrent_connections_per_origin);
        let mut start_ms: Vec<Option<f64>> = vec![None; nodes.len()];
        let mut end_ms: Vec<Option<f64>> = vec![None; nodes.len()];
        let mut in_flight: Vec<InFlight> = Vec::new();
        let mut cpu_busy = false;
        let mut now = 0.0_f64;
        let mut rounds = 0usize;

        loop {
            if !cpu_busy && let Some((_, order)) = queue.cpu.pop_first() {
                cpu_busy = true;
                start_ms[order] = Some(now);
                in_flight.push(InFlight {
                    order,
                    work: Work::Cpu {
                        remaining_ms: nodes[order].1.duration_ms()
                            * self.settings.cpu_slowdown_multiplier,
                    },
                    connection: None,
                });
            }

            let mut admitted = Vec::new();
            for entry in &queue.network {
                let (_, _, order) = *entry;
                let Some(origin) = origins[order].as_deref() else {
                    continue;
                };
                if let Some(connection) = pool.acquire(origin) {
                    admitted.push((*entry, connection));
                }
            }
            for (entry, connection) in admitted {
                queue.network.remove(&entry);
                let (_, _, order) = entry;
                start_ms[order] = Some(now);
                in_flight.push(InFlight {
                    order,
                    work: self.network_work(nodes[order].1, connection.warm),
                    connection: Some(connection),
                });
            }
            in_flight.sort_by_key(|flight| flight.order);

            if in_flight.is_empty() {
                break;
            }
            rounds += 1;

            let downloading = in_flight
                .iter()
                .filter(|flight| matches!(flight.work, Work::Transfer { .. }))
                .count();
            let bytes_per_ms = self.bytes_per_ms_per_request(downloading);

            let step = in_flight
                .iter()
                .map(|flight| match flight.work {
                    Work::Cpu { remaining_ms } | Work::Latency { remaining_ms, .. } => remaining_ms,
                    Work::Transfer { remaining_bytes } => match bytes_per_ms {
                        Some(rate) => remaining_bytes / rate,
                        None => 0.0,
                    },
                })
                .fold(f64::INFINITY, f64::min)
                .max(0.0);
            if !step.is_finite() {
                log::warn!("simulation stalled at {now}ms with {} nodes in flight", in_flight.len());
                return Err(SimulationError::Stalled { rounds });
            }
            now += step;

            let mut finished = Vec::new();
            for flight in &mut in_flight {
                flight.work = match flight.work {
                    Work::Cpu { remaining_ms } => Work::Cpu {
                        remaining_ms: remaining_ms - step,
                    },
                    Work::Latency {
                        remaining_ms,
                        bytes,
                    } => {
                        let remaining_ms = remaining_ms - step;
                        if remaining_ms <= EPSILON_MS {
                            Work::Transfer {
                                remaining_bytes: if bytes_per_ms_available(&self.settings) {
                                    bytes
                                } else {
                                    0.0
                                },
                            }
                        } else {
                            Work::Latency {
                                remaining_ms,
                                bytes,
                            }
                        }
                    }
                    Work::Transfer { remaining_bytes } => Work::Transfer {
                        remaining_bytes: match bytes_per_ms {
                            Some(rate) => remaining_bytes - rate * step,
                            None => 0.0,
                        },
                    },
                };
                let done = match flight.work {
                    Work::Cpu { remaining_ms } => remaining_ms <= EPSILON_MS,
                    Work::Latency { .. } => false,
                    Work::Transfer { remaining_bytes } => remaining_bytes <= EPSILON_BYTES,
                };
                if done {
                    finished.push(flight.order);
                }
            }

            in_flight.retain_mut(|flight| {
                if !finished.contains(&flight.order) {
                    return true;
                }
                match flight.connection.take() {
                    Some(connection) => pool.release(connection),
                    None => cpu_busy = false,
                }
                false
            });

            for order in finished {
                end_ms[order] = Some(now);
                for &dependent in &dependents[order] {
                    pending_dependencies[dependent] -= 1;
                    if pending_dependencies[dependent] == 0 {
                        queue.push(now, dependent, nodes[dependent].1);
                    }
                }
            }
        }

        let mut node_timings = Vec::with_capacity(nodes.len());
        for (order, (key, node)) in nodes.iter().enumerate() {
            let (Some(start), Some(end)) = (start_ms[order], end_ms[order]) else {
                return Err(SimulationError::EmptyOrDisconnectedGraph {
                    unreachable_nodes: end_ms.iter().filter(|end| end.is_none()).count(),
                });
            };
            node_timings.push(NodeTiming {
                key: *key,
                id: node.id.clone(),
                kind: node.kind(),
                start_ms: start,
                end_ms: end,
            });
        }
        let completion_ms = node_timings
            .iter()
            .map(|timing| timing.end_ms)
            .fold(0.0, f64::max);

        log::debug!(
            "simulated {} nodes in {rounds} rounds, completion {completion_ms:.1}ms",
            node_timings.len()
        );
        Ok(SimulationResult {
            completion_ms,
            node_timings,
        })
    }

    /// Cold connections pay a TCP handshake round trip, plus one more for TLS.
    /// Every request then pays a request round trip and the server's response
    /// time before its bytes start flowing.
    fn network_work(&self, node: &GraphNode, warm: bool) -> Work {
        let NodeData::Network(request) = &node.data else {
            return Work::Cpu { remaining_ms: 0.0 };
        };
        let rtt = self.settings.round_trip_time_ms;
        let handshake_ms = match (warm, request.is_secure()) {
            (true, _) => 0.0,
            (false, true) => rtt * 2.0,
            (false, false) => rtt,
        };
        let server_ms = request
            .server_response_time_ms
            .unwrap_or_else(|| request.duration_ms());
        Work::Latency {
            remaining_ms: handshake_ms + rtt + server_ms,
            bytes: request.transfer_size_bytes as f64,
        }
    }

    fn bytes_per_ms_per_request(&self, downloading: usize) -> Option<f64> {
        if !bytes_per_ms_available(&self.settings) || downloading == 0 {
            return None;
        }
        Some(self.settings.throughput_bytes_per_second / 1000.0 / downloading as f64)
    }
}

fn bytes_per_ms_available(settings: &SimulationSettings) -> bool {
    !settings.has_unlimited_bandwidth()
}

/// Simulated time a node became eligible. Never negative and never NaN, so
/// `total_cmp` agrees with numeric order.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EligibleAt(f64);

impl Eq for EligibleAt {}

impl PartialOrd for EligibleAt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EligibleAt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Nodes whose dependencies have all completed, earliest eligible first.
#[derive(Debug, Default)]
struct EligibleQueue {
    cpu: BTreeSet<(EligibleAt, usize)>,
    network: BTreeSet<(EligibleAt, Reverse<RequestPriority>, usize)>,
}

impl EligibleQueue {
    fn push(&mut self, eligible_at: f64, order: usize, node: &GraphNode) {
        let eligible_at = EligibleAt(eligible_at);
        match &node.data {
            NodeData::Cpu(_) => {
                self.cpu.insert((eligible_at, order));
            }
            NodeData::Network(request) => {
                self.network
                    .insert((eligible_at, Reverse(request.priority), order));
            }
        }
    }
}
