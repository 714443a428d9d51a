/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use lantern::config::SimulationSettings;
use lantern::graph::{CpuTask, DependencyGraph, GraphNode};
use lantern::network::{NetworkRequest, RequestPriority, ResourceType};
use lantern::simulation::{SimulationError, Simulator};
use lantern::tasks::build_task_forest;

use super::{at, request, run_task};

fn network_node(id: &str, url: &str, duration_ms: f64) -> GraphNode {
    GraphNode::network(request(
        id,
        url,
        ResourceType::Script,
        RequestPriority::Medium,
        0.0,
        duration_ms,
    ))
}

fn cpu_node(id: &str, start_ms: f64, duration_ms: f64) -> GraphNode {
    let event = run_task(start_ms, duration_ms);
    let forest = build_task_forest(std::slice::from_ref(&event), at(start_ms + duration_ms));
    GraphNode::cpu(
        id.to_string(),
        CpuTask {
            task: forest.roots()[0],
            event,
            child_events: Vec::new(),
        },
    )
}

fn same_origin_siblings() -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    let root = graph.add_node(network_node("root", "https://a.test/", 0.0));
    let first = graph.add_node(network_node("first", "https://a.test/1.js", 100.0));
    let second = graph.add_node(network_node("second", "https://a.test/2.js", 150.0));
    graph.add_dependency(root, first).unwrap();
    graph.add_dependency(root, second).unwrap();
    graph
}

#[test]
fn network_root_then_compute_completes_at_their_sum() {
    let mut graph = DependencyGraph::new();
    let root = graph.add_node(network_node("root", "https://a.test/", 100.0));
    let compute = graph.add_node(cpu_node("compute", 100.0, 50.0));
    graph.add_dependency(root, compute).unwrap();

    let result = Simulator::new(SimulationSettings::unthrottled())
        .simulate(&graph)
        .unwrap();
    assert_eq!(result.completion_ms, 150.0);
    let compute = result.timing_for("compute").unwrap();
    assert_eq!((compute.start_ms, compute.end_ms), (100.0, 150.0));
}

#[test]
fn one_connection_per_origin_serializes_siblings() {
    let settings = SimulationSettings::unthrottled().with_max_connections(1);
    let result = Simulator::new(settings)
        .simulate(&same_origin_siblings())
        .unwrap();

    let first = result.timing_for("first").unwrap();
    let second = result.timing_for("second").unwrap();
    assert!(second.start_ms >= first.end_ms);
    assert_eq!(result.completion_ms, 250.0);
}

#[test]
fn two_connections_per_origin_run_siblings_concurrently() {
    let settings = SimulationSettings::unthrottled().with_max_connections(2);
    let result = Simulator::new(settings)
        .simulate(&same_origin_siblings())
        .unwrap();

    assert_eq!(result.timing_for("first").unwrap().start_ms, 0.0);
    assert_eq!(result.timing_for("second").unwrap().start_ms, 0.0);
    assert_eq!(result.completion_ms, 150.0);
}

#[test]
fn pruned_graph_simulates_independently_of_its_source() {
    let graph = same_origin_siblings();
    let pruned = graph.clone_with_filter(|_, node| node.id != "second");
    let simulator = Simulator::new(SimulationSettings::unthrottled());

    assert_eq!(simulator.simulate(&pruned).unwrap().completion_ms, 100.0);
    assert_eq!(simulator.simulate(&graph).unwrap().completion_ms, 150.0);
}

#[test]
fn disconnected_graph_is_rejected() {
    let mut graph = same_origin_siblings();
    graph.add_node(GraphNode::network(NetworkRequest::new(
        "orphan",
        "https://b.test/",
        ResourceType::Image,
        0.0,
        1.0,
    )));
    let err = Simulator::new(SimulationSettings::default())
        .simulate(&graph)
        .unwrap_err();
    assert_eq!(
        err,
        SimulationError::EmptyOrDisconnectedGraph {
            unreachable_nodes: 1
        }
    );
}
