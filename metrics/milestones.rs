/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Graph pruning policies of the built-in milestones.

use std::collections::BTreeSet;

use super::{
    EarlierEstimates, GraphVariant, Milestone, MilestoneCoefficients, MilestoneError, MilestoneId,
};
use crate::graph::{DependencyGraph, GraphNode, NodeKind};
use crate::network::{InitiatorType, RequestPriority, ResourceType};
use crate::simulation::SimulationResult;
use crate::trace::MilestoneTimes;

/// CPU tasks at or below this observed duration are assumed not to delay interactivity.
const INTERACTIVE_MIN_CPU_TASK_MS: f64 = 20.0;
/// A simulated task longer than this blocks the main thread.
const LONG_TASK_MS: f64 = 50.0;

/// URLs of script requests accepted by `condition`.
pub fn script_urls<F>(graph: &DependencyGraph, mut condition: F) -> BTreeSet<String>
where
    F: FnMut(&GraphNode) -> bool,
{
    graph
        .nodes()
        .filter_map(|(_, node)| {
            let request = node.request()?;
            (request.resource_type == ResourceType::Script && condition(node))
                .then(|| request.url.clone())
        })
        .collect()
}

fn is_script_initiated(node: &GraphNode) -> bool {
    node.initiator_type() == Some(InitiatorType::Script)
}

/// Render-blocking requests that are not script initiated, and the
/// evaluations of the scripts among them, finished by `paint_ts`.
fn optimistic_paint_graph(graph: &DependencyGraph, paint_ts: f64) -> DependencyGraph {
    let blocking_scripts = script_urls(graph, |node| {
        node.end_time <= paint_ts && node.has_render_blocking_priority() && !is_script_initiated(node)
    });
    graph.clone_with_filter(|key, node| {
        if node.end_time > paint_ts && !graph.is_root(key) {
            return false;
        }
        match node.kind() {
            NodeKind::Cpu => node.is_evaluate_script_for(&blocking_scripts),
            NodeKind::Network => node.has_render_blocking_priority() && !is_script_initiated(node),
        }
    })
}

/// Every render-blocking request, plus the tasks that laid out or evaluated
/// one of the blocking scripts, finished by `paint_ts`.
fn pessimistic_paint_graph(graph: &DependencyGraph, paint_ts: f64) -> DependencyGraph {
    let required_scripts = script_urls(graph, |node| {
        node.end_time <= paint_ts && node.has_render_blocking_priority()
    });
    graph.clone_with_filter(|key, node| {
        if node.end_time > paint_ts && !graph.is_root(key) {
            return false;
        }
        match node.kind() {
            NodeKind::Cpu => {
                node.did_perform_layout() || node.is_evaluate_script_for(&required_scripts)
            }
            NodeKind::Network => node.has_render_blocking_priority(),
        }
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FirstContentfulPaint;

impl FirstContentfulPaint {
    fn timestamp(timestamps: &MilestoneTimes) -> Result<f64, MilestoneError> {
        timestamps
            .first_contentful_paint
            .ok_or(MilestoneError::MissingMilestoneTimestamp {
                milestone: MilestoneId::FirstContentfulPaint,
                timestamp: "firstContentfulPaint",
            })
    }
}

impl Milestone for FirstContentfulPaint {
    fn id(&self) -> MilestoneId {
        MilestoneId::FirstContentfulPaint
    }

    fn coefficients(&self) -> MilestoneCoefficients {
        MilestoneCoefficients {
            intercept: 0.0,
            optimistic: 0.5,
            pessimistic: 0.5,
        }
    }

    fn optimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(optimistic_paint_graph(graph, Self::timestamp(timestamps)?))
    }

    fn pessimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(pessimistic_paint_graph(graph, Self::timestamp(timestamps)?))
    }
}

/// Same policies as first contentful paint against the meaningful-paint
/// timestamp, floored at first contentful paint.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMeaningfulPaint;

impl FirstMeaningfulPaint {
    fn timestamp(timestamps: &MilestoneTimes) -> Result<f64, MilestoneError> {
        timestamps
            .first_meaningful_paint
            .map(|fmp| fmp.value)
            .ok_or(MilestoneError::MissingMilestoneTimestamp {
                milestone: MilestoneId::FirstMeaningfulPaint,
                timestamp: "firstMeaningfulPaint",
            })
    }
}

impl Milestone for FirstMeaningfulPaint {
    fn id(&self) -> MilestoneId {
        MilestoneId::FirstMeaningfulPaint
    }

    fn coefficients(&self) -> MilestoneCoefficients {
        MilestoneCoefficients {
            intercept: 0.0,
            optimistic: 0.5,
            pessimistic: 0.5,
        }
    }

    fn floor(&self) -> Option<MilestoneId> {
        Some(MilestoneId::FirstContentfulPaint)
    }

    fn optimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(optimistic_paint_graph(graph, Self::timestamp(timestamps)?))
    }

    fn pessimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(pessimistic_paint_graph(graph, Self::timestamp(timestamps)?))
    }

    fn fell_back(&self, timestamps: &MilestoneTimes) -> bool {
        timestamps
            .first_meaningful_paint
            .is_some_and(|fmp| fmp.fell_back)
    }
}

/// Time until the main thread goes quiet after the meaningful paint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interactive;

impl Milestone for Interactive {
    fn id(&self) -> MilestoneId {
        MilestoneId::Interactive
    }

    fn coefficients(&self) -> MilestoneCoefficients {
        MilestoneCoefficients {
            intercept: 0.0,
            optimistic: 0.45,
            pessimistic: 0.55,
        }
    }

    fn floor(&self) -> Option<MilestoneId> {
        Some(MilestoneId::FirstMeaningfulPaint)
    }

    fn optimistic_graph(
        &self,
        graph: &DependencyGraph,
        _timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(graph.clone_with_filter(|_, node| match node.request() {
            None => node.duration_ms() > INTERACTIVE_MIN_CPU_TASK_MS,
            Some(request) => {
                request.resource_type != ResourceType::Image
                    && (request.resource_type == ResourceType::Script
                        || request.priority >= RequestPriority::High)
            }
        }))
    }

    fn pessimistic_graph(
        &self,
        graph: &DependencyGraph,
        _timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError> {
        Ok(graph.clone_with_filter(|_, _| true))
    }

    fn estimate(
        &self,
        variant: GraphVariant,
        result: &SimulationResult,
        earlier: &EarlierEstimates,
    ) -> Result<f64, MilestoneError> {
        let meaningful_paint = earlier
            .get(&MilestoneId::FirstMeaningfulPaint)
            .ok_or(MilestoneError::FloorUnavailable {
                milestone: MilestoneId::Interactive,
                floor: MilestoneId::FirstMeaningfulPaint,
            })?
            .variant_ms(variant);
        let last_long_task_end = result
            .node_timings
            .iter()
            .filter(|timing| timing.kind == NodeKind::Cpu && timing.duration_ms() > LONG_TASK_MS)
            .map(|timing| timing.end_ms)
            .fold(0.0, f64::max);
        Ok(last_long_task_end.max(meaningful_paint))
    }
}
