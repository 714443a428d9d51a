/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Offline page-load performance prediction.
//!
//! A recorded browser trace and the page's network requests are curated into
//! milestone timestamps and a main-thread task forest, joined into a
//! dependency graph, and replayed under a simulated network/CPU environment
//! to estimate paint and interactivity milestones.
//!
//! Pipeline: [`trace::curate_trace`] -> [`tasks::build_task_forest`] ->
//! [`graph::build_page_dependency_graph`] -> [`metrics::MilestoneEvaluator`].
//! [`analyze`] runs all four.

pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod metrics;
pub mod network;
pub mod simulation;
pub mod tasks;
pub mod trace;

use crate::config::{ConfigError, SimulationSettings};
use crate::diagnostics::DiagnosticsSink;
use crate::graph::{DependencyGraph, GraphError};
use crate::metrics::{MilestoneEstimate, MilestoneEvaluator, MilestoneId, MilestoneReport};
use crate::network::NetworkRequest;
use crate::simulation::Simulator;
use crate::tasks::TaskForest;
use crate::trace::{CuratedTrace, TraceError, TraceEvent};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Construction-time failure. Nothing downstream of it can be trusted, so the
/// whole analysis stops.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    Config(ConfigError),
    Trace(TraceError),
    Graph(GraphError),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::Config(err) => write!(f, "Simulation settings rejected: {err}"),
            AnalysisError::Trace(err) => write!(f, "Trace curation failed: {err}"),
            AnalysisError::Graph(err) => write!(f, "Dependency graph construction failed: {err}"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Config(err) => Some(err),
            AnalysisError::Trace(err) => Some(err),
            AnalysisError::Graph(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AnalysisError {
    fn from(err: ConfigError) -> Self {
        AnalysisError::Config(err)
    }
}

impl From<TraceError> for AnalysisError {
    fn from(err: TraceError) -> Self {
        AnalysisError::Trace(err)
    }
}

impl From<GraphError> for AnalysisError {
    fn from(err: GraphError) -> Self {
        AnalysisError::Graph(err)
    }
}

/// Everything one analysis produced.
#[derive(Debug)]
pub struct PageAnalysis {
    pub trace: CuratedTrace,
    /// Main-thread tasks of the inspected renderer.
    pub tasks: TaskForest,
    pub graph: DependencyGraph,
    pub milestones: MilestoneReport,
}

impl PageAnalysis {
    pub fn estimate(&self, id: MilestoneId) -> Option<&MilestoneEstimate> {
        self.milestones.estimate(id)
    }

    /// Predicted milestone timing, milliseconds since navigation start.
    pub fn timing_ms(&self, id: MilestoneId) -> Option<f64> {
        self.milestones.timing_ms(id)
    }
}

/// Curate `events`, build the page graph from the main-thread tasks and
/// `requests`, and estimate every built-in milestone under `settings`.
///
/// Invalid settings, curation and graph errors abort; milestone errors are reported per
/// milestone in [`PageAnalysis::milestones`].
pub fn analyze(
    events: &[TraceEvent],
    requests: &[NetworkRequest],
    settings: SimulationSettings,
    diagnostics: &dyn DiagnosticsSink,
) -> Result<PageAnalysis, AnalysisError> {
    settings.validate()?;
    let trace = trace::curate_trace(events, diagnostics)?;
    let tasks = tasks::build_task_forest(&trace.main_thread_events, trace.timestamps.trace_end);
    let graph = graph::build_page_dependency_graph(&tasks, requests)?;
    log::debug!(
        "analyzing frame {}: {} main-thread tasks, {} graph nodes",
        trace.frame_id,
        tasks.len(),
        graph.node_count()
    );

    let milestones =
        MilestoneEvaluator::new(Simulator::new(settings)).evaluate(&graph, &trace.timestamps);

    Ok(PageAnalysis {
        trace,
        tasks,
        graph,
        milestones,
    })
}
