/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Milestone timing estimates.
//!
//! Each milestone prunes the page graph into an optimistic and a pessimistic
//! variant, simulates both and blends the two completion times. A milestone
//! may be floored at an earlier milestone's blended timing. Failures are kept
//! per milestone so one uncomputable metric does not sink the others.

use std::collections::BTreeMap;

use crate::graph::DependencyGraph;
use crate::simulation::{SimulationError, SimulationResult, Simulator};
use crate::trace::MilestoneTimes;

pub mod milestones;

pub use milestones::{FirstContentfulPaint, FirstMeaningfulPaint, Interactive, script_urls};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum MilestoneId {
    FirstContentfulPaint,
    FirstMeaningfulPaint,
    Interactive,
}

impl MilestoneId {
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneId::FirstContentfulPaint => "first-contentful-paint",
            MilestoneId::FirstMeaningfulPaint => "first-meaningful-paint",
            MilestoneId::Interactive => "interactive",
        }
    }
}

impl std::fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `timing = intercept + optimistic * optimistic_ms + pessimistic * pessimistic_ms`
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MilestoneCoefficients {
    pub intercept: f64,
    pub optimistic: f64,
    pub pessimistic: f64,
}

impl MilestoneCoefficients {
    pub fn blend(&self, optimistic_ms: f64, pessimistic_ms: f64) -> f64 {
        self.intercept + self.optimistic * optimistic_ms + self.pessimistic * pessimistic_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GraphVariant {
    Optimistic,
    Pessimistic,
}

/// How far a milestone's evaluation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum MilestoneStage {
    NotComputed,
    GraphsBuilt,
    Simulated,
    Blended,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MilestoneEstimate {
    pub id: MilestoneId,
    /// Blended and floored, milliseconds since navigation start.
    pub timing_ms: f64,
    pub optimistic_ms: f64,
    pub pessimistic_ms: f64,
    pub optimistic_node_count: usize,
    pub pessimistic_node_count: usize,
    /// The timing was derived from a fallback timestamp rather than an authoritative one.
    pub fell_back: bool,
}

impl MilestoneEstimate {
    pub fn variant_ms(&self, variant: GraphVariant) -> f64 {
        match variant {
            GraphVariant::Optimistic => self.optimistic_ms,
            GraphVariant::Pessimistic => self.pessimistic_ms,
        }
    }
}

/// Estimates of the milestones evaluated so far.
pub type EarlierEstimates = BTreeMap<MilestoneId, MilestoneEstimate>;

#[derive(Debug, Clone, PartialEq)]
pub enum MilestoneError {
    /// The observed trace lacks the timestamp the pruning policy needs.
    MissingMilestoneTimestamp {
        milestone: MilestoneId,
        timestamp: &'static str,
    },
    Simulation {
        variant: GraphVariant,
        source: SimulationError,
    },
    /// The milestone this one is floored at could not be computed.
    FloorUnavailable {
        milestone: MilestoneId,
        floor: MilestoneId,
    },
}

impl std::fmt::Display for MilestoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MilestoneError::MissingMilestoneTimestamp {
                milestone,
                timestamp,
            } => write!(f, "Cannot compute {milestone}: trace has no {timestamp}"),
            MilestoneError::Simulation { variant, source } => {
                write!(f, "Simulation of {variant:?} graph failed: {source}")
            }
            MilestoneError::FloorUnavailable { milestone, floor } => {
                write!(f, "Cannot compute {milestone}: {floor} is unavailable")
            }
        }
    }
}

impl std::error::Error for MilestoneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MilestoneError::Simulation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Pruning policy and blend parameters of one milestone.
pub trait Milestone {
    fn id(&self) -> MilestoneId;

    fn coefficients(&self) -> MilestoneCoefficients;

    /// Earlier milestone whose blended timing bounds this one from below.
    fn floor(&self) -> Option<MilestoneId> {
        None
    }

    fn optimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError>;

    fn pessimistic_graph(
        &self,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
    ) -> Result<DependencyGraph, MilestoneError>;

    /// Timing of one simulated variant. Defaults to the graph's completion.
    fn estimate(
        &self,
        _variant: GraphVariant,
        result: &SimulationResult,
        _earlier: &EarlierEstimates,
    ) -> Result<f64, MilestoneError> {
        Ok(result.completion_ms)
    }

    fn fell_back(&self, _timestamps: &MilestoneTimes) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneOutcome {
    pub id: MilestoneId,
    /// Last stage reached; `Blended` on success.
    pub stage: MilestoneStage,
    pub result: Result<MilestoneEstimate, MilestoneError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilestoneReport {
    pub outcomes: Vec<MilestoneOutcome>,
}

impl MilestoneReport {
    pub fn get(&self, id: MilestoneId) -> Option<&MilestoneOutcome> {
        self.outcomes.iter().find(|outcome| outcome.id == id)
    }

    pub fn estimate(&self, id: MilestoneId) -> Option<&MilestoneEstimate> {
        self.get(id).and_then(|outcome| outcome.result.as_ref().ok())
    }

    pub fn timing_ms(&self, id: MilestoneId) -> Option<f64> {
        self.estimate(id).map(|estimate| estimate.timing_ms)
    }

    pub fn failures(&self) -> impl Iterator<Item = (MilestoneId, &MilestoneError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (outcome.id, err)))
    }
}

/// Runs a set of milestones, in order, against one page graph.
pub struct MilestoneEvaluator {
    simulator: Simulator,
    milestones: Vec<Box<dyn Milestone>>,
}

impl MilestoneEvaluator {
    /// First contentful paint, first meaningful paint and interactive, in floor order.
    pub fn new(simulator: Simulator) -> Self {
        Self::with_milestones(
            simulator,
            vec![
                Box::new(FirstContentfulPaint),
                Box::new(FirstMeaningfulPaint),
                Box::new(Interactive),
            ],
        )
    }

    /// Milestones are evaluated in the given order; a floor must come before
    /// the milestone it bounds.
    pub fn with_milestones(simulator: Simulator, milestones: Vec<Box<dyn Milestone>>) -> Self {
        Self {
            simulator,
            milestones,
        }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn evaluate(&self, graph: &DependencyGraph, timestamps: &MilestoneTimes) -> MilestoneReport {
        let mut earlier = EarlierEstimates::new();
        let mut report = MilestoneReport::default();

        for milestone in &self.milestones {
            let mut stage = MilestoneStage::NotComputed;
            let result = self.evaluate_one(milestone.as_ref(), graph, timestamps, &earlier, &mut stage);
            match &result {
                Ok(estimate) => {
                    log::debug!(
                        "{}: {:.1}ms (optimistic {:.1}ms, pessimistic {:.1}ms)",
                        estimate.id,
                        estimate.timing_ms,
                        estimate.optimistic_ms,
                        estimate.pessimistic_ms
                    );
                    earlier.insert(estimate.id, estimate.clone());
                }
                Err(err) => log::warn!("{} not computed ({stage:?}): {err}", milestone.id()),
            }
            report.outcomes.push(MilestoneOutcome {
                id: milestone.id(),
                stage,
                result,
            });
        }
        report
    }

    fn evaluate_one(
        &self,
        milestone: &dyn Milestone,
        graph: &DependencyGraph,
        timestamps: &MilestoneTimes,
        earlier: &EarlierEstimates,
        stage: &mut MilestoneStage,
    ) -> Result<MilestoneEstimate, MilestoneError> {
        let floor_ms = match milestone.floor() {
            Some(floor) => Some(
                earlier
                    .get(&floor)
                    .ok_or(MilestoneError::FloorUnavailable {
                        milestone: milestone.id(),
                        floor,
                    })?
                    .timing_ms,
            ),
            None => None,
        };

        let optimistic_graph = milestone.optimistic_graph(graph, timestamps)?;
        let pessimistic_graph = milestone.pessimistic_graph(graph, timestamps)?;
        *stage = MilestoneStage::GraphsBuilt;

        let simulate = |variant: GraphVariant, graph: &DependencyGraph| {
            self.simulator
                .simulate(graph)
                .map_err(|source| MilestoneError::Simulation { variant, source })
        };
        let optimistic = simulate(GraphVariant::Optimistic, &optimistic_graph)?;
        let pessimistic = simulate(GraphVariant::Pessimistic, &pessimistic_graph)?;
        *stage = MilestoneStage::Simulated;

        let optimistic_ms = milestone.estimate(GraphVariant::Optimistic, &optimistic, earlier)?;
        let pessimistic_ms = milestone.estimate(GraphVariant::Pessimistic, &pessimistic, earlier)?;
        let blended = milestone
            .coefficients()
            .blend(optimistic_ms, pessimistic_ms);
        let timing_ms = floor_ms.map_or(blended, |floor| blended.max(floor));
        *stage = MilestoneStage::Blended;

        Ok(MilestoneEstimate {
            id: milestone.id(),
            timing_ms,
            optimistic_ms,
            pessimistic_ms,
            optimistic_node_count: optimistic_graph.node_count(),
            pessimistic_node_count: pessimistic_graph.node_count(),
            fell_back: milestone.fell_back(timestamps),
        })
    }
}
