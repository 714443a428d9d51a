/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use lantern::config::{
    ConfigError, PROFILE_DESKTOP_DENSE, PROFILE_MOBILE_SLOW_4G, SimulationProfileRegistry, SimulationSettings,
};
use lantern::diagnostics::NoopDiagnostics;
use lantern::graph::NodeKind;
use lantern::metrics::{MilestoneId, MilestoneStage};
use lantern::{AnalysisError, PageAnalysis, analyze};

use super::{MeaningfulPaintMarks, assert_close, page_requests, page_trace};

fn analyze_page(settings: SimulationSettings) -> PageAnalysis {
    analyze(
        &page_trace(MeaningfulPaintMarks::Authoritative),
        &page_requests(),
        settings,
        &NoopDiagnostics,
    )
    .unwrap()
}

#[test]
fn page_graph_links_network_and_main_thread_work() {
    let analysis = analyze_page(SimulationSettings::unthrottled());
    let graph = &analysis.graph;

    assert_eq!(graph.node_count(), 9);
    assert_eq!(graph.find_all(|_, node| node.kind() == NodeKind::Cpu).len(), 4);
    assert!(graph.unreachable_from_root().is_empty());

    let (doc, _) = graph.get_node_by_id("doc").unwrap();
    let (script, _) = graph.get_node_by_id("script").unwrap();
    let (api, _) = graph.get_node_by_id("api").unwrap();
    assert_eq!(graph.root(), Some(doc));

    let evaluate = graph
        .find_all(|_, node| {
            node.cpu_task()
                .is_some_and(|task| task.evaluated_urls().contains("https://shop.test/app.js"))
        })
        .pop()
        .unwrap();
    assert_eq!(graph.dependencies(evaluate), vec![script]);
    // the XHR is sent from the evaluation and initiated by the script
    assert!(graph.dependencies(api).contains(&evaluate));
    assert!(graph.dependencies(api).contains(&script));
}

#[test]
fn unthrottled_milestones_follow_observed_timing() {
    let analysis = analyze_page(SimulationSettings::unthrottled());

    let fcp = analysis.estimate(MilestoneId::FirstContentfulPaint).unwrap();
    assert_close(fcp.optimistic_ms, 150.0);
    assert_close(fcp.pessimistic_ms, 155.0);
    assert_close(fcp.timing_ms, 152.5);

    let fmp = analysis.estimate(MilestoneId::FirstMeaningfulPaint).unwrap();
    assert_close(fmp.optimistic_ms, 250.0);
    assert_close(fmp.pessimistic_ms, 340.0);
    assert_close(fmp.timing_ms, 295.0);

    let tti = analysis.estimate(MilestoneId::Interactive).unwrap();
    assert_close(tti.timing_ms, 400.0);

    assert!(
        analysis
            .milestones
            .outcomes
            .iter()
            .all(|outcome| outcome.stage == MilestoneStage::Blended)
    );
}

#[test]
fn milestones_are_monotonic_under_every_profile() {
    let registry = SimulationProfileRegistry::default();
    for profile in [PROFILE_MOBILE_SLOW_4G, PROFILE_DESKTOP_DENSE, "profile:unknown"] {
        let analysis = analyze_page(registry.resolve(profile).settings);
        let fcp = analysis.timing_ms(MilestoneId::FirstContentfulPaint).unwrap();
        let fmp = analysis.timing_ms(MilestoneId::FirstMeaningfulPaint).unwrap();
        let tti = analysis.timing_ms(MilestoneId::Interactive).unwrap();
        assert!(fmp >= fcp, "{profile}: fmp {fmp} < fcp {fcp}");
        assert!(tti >= fmp, "{profile}: tti {tti} < fmp {fmp}");
    }
}

#[test]
fn throttling_slows_every_milestone() {
    let fast = analyze_page(SimulationSettings::unthrottled());
    let slow = analyze_page(SimulationSettings::mobile_slow_4g());
    for id in [
        MilestoneId::FirstContentfulPaint,
        MilestoneId::FirstMeaningfulPaint,
        MilestoneId::Interactive,
    ] {
        assert!(slow.timing_ms(id).unwrap() > fast.timing_ms(id).unwrap(), "{id}");
    }
}

#[test]
fn repeated_analysis_is_bit_identical() {
    let first = analyze_page(SimulationSettings::mobile_slow_4g());
    let second = analyze_page(SimulationSettings::mobile_slow_4g());
    for (a, b) in first
        .milestones
        .outcomes
        .iter()
        .zip(second.milestones.outcomes.iter())
    {
        let (a, b) = (a.result.as_ref().unwrap(), b.result.as_ref().unwrap());
        assert_eq!(a.timing_ms.to_bits(), b.timing_ms.to_bits());
        assert_eq!(a.optimistic_ms.to_bits(), b.optimistic_ms.to_bits());
        assert_eq!(a.pessimistic_ms.to_bits(), b.pessimistic_ms.to_bits());
    }
}

#[test]
fn settings_load_from_toml() {
    let settings = SimulationSettings::from_toml_str(
        "round_trip_time_ms = 40.0\ncpu_slowdown_multiplier = 2.0\n",
    )
    .unwrap();
    assert_eq!(settings.round_trip_time_ms, 40.0);
    assert_eq!(
        settings.max_concurrent_connections_per_origin,
        SimulationSettings::default().max_concurrent_connections_per_origin
    );

    let analysis = analyze_page(settings);
    assert!(analysis.timing_ms(MilestoneId::FirstContentfulPaint).unwrap() > 152.5);
}

#[test]
fn non_finite_settings_abort_before_simulating() {
    let settings = SimulationSettings {
        round_trip_time_ms: f64::INFINITY,
        ..SimulationSettings::unthrottled()
    };
    let err = analyze(
        &page_trace(MeaningfulPaintMarks::Authoritative),
        &page_requests(),
        settings,
        &NoopDiagnostics,
    )
    .unwrap_err();
    assert!(matches!(err, AnalysisError::Config(ConfigError::Invalid(_))), "{err}");
}
