/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use lantern::config::SimulationSettings;
use lantern::diagnostics::{
    CHANNEL_TRACE_FMP_CANDIDATE_MISSING, CHANNEL_TRACE_FMP_FALLBACK_USED, NoopDiagnostics,
    RecordingDiagnostics,
};
use lantern::graph::GraphError;
use lantern::metrics::{MilestoneError, MilestoneId, MilestoneStage};
use lantern::network::ResourceType;
use lantern::trace::{TraceError, parse_trace_events};
use lantern::{AnalysisError, analyze};

use super::{MeaningfulPaintMarks, assert_close, page_requests, page_trace};

#[test]
fn curated_timings_are_offsets_from_navigation_start() {
    let analysis = analyze(
        &page_trace(MeaningfulPaintMarks::Authoritative),
        &page_requests(),
        SimulationSettings::unthrottled(),
        &NoopDiagnostics,
    )
    .unwrap();

    let timings = &analysis.trace.timings;
    assert_eq!(timings.navigation_start, 0.0);
    assert_eq!(timings.first_paint, Some(180.0));
    assert_eq!(timings.first_contentful_paint, Some(180.0));
    assert_eq!(timings.dom_content_loaded, Some(270.0));
    assert_eq!(timings.load, Some(410.0));
    assert_eq!(timings.trace_end, 420.0);
    assert!(!analysis.trace.fmp_fell_back());
}

#[test]
fn main_thread_tasks_form_a_forest() {
    let analysis = analyze(
        &page_trace(MeaningfulPaintMarks::Authoritative),
        &page_requests(),
        SimulationSettings::unthrottled(),
        &NoopDiagnostics,
    )
    .unwrap();

    let tasks = &analysis.tasks;
    assert_eq!(tasks.roots().len(), 4);
    assert_close(tasks.top_level_duration_ms(), 175.0);

    let script_task = tasks.roots()[2];
    let evaluate = tasks.children(script_task)[0];
    assert_eq!(
        tasks.get(evaluate).unwrap().evaluated_script_url(),
        Some("https://shop.test/app.js")
    );
    for (id, task) in tasks.iter() {
        let children: f64 = tasks
            .children(id)
            .iter()
            .filter_map(|child| tasks.get(*child))
            .map(|child| child.duration)
            .sum();
        assert_close(task.duration, task.self_time + children);
    }
}

#[test]
fn candidate_fallback_is_flagged_and_reported() {
    let diagnostics = RecordingDiagnostics::new();
    let analysis = analyze(
        &page_trace(MeaningfulPaintMarks::CandidatesOnly),
        &page_requests(),
        SimulationSettings::unthrottled(),
        &diagnostics,
    )
    .unwrap();

    assert!(analysis.trace.fmp_fell_back());
    assert_eq!(
        analysis.trace.timings.first_meaningful_paint.map(|fmp| fmp.value),
        Some(430.0)
    );
    assert_eq!(diagnostics.count_for(CHANNEL_TRACE_FMP_FALLBACK_USED), 1);
    assert_eq!(diagnostics.count_for(CHANNEL_TRACE_FMP_CANDIDATE_MISSING), 0);

    let fmp = analysis.estimate(MilestoneId::FirstMeaningfulPaint).unwrap();
    assert!(fmp.fell_back);
    assert_close(fmp.timing_ms, 295.0);
}

#[test]
fn missing_meaningful_paint_degrades_per_milestone() {
    let diagnostics = RecordingDiagnostics::new();
    let analysis = analyze(
        &page_trace(MeaningfulPaintMarks::None),
        &page_requests(),
        SimulationSettings::unthrottled(),
        &diagnostics,
    )
    .unwrap();

    assert_eq!(analysis.trace.timings.first_meaningful_paint, None);
    assert_eq!(diagnostics.count_for(CHANNEL_TRACE_FMP_CANDIDATE_MISSING), 1);

    assert!(analysis.timing_ms(MilestoneId::FirstContentfulPaint).is_some());
    let fmp = analysis.milestones.get(MilestoneId::FirstMeaningfulPaint).unwrap();
    assert_eq!(fmp.stage, MilestoneStage::NotComputed);
    assert!(matches!(
        fmp.result,
        Err(MilestoneError::MissingMilestoneTimestamp { .. })
    ));
    assert!(matches!(
        analysis.milestones.get(MilestoneId::Interactive).unwrap().result,
        Err(MilestoneError::FloorUnavailable { .. })
    ));
}

#[test]
fn missing_navigation_start_aborts_analysis() {
    let events: Vec<_> = page_trace(MeaningfulPaintMarks::Authoritative)
        .into_iter()
        .filter(|event| event.name != "navigationStart")
        .collect();
    let err = analyze(
        &events,
        &page_requests(),
        SimulationSettings::default(),
        &NoopDiagnostics,
    )
    .unwrap_err();
    assert_eq!(err, AnalysisError::Trace(TraceError::NoNavigationStart));
}

#[test]
fn missing_document_request_aborts_analysis() {
    let requests: Vec<_> = page_requests()
        .into_iter()
        .filter(|request| request.resource_type != ResourceType::Document)
        .collect();
    let err = analyze(
        &page_trace(MeaningfulPaintMarks::Authoritative),
        &requests,
        SimulationSettings::default(),
        &NoopDiagnostics,
    )
    .unwrap_err();
    assert_eq!(err, AnalysisError::Graph(GraphError::NoRootRequest));
}

#[test]
fn json_trace_round_trips_through_the_pipeline() {
    let json = serde_json::to_string(&serde_json::json!({
        "traceEvents": page_trace(MeaningfulPaintMarks::Authoritative),
    }))
    .unwrap();
    let events = parse_trace_events(&json).unwrap();
    let analysis = analyze(
        &events,
        &page_requests(),
        SimulationSettings::unthrottled(),
        &NoopDiagnostics,
    )
    .unwrap();
    assert_close(
        analysis.timing_ms(MilestoneId::FirstContentfulPaint).unwrap(),
        152.5,
    );
}
