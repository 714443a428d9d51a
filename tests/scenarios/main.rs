/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use lantern::VERSION;
use lantern::network::{InitiatorType, NetworkRequest, RequestPriority, ResourceType};
use lantern::trace::TraceEvent;
use serde_json::json;

mod curation;
mod pipeline;
mod simulation;

const PID: i64 = 10;
const TID: i64 = 1;
const FRAME: &str = "FRAME-MAIN";
const NAVIGATION_START_US: f64 = 1_000.0;

/// Trace timestamp `ms` milliseconds after navigation start.
fn at(ms: f64) -> f64 {
    NAVIGATION_START_US + ms * 1000.0
}

fn mark(name: &str, ms: f64) -> TraceEvent {
    TraceEvent::new("blink.user_timing,loading,devtools.timeline", name, "R", PID, TID, at(ms))
        .with_args(json!({"frame": FRAME}))
}

fn run_task(start_ms: f64, dur_ms: f64) -> TraceEvent {
    TraceEvent::new("disabled-by-default-devtools.timeline", "RunTask", "X", PID, TID, at(start_ms))
        .with_dur(dur_ms * 1000.0)
}

fn nested(name: &str, start_ms: f64, dur_ms: f64, args: serde_json::Value) -> TraceEvent {
    TraceEvent::new("devtools.timeline", name, "X", PID, TID, at(start_ms))
        .with_dur(dur_ms * 1000.0)
        .with_args(args)
}

fn request(
    id: &str,
    url: &str,
    resource_type: ResourceType,
    priority: RequestPriority,
    start_ms: f64,
    end_ms: f64,
) -> NetworkRequest {
    NetworkRequest::new(id, url, resource_type, at(start_ms), at(end_ms)).with_priority(priority)
}

/// Navigation, paints and load milestones. `meaningful_paint` picks the
/// authoritative event, fallback candidates, or neither.
fn page_marks(meaningful_paint: MeaningfulPaintMarks) -> Vec<TraceEvent> {
    let mut events = vec![
        TraceEvent::new(
            "disabled-by-default-devtools.timeline",
            "TracingStartedInPage",
            "I",
            PID,
            TID,
            0.0,
        )
        .with_args(json!({"data": {"page": FRAME}})),
        mark("navigationStart", 0.0),
        mark("firstPaint", 180.0),
        mark("firstContentfulPaint", 180.0),
        mark("domContentLoadedEventEnd", 270.0),
        mark("loadEventEnd", 410.0),
    ];
    match meaningful_paint {
        MeaningfulPaintMarks::Authoritative => events.push(mark("firstMeaningfulPaint", 430.0)),
        MeaningfulPaintMarks::CandidatesOnly => {
            events.push(mark("firstMeaningfulPaintCandidate", 300.0));
            events.push(mark("firstMeaningfulPaintCandidate", 430.0));
        }
        MeaningfulPaintMarks::None => {}
    }
    events
}

#[derive(Clone, Copy)]
enum MeaningfulPaintMarks {
    Authoritative,
    CandidatesOnly,
    None,
}

/// Main-thread work of the shop page: parse, style, script evaluation that
/// fires an XHR, and the XHR handler that lays out the result.
fn page_tasks() -> Vec<TraceEvent> {
    vec![
        run_task(101.0, 20.0),
        nested("ParseHTML", 101.0, 19.0, json!({"beginData": {"url": "https://shop.test/"}})),
        run_task(170.0, 5.0),
        nested(
            "ParseAuthorStyleSheet",
            170.0,
            2.0,
            json!({"data": {"styleSheetUrl": "https://shop.test/app.css"}}),
        ),
        nested("Layout", 172.0, 3.0, json!({})),
        run_task(205.0, 60.0),
        nested("EvaluateScript", 205.0, 55.0, json!({"data": {"url": "https://shop.test/app.js"}})),
        nested("ResourceSendRequest", 250.0, 0.5, json!({"data": {"requestId": "api"}})),
        run_task(330.0, 90.0),
        nested(
            "XHRReadyStateChange",
            330.0,
            80.0,
            json!({"data": {"url": "https://api.test/items"}}),
        ),
        nested("Layout", 412.0, 6.0, json!({})),
    ]
}

fn page_trace(meaningful_paint: MeaningfulPaintMarks) -> Vec<TraceEvent> {
    let mut events = page_marks(meaningful_paint);
    events.extend(page_tasks());
    events
}

fn page_requests() -> Vec<NetworkRequest> {
    vec![
        request(
            "doc",
            "https://shop.test/",
            ResourceType::Document,
            RequestPriority::VeryHigh,
            0.0,
            100.0,
        )
        .with_transfer_size(20_000),
        request(
            "style",
            "https://shop.test/app.css",
            ResourceType::Stylesheet,
            RequestPriority::VeryHigh,
            100.0,
            150.0,
        )
        .with_initiator(InitiatorType::Parser, Some("https://shop.test/"))
        .with_transfer_size(10_000),
        request(
            "script",
            "https://shop.test/app.js",
            ResourceType::Script,
            RequestPriority::High,
            110.0,
            200.0,
        )
        .with_initiator(InitiatorType::Parser, Some("https://shop.test/"))
        .with_transfer_size(50_000),
        request(
            "hero",
            "https://cdn.test/hero.jpg",
            ResourceType::Image,
            RequestPriority::Low,
            120.0,
            400.0,
        )
        .with_initiator(InitiatorType::Parser, Some("https://shop.test/"))
        .with_transfer_size(200_000),
        request(
            "api",
            "https://api.test/items",
            ResourceType::Xhr,
            RequestPriority::High,
            260.0,
            320.0,
        )
        .with_initiator(InitiatorType::Script, Some("https://shop.test/app.js"))
        .with_transfer_size(4_000),
    ]
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}
