/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-tab trace curation.
//!
//! Finds the inspected frame, its last navigation and the paint/load
//! milestones that follow it, and slices the trace down to the inspected
//! process and its main thread.

use serde_json::Value;

use super::{TraceEvent, filtered_stable_sort};
use crate::diagnostics::{
    CHANNEL_TRACE_FMP_CANDIDATE_MISSING, CHANNEL_TRACE_FMP_FALLBACK_USED,
    CHANNEL_TRACE_PAINT_OUT_OF_ORDER, DiagnosticEvent, DiagnosticsSink,
};

const RENDERER_MAIN_THREAD_NAME: &str = "CrRendererMain";

/// First meaningful paint, tagged with whether it came from the
/// `firstMeaningfulPaintCandidate` fallback rather than an authoritative event.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MeaningfulPaint {
    pub value: f64,
    pub fell_back: bool,
}

/// Milestones of one navigation. Used both for absolute trace timestamps
/// (microseconds) and for offsets from navigation start (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneTimes {
    pub navigation_start: f64,
    pub first_paint: Option<f64>,
    pub first_contentful_paint: Option<f64>,
    pub first_meaningful_paint: Option<MeaningfulPaint>,
    pub dom_content_loaded: Option<f64>,
    pub load: Option<f64>,
    pub trace_end: f64,
}

impl MilestoneTimes {
    /// `navigationStart <= firstPaint <= firstContentfulPaint` over whichever
    /// of the paints are present.
    pub fn paints_in_order(&self) -> bool {
        let first_paint = self.first_paint.unwrap_or(self.navigation_start);
        first_paint >= self.navigation_start
            && self
                .first_contentful_paint
                .is_none_or(|fcp| fcp >= first_paint)
    }

    fn offsets_from_navigation_start(&self) -> MilestoneTimes {
        let origin = self.navigation_start;
        let to_ms = |ts: f64| (ts - origin) / 1000.0;
        MilestoneTimes {
            navigation_start: 0.0,
            first_paint: self.first_paint.map(to_ms),
            first_contentful_paint: self.first_contentful_paint.map(to_ms),
            first_meaningful_paint: self.first_meaningful_paint.map(|fmp| MeaningfulPaint {
                value: to_ms(fmp.value),
                fell_back: fmp.fell_back,
            }),
            dom_content_loaded: self.dom_content_loaded.map(to_ms),
            load: self.load.map(to_ms),
            trace_end: to_ms(self.trace_end),
        }
    }
}

/// The marker that identifies which process, thread and frame were inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct TracingStartedMarker {
    pub pid: i64,
    pub tid: i64,
    pub frame_id: String,
    pub ts: f64,
}

#[derive(Debug, Clone)]
pub struct CuratedTrace {
    /// Absolute trace timestamps, microseconds.
    pub timestamps: MilestoneTimes,
    /// Milliseconds since navigation start.
    pub timings: MilestoneTimes,
    pub process_events: Vec<TraceEvent>,
    pub main_thread_events: Vec<TraceEvent>,
    pub frame_id: String,
    pub started_in_page: TracingStartedMarker,
    pub navigation_start_event: TraceEvent,
}

impl CuratedTrace {
    pub fn fmp_fell_back(&self) -> bool {
        self.timestamps
            .first_meaningful_paint
            .is_some_and(|fmp| fmp.fell_back)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// No `TracingStartedInPage`/`TracingStartedInBrowser` marker to identify the tab.
    NoTracingStarted,
    /// The inspected frame never navigated.
    NoNavigationStart,
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::NoTracingStarted => write!(f, "No tracing-started marker found in trace"),
            TraceError::NoNavigationStart => write!(f, "No navigationStart found in trace"),
        }
    }
}

impl std::error::Error for TraceError {}

/// Curate a raw, unordered trace down to the inspected tab.
pub fn curate_trace(
    events: &[TraceEvent],
    diagnostics: &dyn DiagnosticsSink,
) -> Result<CuratedTrace, TraceError> {
    let key_events = filtered_stable_sort(events, TraceEvent::is_key_event);
    let started_in_page = find_tracing_started(&key_events)?;
    let frame_id = started_in_page.frame_id.clone();

    let frame_events: Vec<&TraceEvent> = key_events
        .iter()
        .filter(|event| event.frame() == Some(frame_id.as_str()))
        .collect();

    let navigation_start_event = frame_events
        .iter()
        .rev()
        .find(|event| event.name == "navigationStart")
        .map(|event| (*event).clone())
        .ok_or(TraceError::NoNavigationStart)?;
    let nav_ts = navigation_start_event.ts;

    let first_after = |name: &str| {
        frame_events
            .iter()
            .find(|event| event.name == name && event.ts > nav_ts)
            .map(|event| event.ts)
    };

    let first_paint = first_after("firstPaint");
    let first_contentful_paint = first_after("firstContentfulPaint");
    let first_meaningful_paint = match first_after("firstMeaningfulPaint") {
        Some(ts) => Some(MeaningfulPaint {
            value: ts,
            fell_back: false,
        }),
        None => {
            diagnostics.emit(DiagnosticEvent::warn(
                CHANNEL_TRACE_FMP_FALLBACK_USED,
                "No firstMeaningfulPaint found, using fallback",
            ));
            let candidate = frame_events
                .iter()
                .rev()
                .find(|event| event.name == "firstMeaningfulPaintCandidate" && event.ts > nav_ts);
            if candidate.is_none() {
                log::debug!("No firstMeaningfulPaintCandidate events found in trace");
                diagnostics.emit(DiagnosticEvent::info(
                    CHANNEL_TRACE_FMP_CANDIDATE_MISSING,
                    "No firstMeaningfulPaintCandidate events found in trace",
                ));
            }
            candidate.map(|event| MeaningfulPaint {
                value: event.ts,
                fell_back: true,
            })
        }
    };

    let process_events =
        filtered_stable_sort(events, |event| event.pid == started_in_page.pid);
    let main_thread_events: Vec<TraceEvent> = process_events
        .iter()
        .filter(|event| event.tid == started_in_page.tid)
        .cloned()
        .collect();

    let trace_end = events
        .iter()
        .map(TraceEvent::end_ts)
        .fold(nav_ts, f64::max);

    let timestamps = MilestoneTimes {
        navigation_start: nav_ts,
        first_paint,
        first_contentful_paint,
        first_meaningful_paint,
        dom_content_loaded: first_after("domContentLoadedEventEnd"),
        load: first_after("loadEventEnd"),
        trace_end,
    };
    if !timestamps.paints_in_order() {
        log::warn!(
            "paint milestones out of order: firstPaint {:?}, firstContentfulPaint {:?}",
            timestamps.first_paint,
            timestamps.first_contentful_paint
        );
        diagnostics.emit(DiagnosticEvent::warn(
            CHANNEL_TRACE_PAINT_OUT_OF_ORDER,
            "firstContentfulPaint precedes firstPaint",
        ));
    }
    let timings = timestamps.offsets_from_navigation_start();

    log::debug!(
        "curated trace: {} key events, {} process events, {} main thread events, frame {}",
        key_events.len(),
        process_events.len(),
        main_thread_events.len(),
        frame_id
    );

    Ok(CuratedTrace {
        timestamps,
        timings,
        process_events,
        main_thread_events,
        frame_id,
        started_in_page,
        navigation_start_event,
    })
}

fn find_tracing_started(key_events: &[TraceEvent]) -> Result<TracingStartedMarker, TraceError> {
    if let Some(event) = key_events
        .iter()
        .find(|event| event.name == "TracingStartedInPage")
        && let Some(frame_id) = event.data_str("page")
    {
        return Ok(TracingStartedMarker {
            pid: event.pid,
            tid: event.tid,
            frame_id: frame_id.to_string(),
            ts: event.ts,
        });
    }

    let browser_started = key_events
        .iter()
        .find(|event| event.name == "TracingStartedInBrowser")
        .ok_or(TraceError::NoTracingStarted)?;

    let main_frame = browser_started
        .args
        .get("data")
        .and_then(|data| data.get("frames"))
        .and_then(Value::as_array)
        .and_then(|frames| frames.iter().find(|frame| frame.get("parent").is_none()))
        .ok_or(TraceError::NoTracingStarted)?;

    let frame_id = main_frame
        .get("frame")
        .and_then(Value::as_str)
        .ok_or(TraceError::NoTracingStarted)?;
    let pid = main_frame
        .get("processId")
        .and_then(Value::as_i64)
        .ok_or(TraceError::NoTracingStarted)?;

    let tid = key_events
        .iter()
        .find(|event| {
            event.name == "thread_name"
                && event.pid == pid
                && event.args.get("name").and_then(Value::as_str) == Some(RENDERER_MAIN_THREAD_NAME)
        })
        .map(|event| event.tid)
        .ok_or(TraceError::NoTracingStarted)?;

    Ok(TracingStartedMarker {
        pid,
        tid,
        frame_id: frame_id.to_string(),
        ts: browser_started.ts,
    })
}
