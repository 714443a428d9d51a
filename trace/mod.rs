/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Browser trace events and the curated per-tab view of them.
//!
//! Timestamps are microseconds on the trace clock. Ordering is always by
//! `ts` with ties broken by position in the original stream.

use serde_json::Value;

pub mod curator;

pub use curator::{
    CuratedTrace, MeaningfulPaint, MilestoneTimes, TraceError, TracingStartedMarker, curate_trace,
};

/// One decoded trace event, with Chrome trace-format field names.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TraceEvent {
    #[serde(default)]
    pub cat: String,
    pub name: String,
    #[serde(default)]
    pub ph: String,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub tid: i64,
    #[serde(default)]
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    #[serde(default)]
    pub args: Value,
}

impl TraceEvent {
    pub fn new(cat: &str, name: &str, ph: &str, pid: i64, tid: i64, ts: f64) -> Self {
        Self {
            cat: cat.to_string(),
            name: name.to_string(),
            ph: ph.to_string(),
            pid,
            tid,
            ts,
            dur: None,
            args: Value::Null,
        }
    }

    pub fn with_dur(mut self, dur: f64) -> Self {
        self.dur = Some(dur);
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// `ts + dur`, treating a missing duration as zero.
    pub fn end_ts(&self) -> f64 {
        self.ts + self.dur.unwrap_or(0.0)
    }

    /// Frame id from `args.frame`, the scoping key for per-frame milestones.
    pub fn frame(&self) -> Option<&str> {
        self.args.get("frame").and_then(Value::as_str)
    }

    /// String field from `args.data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.args
            .get("data")
            .and_then(|data| data.get(key))
            .and_then(Value::as_str)
    }

    /// Script or document URL this event is attributed to, if any.
    pub fn url(&self) -> Option<&str> {
        match self.name.as_str() {
            "ParseHTML" => self
                .args
                .get("beginData")
                .and_then(|data| data.get("url"))
                .and_then(Value::as_str),
            "ParseAuthorStyleSheet" => self.data_str("styleSheetUrl"),
            _ => self.data_str("url"),
        }
    }

    /// Matches the category allow-list of events that carry page milestones.
    pub fn is_key_event(&self) -> bool {
        self.cat.contains("blink.user_timing")
            || self.cat.contains("loading")
            || self.cat.contains("devtools.timeline")
            || self.cat == "__metadata"
    }
}

/// Filter `events` and sort the survivors by timestamp, ties kept in stream order.
pub fn filtered_stable_sort<F>(events: &[TraceEvent], filter: F) -> Vec<TraceEvent>
where
    F: Fn(&TraceEvent) -> bool,
{
    let mut indices: Vec<usize> = (0..events.len())
        .filter(|&index| filter(&events[index]))
        .collect();

    indices.sort_by(|&a, &b| events[a].ts.total_cmp(&events[b].ts).then(a.cmp(&b)));

    indices.into_iter().map(|index| events[index].clone()).collect()
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum TraceDocument {
    Events(Vec<TraceEvent>),
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<TraceEvent>,
    },
}

/// Decode a JSON trace, either a bare event array or an object with a
/// `traceEvents` array.
pub fn parse_trace_events(json: &str) -> Result<Vec<TraceEvent>, serde_json::Error> {
    Ok(match serde_json::from_str(json)? {
        TraceDocument::Events(events) => events,
        TraceDocument::Object { trace_events } => trace_events,
    })
}
