/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Injected diagnostics channel for non-fatal observations.
//!
//! The analysis pipeline is otherwise pure; anything worth surfacing to an
//! external telemetry collaborator goes through a [`DiagnosticsSink`] handed in
//! by the caller.

use std::sync::Mutex;

pub const CHANNEL_TRACE_FMP_FALLBACK_USED: &str = "trace.fmp.fallback_used";
pub const CHANNEL_TRACE_FMP_CANDIDATE_MISSING: &str = "trace.fmp.candidate_missing";
pub const CHANNEL_TRACE_PAINT_OUT_OF_ORDER: &str = "trace.paint.out_of_order";

/// Severity tier for a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelSeverity {
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub channel_id: &'static str,
    pub severity: ChannelSeverity,
    pub message: String,
}

impl DiagnosticEvent {
    pub fn info(channel_id: &'static str, message: impl Into<String>) -> Self {
        Self {
            channel_id,
            severity: ChannelSeverity::Info,
            message: message.into(),
        }
    }

    pub fn warn(channel_id: &'static str, message: impl Into<String>) -> Self {
        Self {
            channel_id,
            severity: ChannelSeverity::Warn,
            message: message.into(),
        }
    }
}

/// Receiver for fire-and-forget diagnostic events.
pub trait DiagnosticsSink {
    fn emit(&self, event: DiagnosticEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl DiagnosticsSink for NoopDiagnostics {
    fn emit(&self, _event: DiagnosticEvent) {}
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count_for(&self, channel_id: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.channel_id == channel_id)
            .count()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn emit(&self, event: DiagnosticEvent) {
        log::debug!("diagnostic [{}] {}", event.channel_id, event.message);
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
