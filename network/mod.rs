/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Observed network requests of one page load.

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Script,
    Image,
    Font,
    Xhr,
    Fetch,
    Other,
}

/// Browser fetch priority, ordered lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum RequestPriority {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InitiatorType {
    Parser,
    Script,
    Preload,
    Other,
}

/// A resolved network request. Times are microseconds on the trace clock.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub request_id: String,
    pub url: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub transfer_size_bytes: u64,
    pub start_time: f64,
    pub end_time: f64,
    pub priority: RequestPriority,
    pub initiator_type: InitiatorType,
    #[serde(default)]
    pub initiator_url: Option<String>,
    #[serde(default)]
    pub remote_server_id: Option<String>,
    #[serde(default = "default_finished")]
    pub finished: bool,
    /// Server think time, when the capture measured it separately.
    #[serde(default)]
    pub server_response_time_ms: Option<f64>,
}

fn default_finished() -> bool {
    true
}

impl NetworkRequest {
    pub fn new(
        request_id: &str,
        url: &str,
        resource_type: ResourceType,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            url: url.to_string(),
            resource_type,
            transfer_size_bytes: 0,
            start_time,
            end_time,
            priority: RequestPriority::Low,
            initiator_type: InitiatorType::Other,
            initiator_url: None,
            remote_server_id: None,
            finished: true,
            server_response_time_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_initiator(mut self, initiator_type: InitiatorType, url: Option<&str>) -> Self {
        self.initiator_type = initiator_type;
        self.initiator_url = url.map(str::to_string);
        self
    }

    pub fn with_transfer_size(mut self, bytes: u64) -> Self {
        self.transfer_size_bytes = bytes;
        self
    }

    pub fn with_remote_server(mut self, remote_server_id: &str) -> Self {
        self.remote_server_id = Some(remote_server_id.to_string());
        self
    }

    pub fn duration_ms(&self) -> f64 {
        ((self.end_time - self.start_time) / 1000.0).max(0.0)
    }

    pub fn is_data_uri(&self) -> bool {
        self.url.trim_start().to_ascii_lowercase().starts_with("data:")
    }

    pub fn is_secure(&self) -> bool {
        Url::parse(&self.url).is_ok_and(|url| url.scheme() == "https" || url.scheme() == "wss")
    }

    /// `VeryHigh`, or `High` for scripts.
    pub fn has_render_blocking_priority(&self) -> bool {
        self.priority == RequestPriority::VeryHigh
            || (self.priority == RequestPriority::High && self.resource_type == ResourceType::Script)
    }

    /// Key of the connection pool this request is served from: the remote
    /// server when known, otherwise the URL's origin.
    pub fn connection_key(&self) -> String {
        if let Some(remote) = &self.remote_server_id {
            return remote.clone();
        }
        match Url::parse(&self.url) {
            Ok(url) => url.origin().ascii_serialization(),
            Err(_) => self.url.clone(),
        }
    }
}
