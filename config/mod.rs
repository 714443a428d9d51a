/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Simulated environment settings and the named throttling profiles.

use std::collections::HashMap;

pub const PROFILE_MOBILE_SLOW_4G: &str = "profile:mobile_slow_4g";
pub const PROFILE_DESKTOP_DENSE: &str = "profile:desktop_dense";
pub const PROFILE_UNTHROTTLED: &str = "profile:unthrottled";

/// Environment the resource-constrained simulator replays a page load under.
///
/// A throughput that is zero, negative or not finite means unlimited bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub throughput_bytes_per_second: f64,
    pub round_trip_time_ms: f64,
    pub cpu_slowdown_multiplier: f64,
    pub max_concurrent_connections_per_origin: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self::mobile_slow_4g()
    }
}

impl SimulationSettings {
    /// 150ms RTT, 1.6Mbps down, 4x CPU slowdown.
    pub fn mobile_slow_4g() -> Self {
        Self {
            throughput_bytes_per_second: kbps_to_bytes_per_second(1638.4),
            round_trip_time_ms: 150.0,
            cpu_slowdown_multiplier: 4.0,
            max_concurrent_connections_per_origin: 6,
        }
    }

    pub fn desktop_dense() -> Self {
        Self {
            throughput_bytes_per_second: kbps_to_bytes_per_second(10240.0),
            round_trip_time_ms: 40.0,
            cpu_slowdown_multiplier: 1.0,
            max_concurrent_connections_per_origin: 6,
        }
    }

    pub fn unthrottled() -> Self {
        Self {
            throughput_bytes_per_second: f64::INFINITY,
            round_trip_time_ms: 0.0,
            cpu_slowdown_multiplier: 1.0,
            max_concurrent_connections_per_origin: 6,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_concurrent_connections_per_origin = max;
        self
    }

    pub fn has_unlimited_bandwidth(&self) -> bool {
        !(self.throughput_bytes_per_second.is_finite() && self.throughput_bytes_per_second > 0.0)
    }

    /// Parse settings from a TOML document; missing keys keep the default profile's values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let settings: SimulationSettings =
            toml::from_str(source).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.round_trip_time_ms.is_finite() || self.round_trip_time_ms < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "round_trip_time_ms must be a non-negative number, got {}",
                self.round_trip_time_ms
            )));
        }
        if !self.cpu_slowdown_multiplier.is_finite() || self.cpu_slowdown_multiplier <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "cpu_slowdown_multiplier must be positive, got {}",
                self.cpu_slowdown_multiplier
            )));
        }
        if self.max_concurrent_connections_per_origin == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_connections_per_origin must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn kbps_to_bytes_per_second(kbps: f64) -> f64 {
    kbps * 1024.0 / 8.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "Settings parse error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid settings: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfileResolution {
    pub requested_id: String,
    pub resolved_id: String,
    pub matched: bool,
    pub fallback_used: bool,
    pub settings: SimulationSettings,
}

/// Named throttling profiles, resolved case-insensitively with a fallback.
pub struct SimulationProfileRegistry {
    profiles: HashMap<String, SimulationSettings>,
    fallback_id: String,
}

impl SimulationProfileRegistry {
    pub fn register(&mut self, profile_id: &str, settings: SimulationSettings) {
        self.profiles.insert(profile_id.to_ascii_lowercase(), settings);
    }

    pub fn resolve(&self, profile_id: &str) -> SimulationProfileResolution {
        let requested = profile_id.trim().to_ascii_lowercase();
        let fallback = self
            .profiles
            .get(&self.fallback_id)
            .copied()
            .unwrap_or_default();

        if let Some(settings) = self.profiles.get(&requested).copied() {
            return SimulationProfileResolution {
                requested_id: requested.clone(),
                resolved_id: requested,
                matched: true,
                fallback_used: false,
                settings,
            };
        }

        log::debug!(
            "unknown simulation profile '{requested}', falling back to {}",
            self.fallback_id
        );
        SimulationProfileResolution {
            requested_id: requested,
            resolved_id: self.fallback_id.clone(),
            matched: false,
            fallback_used: true,
            settings: fallback,
        }
    }
}

impl Default for SimulationProfileRegistry {
    fn default() -> Self {
        let mut registry = Self {
            profiles: HashMap::new(),
            fallback_id: PROFILE_MOBILE_SLOW_4G.to_string(),
        };
        registry.register(PROFILE_MOBILE_SLOW_4G, SimulationSettings::mobile_slow_4g());
        registry.register(PROFILE_DESKTOP_DENSE, SimulationSettings::desktop_dense());
        registry.register(PROFILE_UNTHROTTLED, SimulationSettings::unthrottled());
        registry
    }
}
