//! Settings type definitions.
//!
//! All sections use camelCase JSON keys and `#[serde(default)]`, so a
//! settings file only needs the values it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_core::ReRegistration;

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Settings schema version.
    pub version: String,
    /// Server connection settings.
    pub server: ServerSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Mirror merge behavior.
    pub mirror: MirrorSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl Default for VigilSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            reconnect: ReconnectSettings::default(),
            mirror: MirrorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl VigilSettings {
    /// Reject values the transport or mirror cannot work with.
    pub fn validate(&self) -> Result<()> {
        let url = &self.server.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "server.url must use ws:// or wss://, got {url}"
            )));
        }
        if self.server.command_timeout_ms == 0 || self.server.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server timeouts must be greater than zero".into(),
            ));
        }
        if self.server.camera_registered_event.is_empty()
            || self.server.recording_complete_event.is_empty()
        {
            return Err(SettingsError::InvalidValue(
                "server event names must not be empty".into(),
            ));
        }
        let r = &self.reconnect;
        if r.multiplier < 1.0 {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                r.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within 0.0..=1.0, got {}",
                r.jitter_factor
            )));
        }
        if r.max_delay_ms < r.initial_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.maxDelayMs ({}) is below reconnect.initialDelayMs ({})",
                r.max_delay_ms, r.initial_delay_ms
            )));
        }
        Ok(())
    }
}

/// Where and how to reach the camera server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-command response timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Ping interval in milliseconds. `0` disables pings.
    pub heartbeat_interval_ms: u64,
    /// Server event name for camera registrations.
    pub camera_registered_event: String,
    /// Server event name for finished recordings.
    pub recording_complete_event: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8888/websocket".to_string(),
            connect_timeout_ms: 10_000,
            command_timeout_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            camera_registered_event: "domain/registered/camera".to_string(),
            recording_complete_event: "*/recorder/complete".to_string(),
        }
    }
}

impl ServerSettings {
    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Command timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Ping interval, `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

/// Exponential reconnect backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub initial_delay_ms: u64,
    /// Upper bound on the delay.
    pub max_delay_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction of it.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Merge behavior of the mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorSettings {
    /// Hold events that arrive while the snapshot is loading and replay them
    /// once it lands.
    pub buffer_during_snapshot: bool,
    /// Handling of recordings when a known camera is registered again.
    pub reregistration: ReRegistration,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            buffer_during_snapshot: true,
            reregistration: ReRegistration::MergeRecordings,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Per-module overrides, e.g. `{"vigil_ws": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let settings = VigilSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.url, "ws://localhost:8888/websocket");
        assert_eq!(settings.server.camera_registered_event, "domain/registered/camera");
        assert_eq!(settings.server.recording_complete_event, "*/recorder/complete");
        assert!(settings.mirror.buffer_during_snapshot);
        assert_eq!(settings.mirror.reregistration, ReRegistration::MergeRecordings);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(VigilSettings::default()).unwrap();
        assert_eq!(value["server"]["commandTimeoutMs"], 30_000);
        assert_eq!(value["mirror"]["bufferDuringSnapshot"], true);
        assert_eq!(value["mirror"]["reregistration"], "mergeRecordings");
        assert_eq!(value["reconnect"]["initialDelayMs"], 1_000);
    }

    #[test]
    fn heartbeat_zero_disables_pings() {
        let server = ServerSettings {
            heartbeat_interval_ms: 0,
            ..ServerSettings::default()
        };
        assert!(server.heartbeat_interval().is_none());
        assert_eq!(
            ServerSettings::default().heartbeat_interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn rejects_http_url() {
        let mut settings = VigilSettings::default();
        settings.server.url = "http://localhost:8888".into();
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("ws://"));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut settings = VigilSettings::default();
        settings.reconnect.multiplier = 0.5;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let mut settings = VigilSettings::default();
        settings.reconnect.initial_delay_ms = 60_000;
        settings.reconnect.max_delay_ms = 1_000;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("maxDelayMs"));
    }
}
