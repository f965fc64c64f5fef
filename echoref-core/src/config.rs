//! Session configuration, optionally loaded from a JSON file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    buffering::DEFAULT_CAPACITY_FRAMES,
    error::{EchoRefError, Result},
};

/// Upper bound on buffer capacity: 10 minutes of frames.
const MAX_CAPACITY_FRAMES: usize = 60_000;
const MAX_SINK_QUEUE_FRAMES: usize = 1_000;
const MAX_START_DELAY_MS: u64 = 5_000;

/// Configuration for `PlayoutSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Circular buffer size in frames. Default: 1500 (15 s).
    pub capacity_frames: usize,
    /// How far ingestion may run ahead of playback before it waits.
    /// Default: half the capacity; the rest is echo-reference history.
    pub max_lead_frames: usize,
    /// Delay before the first scheduler tick (prebuffer). Default: 0.
    pub start_delay_ms: u64,
    /// Sink backlog, in frames, above which the scheduler reports that the
    /// sink is falling behind. Frames are never dropped. Default: 64.
    pub sink_queue_frames: usize,
    /// How long `close()` waits for a source that cannot be interrupted.
    /// Default: 500 ms.
    pub close_timeout_ms: u64,
    /// Output device name for `CpalSink`. `None` uses the system default.
    pub preferred_output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
            max_lead_frames: DEFAULT_CAPACITY_FRAMES / 2,
            start_delay_ms: 0,
            sink_queue_frames: 64,
            close_timeout_ms: 500,
            preferred_output_device: None,
        }
    }
}

impl SessionConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Clamp every field into its usable range.
    pub fn normalize(&mut self) {
        self.capacity_frames = self.capacity_frames.clamp(2, MAX_CAPACITY_FRAMES);
        self.max_lead_frames = self.max_lead_frames.clamp(1, self.capacity_frames);
        self.start_delay_ms = self.start_delay_ms.min(MAX_START_DELAY_MS);
        self.sink_queue_frames = self.sink_queue_frames.clamp(1, MAX_SINK_QUEUE_FRAMES);
        self.preferred_output_device = self
            .preferred_output_device
            .take()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
    }

    /// Reject configurations a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity_frames == 0 {
            return Err(EchoRefError::InvalidConfig("capacityFrames must be > 0".into()));
        }
        if self.max_lead_frames == 0 || self.max_lead_frames > self.capacity_frames {
            return Err(EchoRefError::InvalidConfig(format!(
                "maxLeadFrames must be in 1..={} (got {})",
                self.capacity_frames, self.max_lead_frames
            )));
        }
        if self.sink_queue_frames == 0 {
            return Err(EchoRefError::InvalidConfig("sinkQueueFrames must be > 0".into()));
        }
        Ok(())
    }
}

/// Load a config file, falling back to defaults when it is missing or
/// unreadable. The result is always normalized.
pub fn load_config(path: &Path) -> SessionConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<SessionConfig>(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "invalid session config, using defaults: {e}");
                SessionConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionConfig::default(),
        Err(e) => {
            warn!(path = %path.display(), "failed to read session config, using defaults: {e}");
            SessionConfig::default()
        }
    };
    config.normalize();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.capacity_frames, 1_500);
        assert_eq!(config.max_lead_frames, 750);
    }

    #[test]
    fn normalize_clamps_lead_to_capacity() {
        let mut config = SessionConfig {
            capacity_frames: 10,
            max_lead_frames: 50,
            sink_queue_frames: 0,
            preferred_output_device: Some("   ".into()),
            ..SessionConfig::default()
        };
        config.normalize();
        assert_eq!(config.max_lead_frames, 10);
        assert_eq!(config.sink_queue_frames, 1);
        assert_eq!(config.preferred_output_device, None);
        config.validate().expect("normalized config should validate");
    }

    #[test]
    fn validate_rejects_lead_beyond_capacity() {
        let config = SessionConfig {
            capacity_frames: 10,
            max_lead_frames: 11,
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(EchoRefError::InvalidConfig(_))));
    }

    #[test]
    fn load_config_reads_partial_camel_case_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{ "startDelayMs": 40, "preferredOutputDevice": " Headset " }"#)
            .expect("write config");

        let config = load_config(&path);
        assert_eq!(config.start_delay(), Duration::from_millis(40));
        assert_eq!(config.preferred_output_device.as_deref(), Some("Headset"));
        assert_eq!(config.capacity_frames, DEFAULT_CAPACITY_FRAMES);
    }

    #[test]
    fn load_config_falls_back_on_missing_or_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(load_config(&dir.path().join("absent.json")), SessionConfig::default());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write config");
        assert_eq!(load_config(&path), SessionConfig::default());
    }
}
