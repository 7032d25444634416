//! Pipeline timing and sizing settings
//!
//! These values bound every wait in the pipeline: how long a producer may
//! block on a full mailbox, how long a worker waits for a frame before
//! re-checking cancellation, and how deep each consumer's queue is.
//!
//! # Main Types
//!
//! - [`PipelineSettings`] - Mailbox capacities, timeouts and throttles
//! - [`StorageSettings`] - Where recordings go and how much space they may use
//!
//! All durations are stored as milliseconds so the TOML stays readable;
//! the accessor methods return [`Duration`]s.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timing and queue-depth settings shared by every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Worker wait for the next frame before re-checking cancellation
    pub fetch_timeout_ms: u64,

    /// Serial-chain handoff wait slice
    pub handoff_slice_ms: u64,

    /// Producer wait when posting raw frames
    pub raw_post_timeout_ms: u64,

    /// Producer wait when posting audio frames
    pub audio_post_timeout_ms: u64,

    /// Minimum spacing between debug-mode model results
    pub debug_spacing_ms: u64,

    /// Minimum spacing between camera preview samples
    pub preview_interval_ms: u64,

    /// Pause between QR code scans
    pub qrcode_interval_ms: u64,

    /// Capacity of model input mailboxes (raw and preview)
    pub model_capacity: usize,

    /// Capacity of the camera's own preview mailbox
    pub preview_capacity: usize,

    /// Capacity of recorder / streamer mailboxes
    pub encoded_capacity: usize,

    /// Frame rate requested for the raw channel by model nodes
    pub model_fps: u32,

    /// Recording storage
    pub storage: StorageSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 200,
            handoff_slice_ms: 50,
            raw_post_timeout_ms: 5,
            audio_post_timeout_ms: 20,
            debug_spacing_ms: 100,
            preview_interval_ms: 100,
            qrcode_interval_ms: 500,
            model_capacity: 1,
            preview_capacity: 1,
            encoded_capacity: 30,
            model_fps: 30,
            storage: StorageSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.max(1))
    }

    pub fn handoff_slice(&self) -> Duration {
        Duration::from_millis(self.handoff_slice_ms.max(1))
    }

    pub fn raw_post_timeout(&self) -> Duration {
        Duration::from_millis(self.raw_post_timeout_ms)
    }

    pub fn audio_post_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_post_timeout_ms)
    }

    pub fn debug_spacing(&self) -> Duration {
        Duration::from_millis(self.debug_spacing_ms)
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_interval_ms)
    }

    pub fn qrcode_interval(&self) -> Duration {
        Duration::from_millis(self.qrcode_interval_ms)
    }

    /// Post timeout for an encoded channel running at `fps`.
    pub fn encoded_post_timeout(fps: u32) -> Duration {
        Duration::from_millis(1000 / u64::from(fps.max(1)))
    }

    /// Settings tuned for tests: short waits so shutdown is quick.
    pub fn fast() -> Self {
        Self {
            fetch_timeout_ms: 20,
            handoff_slice_ms: 10,
            debug_spacing_ms: 0,
            preview_interval_ms: 0,
            qrcode_interval_ms: 0,
            ..Self::default()
        }
    }
}

/// Recording storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory used for `storage = "local"`
    pub local: PathBuf,

    /// Directory used for `storage = "external"`
    pub external: PathBuf,

    /// Byte budget for recordings in one directory; oldest files are
    /// recycled to stay under it
    pub max_bytes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            local: PathBuf::from("/userdata/VIDEO/"),
            external: PathBuf::from("/mnt/sd/VIDEO/"),
            max_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = PipelineSettings::default();
        assert_eq!(s.raw_post_timeout(), Duration::from_millis(5));
        assert_eq!(s.audio_post_timeout(), Duration::from_millis(20));
        assert_eq!(s.model_capacity, 1);
        assert_eq!(s.storage.local, PathBuf::from("/userdata/VIDEO/"));
    }

    #[test]
    fn test_encoded_post_timeout_follows_fps() {
        assert_eq!(
            PipelineSettings::encoded_post_timeout(30),
            Duration::from_millis(33)
        );
        assert_eq!(
            PipelineSettings::encoded_post_timeout(0),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let s: PipelineSettings = toml::from_str("fetch_timeout_ms = 50\n").unwrap();
        assert_eq!(s.fetch_timeout(), Duration::from_millis(50));
        assert_eq!(s.encoded_capacity, 30);
    }
}
