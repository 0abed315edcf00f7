//! Configuration types for the audio graph.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When per-track sound profiles are saved and restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SoundProfilePolicy {
    /// Profiles are never saved automatically. Explicitly saved profiles
    /// are still applied when their track starts.
    Never,

    /// Only tracks that already have a profile get it refreshed when the
    /// track ends.
    #[default]
    IndividualTracks,

    /// Every track gets a profile saved when it ends.
    AllTracks,
}

/// Configuration for graph behavior.
///
/// Use [`GraphConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use audio_graph::GraphConfig;
/// use std::time::Duration;
///
/// let config = GraphConfig {
///     observer_poll_interval: Duration::from_millis(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Maximum frames rendered per slice, sized for visualization analysis.
    ///
    /// Applied to the output device whenever it changes.
    /// Default: 2048
    pub visualization_buffer_size: u32,

    /// How much rendered audio the observer tap can hold before it starts
    /// dropping buffers.
    ///
    /// Default: 500ms
    pub tap_capacity: Duration,

    /// How often the observer dispatcher drains the tap.
    ///
    /// Default: 10ms
    pub observer_poll_interval: Duration,

    /// Volume used when no persisted state exists.
    ///
    /// Default: 0.5
    pub default_volume: f32,

    /// Balance used when no persisted state exists.
    ///
    /// Default: 0.0 (centre)
    pub default_balance: f32,

    /// Step applied by `increase_volume` / `decrease_volume`.
    ///
    /// Default: 0.05
    pub volume_delta: f32,

    /// Step applied by `pan_left` / `pan_right`.
    ///
    /// Default: 0.1
    pub balance_delta: f32,

    /// When per-track sound profiles are saved.
    pub sound_profile_policy: SoundProfilePolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            visualization_buffer_size: 2048,
            tap_capacity: Duration::from_millis(500),
            observer_poll_interval: Duration::from_millis(10),
            default_volume: 0.5,
            default_balance: 0.0,
            volume_delta: 0.05,
            balance_delta: 0.1,
            sound_profile_policy: SoundProfilePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_config_defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.visualization_buffer_size, 2048);
        assert_eq!(config.tap_capacity, Duration::from_millis(500));
        assert_eq!(config.observer_poll_interval, Duration::from_millis(10));
        assert!((config.default_volume - 0.5).abs() < f32::EPSILON);
        assert_eq!(
            config.sound_profile_policy,
            SoundProfilePolicy::IndividualTracks
        );
    }

    #[test]
    fn test_policy_serializes_camel_case() {
        let json = serde_json::to_string(&SoundProfilePolicy::AllTracks).unwrap();
        assert_eq!(json, "\"allTracks\"");
    }
}
