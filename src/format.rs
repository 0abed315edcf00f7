//! Audio stream format.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sample rate and channel layout of an edge or device.
///
/// Samples always travel through the graph as interleaved `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioFormat {
    /// Creates a format.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// 44.1kHz stereo.
    pub const fn cd() -> Self {
        Self::new(44_100, 2)
    }

    /// Number of interleaved samples for the given frame count.
    pub fn samples_for_frames(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Duration covered by the given frame count.
    pub fn duration_of(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Number of interleaved samples covering the given duration.
    pub fn samples_for_duration(&self, duration: Duration) -> usize {
        let frames = (f64::from(self.sample_rate) * duration.as_secs_f64()) as usize;
        frames * self.channels as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::cd()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}
