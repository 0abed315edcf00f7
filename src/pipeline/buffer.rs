//! Rendered audio snapshot delivered to observers.

use std::sync::Arc;
use std::time::Duration;

use crate::format::AudioFormat;
use crate::runtime::RenderInfo;

/// A copy of one block rendered to the sink.
///
/// Samples are stored in an `Arc<[f32]>` so observers can keep or forward a
/// buffer without copying it again.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, RenderedBuffer};
/// use std::time::Duration;
///
/// let buffer = RenderedBuffer::new(vec![0.0; 960], 0, AudioFormat::new(48_000, 2));
/// assert_eq!(buffer.frame_count, 480);
/// assert_eq!(buffer.duration(), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct RenderedBuffer {
    /// Interleaved samples.
    pub samples: Arc<[f32]>,

    /// Frame position of the first frame since the output started.
    pub sample_time: u64,

    /// Number of frames.
    pub frame_count: u32,

    /// Format of the samples.
    pub format: AudioFormat,
}

impl RenderedBuffer {
    /// Creates a buffer. The frame count is derived from the sample count.
    pub fn new(samples: Vec<f32>, sample_time: u64, format: AudioFormat) -> Self {
        let frame_count = (samples.len() / usize::from(format.channels.max(1))) as u32;
        Self {
            samples: samples.into(),
            sample_time,
            frame_count,
            format,
        }
    }

    pub(crate) fn from_render(samples: Vec<f32>, info: RenderInfo) -> Self {
        Self::new(samples, info.sample_time, info.format)
    }

    /// Duration covered by this buffer.
    pub fn duration(&self) -> Duration {
        self.format.duration_of(u64::from(self.frame_count))
    }

    /// Position of this buffer since the output started.
    pub fn timestamp(&self) -> Duration {
        self.format.duration_of(self.sample_time)
    }

    /// Peak absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Returns `true` if every sample is zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}
