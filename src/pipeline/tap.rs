//! Lock-free tap between the audio thread and the observer dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::pipeline::RenderedBuffer;
use crate::runtime::{RenderInfo, RenderSink};

/// Audio-thread half of the tap.
///
/// Copies each rendered block into pre-allocated rings. A block that does not
/// fit is dropped whole and counted; nothing here allocates, locks or blocks.
pub(crate) struct RenderTap {
    samples: HeapProd<f32>,
    blocks: HeapProd<RenderInfo>,
    dropped: Arc<AtomicU64>,
}

impl RenderSink for RenderTap {
    fn post_render(&mut self, info: RenderInfo, samples: &[f32]) {
        // Only whole frames, so the reader pops exactly what the header says
        let len = info
            .format
            .samples_for_frames(info.frame_count as usize)
            .min(samples.len());
        let samples = &samples[..len];
        if self.samples.vacant_len() < samples.len() || self.blocks.is_full() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // Samples first: a visible block header implies its samples are there
        self.samples.push_slice(samples);
        let _ = self.blocks.try_push(info);
    }
}

/// Dispatcher half of the tap.
pub(crate) struct TapReader {
    samples: HeapCons<f32>,
    blocks: HeapCons<RenderInfo>,
    dropped: Arc<AtomicU64>,
}

impl TapReader {
    /// Reads the next complete block, if any.
    pub fn try_read(&mut self) -> Option<RenderedBuffer> {
        let info = self.blocks.try_pop()?;
        let len = info.format.samples_for_frames(info.frame_count as usize);
        let mut samples = vec![0.0; len];
        let read = self.samples.pop_slice(&mut samples);
        samples.truncate(read);
        Some(RenderedBuffer::from_render(samples, info))
    }

    /// Number of blocks waiting.
    pub fn pending(&self) -> usize {
        self.blocks.occupied_len()
    }

    /// Blocks dropped since the last call.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

/// Creates a tap holding up to `sample_capacity` interleaved samples spread
/// over at most `block_capacity` blocks.
pub(crate) fn create_tap(sample_capacity: usize, block_capacity: usize) -> (RenderTap, TapReader) {
    let (sample_tx, sample_rx) = HeapRb::<f32>::new(sample_capacity.max(1)).split();
    let (block_tx, block_rx) = HeapRb::<RenderInfo>::new(block_capacity.max(1)).split();
    let dropped = Arc::new(AtomicU64::new(0));

    (
        RenderTap {
            samples: sample_tx,
            blocks: block_tx,
            dropped: Arc::clone(&dropped),
        },
        TapReader {
            samples: sample_rx,
            blocks: block_rx,
            dropped,
        },
    )
}
