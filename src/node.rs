//! Processing nodes and their real-time processors.
//!
//! A [`ProcessingNode`] is an opaque unit in the signal path. The graph only
//! cares about its identity and its bypass flag; what it does to the samples
//! is up to its [`NodeProcessor`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::format::AudioFormat;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`ProcessingNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Real-time sample processor behind a node.
///
/// `process` runs on the audio thread. Implementations must not allocate,
/// lock, block or perform I/O there; use atomics for live parameters.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, NodeProcessor};
///
/// struct Invert;
///
/// impl NodeProcessor for Invert {
///     fn process(&self, samples: &mut [f32], _format: AudioFormat) {
///         for s in samples {
///             *s = -*s;
///         }
///     }
/// }
/// ```
pub trait NodeProcessor: Send + Sync {
    /// Processes one block of interleaved samples in place.
    fn process(&self, samples: &mut [f32], format: AudioFormat);

    /// Clears any internal state such as reverb or delay tails.
    fn reset(&self) {}

    /// Applies a named parameter. Unknown names are ignored.
    fn set_parameter(&self, _name: &str, _value: f32) {}
}

/// Leaves samples untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl NodeProcessor for Passthrough {
    fn process(&self, _samples: &mut [f32], _format: AudioFormat) {}
}

/// An opaque unit in the signal path.
///
/// Cloning is cheap and yields a handle to the same node: clones share the
/// id, the processor and the bypass flag. Equality is by id.
#[derive(Clone)]
pub struct ProcessingNode {
    id: NodeId,
    name: Arc<str>,
    processor: Arc<dyn NodeProcessor>,
    bypassed: Arc<AtomicBool>,
}

impl ProcessingNode {
    /// Creates a node with a fresh id.
    pub fn new(name: impl Into<Arc<str>>, processor: Arc<dyn NodeProcessor>) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            processor,
            bypassed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a node that leaves samples untouched.
    pub fn passthrough(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Arc::new(Passthrough))
    }

    /// Returns the node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the processor.
    pub fn processor(&self) -> &Arc<dyn NodeProcessor> {
        &self.processor
    }

    /// Returns `true` if the node is skipped during rendering.
    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    /// Sets whether the node is skipped during rendering.
    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }

    /// Shared bypass flag, read by the audio thread.
    pub(crate) fn bypass_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.bypassed)
    }

    /// Clears the processor's internal state.
    pub fn reset(&self) {
        self.processor.reset();
    }
}

impl PartialEq for ProcessingNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProcessingNode {}

impl fmt::Debug for ProcessingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bypassed", &self.is_bypassed())
            .finish()
    }
}

/// `f32` stored as bits in an `AtomicU32`.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Source adapter at the head of the chain.
///
/// Applies the live volume and balance to whatever the playback layer feeds
/// into the graph.
#[derive(Debug)]
pub struct PlayerProcessor {
    volume: AtomicF32,
    balance: AtomicF32,
}

impl PlayerProcessor {
    /// Creates a player with the given volume (0..=1) and balance (-1..=1).
    pub fn new(volume: f32, balance: f32) -> Self {
        Self {
            volume: AtomicF32::new(volume.clamp(0.0, 1.0)),
            balance: AtomicF32::new(balance.clamp(-1.0, 1.0)),
        }
    }

    /// Returns the live volume.
    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Sets the live volume, clamped to 0..=1.
    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume.clamp(0.0, 1.0));
    }

    /// Returns the live balance.
    pub fn balance(&self) -> f32 {
        self.balance.get()
    }

    /// Sets the live balance, clamped to -1..=1.
    pub fn set_balance(&self, balance: f32) {
        self.balance.set(balance.clamp(-1.0, 1.0));
    }

    /// Per-channel gains for a stereo frame.
    fn stereo_gains(&self) -> (f32, f32) {
        let volume = self.volume.get();
        let balance = self.balance.get();
        let left = volume * (1.0 - balance).min(1.0);
        let right = volume * (1.0 + balance).min(1.0);
        (left, right)
    }
}

impl Default for PlayerProcessor {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl NodeProcessor for PlayerProcessor {
    fn process(&self, samples: &mut [f32], format: AudioFormat) {
        if format.channels == 2 {
            let (left, right) = self.stereo_gains();
            for frame in samples.chunks_exact_mut(2) {
                frame[0] *= left;
                frame[1] *= right;
            }
        } else {
            let volume = self.volume.get();
            for s in samples {
                *s *= volume;
            }
        }
    }

    fn set_parameter(&self, name: &str, value: f32) {
        match name {
            "volume" => self.set_volume(value),
            "balance" => self.set_balance(value),
            _ => {}
        }
    }
}

/// Mixer that applies a single output gain.
///
/// Used as the auxiliary mixer behind the player; its output is the point
/// recorders tap.
#[derive(Debug)]
pub struct MixerProcessor {
    gain: AtomicF32,
}

impl MixerProcessor {
    /// Creates a unity-gain mixer.
    pub fn new() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
        }
    }

    /// Returns the output gain.
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }
}

impl Default for MixerProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeProcessor for MixerProcessor {
    fn process(&self, samples: &mut [f32], _format: AudioFormat) {
        let gain = self.gain.get();
        if (gain - 1.0).abs() > f32::EPSILON {
            for s in samples {
                *s *= gain;
            }
        }
    }

    fn set_parameter(&self, name: &str, value: f32) {
        if name == "gain" {
            self.gain.set(value.max(0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = ProcessingNode::passthrough("a");
        let b = ProcessingNode::passthrough("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_bypass_shared_between_clones() {
        let node = ProcessingNode::passthrough("eq");
        let clone = node.clone();
        clone.set_bypassed(true);
        assert!(node.is_bypassed());
    }

    #[test]
    fn test_player_volume_clamped() {
        let player = PlayerProcessor::default();
        player.set_volume(1.7);
        assert!((player.volume() - 1.0).abs() < f32::EPSILON);
        player.set_balance(-3.0);
        assert!((player.balance() + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_player_balance_hard_left() {
        let player = PlayerProcessor::new(0.5, -1.0);
        let mut samples = [1.0f32, 1.0, 1.0, 1.0];
        player.process(&mut samples, AudioFormat::new(48_000, 2));
        assert_eq!(samples, [0.5, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_player_mono_applies_volume() {
        let player = PlayerProcessor::new(0.25, 1.0);
        let mut samples = [1.0f32, -1.0];
        player.process(&mut samples, AudioFormat::new(48_000, 1));
        assert_eq!(samples, [0.25, -0.25]);
    }

    #[test]
    fn test_mixer_gain_parameter() {
        let mixer = MixerProcessor::new();
        mixer.set_parameter("gain", 0.5);
        let mut samples = [1.0f32, 0.5];
        mixer.process(&mut samples, AudioFormat::cd());
        assert_eq!(samples, [0.5, 0.25]);
    }
}
