//! Built-in effect slots.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::{NodeProcessor, Passthrough, ProcessingNode};
use crate::state::UnitSettings;
use crate::units::{apply_bypass, EffectUnit, UnitState};

/// One of the six built-in effect slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FxSlot {
    /// Equalizer.
    Eq,
    /// Pitch shift.
    Pitch,
    /// Time stretch.
    Time,
    /// Reverb.
    Reverb,
    /// Delay.
    Delay,
    /// Filter.
    Filter,
}

impl FxSlot {
    /// Slots in signal order.
    pub const ORDER: [FxSlot; 6] = [
        FxSlot::Eq,
        FxSlot::Pitch,
        FxSlot::Time,
        FxSlot::Reverb,
        FxSlot::Delay,
        FxSlot::Filter,
    ];

    /// Display name, also used as the node name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Pitch => "Pitch",
            Self::Time => "Time",
            Self::Reverb => "Reverb",
            Self::Delay => "Delay",
            Self::Filter => "Filter",
        }
    }

    /// Key used in sound profiles.
    pub fn key(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Pitch => "pitch",
            Self::Time => "time",
            Self::Reverb => "reverb",
            Self::Delay => "delay",
            Self::Filter => "filter",
        }
    }

    /// Position in [`ORDER`](Self::ORDER).
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FxSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A built-in effect: one node plus named parameters.
///
/// Parameters are stored here for persistence and forwarded to the node's
/// processor, which applies them on the audio thread.
pub struct FxUnit {
    slot: FxSlot,
    nodes: [ProcessingNode; 1],
    state: UnitState,
    params: BTreeMap<String, f32>,
}

impl FxUnit {
    /// Creates a bypassed unit around `processor`.
    pub fn new(slot: FxSlot, processor: Arc<dyn NodeProcessor>) -> Self {
        let node = ProcessingNode::new(slot.name(), processor);
        node.set_bypassed(true);
        Self {
            slot,
            nodes: [node],
            state: UnitState::Bypassed,
            params: BTreeMap::new(),
        }
    }

    /// Creates a bypassed unit that leaves audio untouched.
    pub fn passthrough(slot: FxSlot) -> Self {
        Self::new(slot, Arc::new(Passthrough))
    }

    /// The slot this unit fills.
    pub fn slot(&self) -> FxSlot {
        self.slot
    }

    /// The unit's node.
    pub fn node(&self) -> &ProcessingNode {
        &self.nodes[0]
    }

    /// Returns a parameter value, if set.
    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.params.get(name).copied()
    }

    /// Sets a parameter and forwards it to the processor.
    pub fn set_parameter(&mut self, name: &str, value: f32) {
        self.node().processor().set_parameter(name, value);
        self.params.insert(name.to_string(), value);
    }
}

impl EffectUnit for FxUnit {
    fn name(&self) -> &str {
        self.slot.name()
    }

    fn nodes(&self) -> &[ProcessingNode] {
        &self.nodes
    }

    fn state(&self) -> UnitState {
        self.state
    }

    fn set_state(&mut self, state: UnitState) {
        self.state = state;
        apply_bypass(&self.nodes, state);
    }

    fn settings(&self) -> UnitSettings {
        UnitSettings {
            state: self.state,
            params: self.params.clone(),
        }
    }

    fn apply_settings(&mut self, settings: &UnitSettings) {
        for (name, value) in &settings.params {
            self.set_parameter(name, *value);
        }
        self.set_state(settings.state);
    }
}

impl fmt::Debug for FxUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FxUnit")
            .field("slot", &self.slot)
            .field("node", &self.nodes[0].id())
            .field("state", &self.state)
            .field("params", &self.params)
            .finish()
    }
}
