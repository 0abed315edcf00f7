//! Effect units composed into the chain.
//!
//! A unit groups the nodes that implement one effect and owns its on/off
//! state. The graph has six built-in [`FxUnit`] slots in a fixed order, a
//! node-less [`MasterUnit`] that switches them together, and any number of
//! [`HostedAudioUnit`]s created through an [`AudioUnitHost`].

mod fx;
mod hosted;
mod master;

pub use fx::{FxSlot, FxUnit};
pub use hosted::{AudioUnitHost, AudioUnitType, GenericUnitHost, HostedAudioUnit};
pub use master::MasterUnit;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::ProcessingNode;
use crate::state::UnitSettings;

/// On/off state of an effect unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitState {
    /// Processing audio.
    Active,

    /// Switched off by the user.
    #[default]
    Bypassed,

    /// Active but switched off because the master unit is bypassed.
    Suppressed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Bypassed => "bypassed",
            Self::Suppressed => "suppressed",
        })
    }
}

/// An effect in the chain.
///
/// Every state other than [`UnitState::Active`] bypasses the unit's nodes;
/// the nodes stay attached and connected either way.
pub trait EffectUnit: Send {
    /// Display name.
    fn name(&self) -> &str;

    /// Nodes in signal order. May be empty.
    fn nodes(&self) -> &[ProcessingNode];

    /// Current state.
    fn state(&self) -> UnitState;

    /// Changes the state and updates the nodes' bypass flags.
    fn set_state(&mut self, state: UnitState);

    /// Returns `true` if the unit is processing audio.
    fn is_active(&self) -> bool {
        self.state() == UnitState::Active
    }

    /// Clears processing state such as reverb or delay tails.
    fn reset(&self) {
        for node in self.nodes() {
            node.reset();
        }
    }

    /// Exports state and parameters.
    fn settings(&self) -> UnitSettings;

    /// Restores state and parameters.
    fn apply_settings(&mut self, settings: &UnitSettings);
}

/// Applies a unit state to the bypass flag of every node.
pub(crate) fn apply_bypass(nodes: &[ProcessingNode], state: UnitState) {
    let bypassed = state != UnitState::Active;
    for node in nodes {
        node.set_bypassed(bypassed);
    }
}
