//! Master switch over all other units.

use std::collections::BTreeMap;

use crate::node::ProcessingNode;
use crate::state::UnitSettings;
use crate::units::{EffectUnit, UnitState};

/// Switches every other unit on and off together.
///
/// Bypassing the master suppresses every active unit; re-activating it
/// restores exactly the units it suppressed. Units the user had bypassed
/// stay bypassed. The master has no nodes of its own.
#[derive(Debug)]
pub struct MasterUnit {
    state: UnitState,
}

impl MasterUnit {
    /// Creates an active master.
    pub fn new() -> Self {
        Self {
            state: UnitState::Active,
        }
    }

    /// Changes the master state and propagates it to `units`.
    ///
    /// Returns the number of units whose state changed.
    pub fn switch<'a, I>(&mut self, state: UnitState, units: I) -> usize
    where
        I: IntoIterator<Item = &'a mut dyn EffectUnit>,
    {
        // The master itself is never suppressed
        let state = match state {
            UnitState::Suppressed => UnitState::Bypassed,
            other => other,
        };
        self.state = state;

        let (from, to) = match state {
            UnitState::Active => (UnitState::Suppressed, UnitState::Active),
            _ => (UnitState::Active, UnitState::Suppressed),
        };

        let mut changed = 0;
        for unit in units {
            if unit.state() == from {
                unit.set_state(to);
                changed += 1;
            }
        }
        tracing::debug!(state = %self.state, changed, "Master unit switched");
        changed
    }

    /// State a unit added now should start in.
    pub fn state_for_new_unit(&self) -> UnitState {
        if self.is_active() {
            UnitState::Active
        } else {
            UnitState::Suppressed
        }
    }
}

impl Default for MasterUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectUnit for MasterUnit {
    fn name(&self) -> &str {
        "Master"
    }

    fn nodes(&self) -> &[ProcessingNode] {
        &[]
    }

    fn state(&self) -> UnitState {
        self.state
    }

    /// Records the state only. Use [`switch`](MasterUnit::switch) to
    /// propagate it.
    fn set_state(&mut self, state: UnitState) {
        self.state = state;
    }

    fn settings(&self) -> UnitSettings {
        UnitSettings {
            state: self.state,
            params: BTreeMap::new(),
        }
    }

    fn apply_settings(&mut self, settings: &UnitSettings) {
        self.set_state(settings.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{FxSlot, FxUnit};

    fn units() -> Vec<FxUnit> {
        FxSlot::ORDER.iter().map(|&s| FxUnit::passthrough(s)).collect()
    }

    fn as_dyn(units: &mut [FxUnit]) -> impl Iterator<Item = &mut dyn EffectUnit> {
        units.iter_mut().map(|u| u as &mut dyn EffectUnit)
    }

    #[test]
    fn test_bypass_suppresses_active_units_only() {
        let mut fx = units();
        fx[0].set_state(UnitState::Active);
        fx[3].set_state(UnitState::Active);

        let mut master = MasterUnit::new();
        assert_eq!(master.switch(UnitState::Bypassed, as_dyn(&mut fx)), 2);

        assert_eq!(fx[0].state(), UnitState::Suppressed);
        assert_eq!(fx[1].state(), UnitState::Bypassed);
        assert!(fx[3].node().is_bypassed());
    }

    #[test]
    fn test_reactivate_restores_suppressed() {
        let mut fx = units();
        fx[2].set_state(UnitState::Active);

        let mut master = MasterUnit::new();
        master.switch(UnitState::Bypassed, as_dyn(&mut fx));
        master.switch(UnitState::Active, as_dyn(&mut fx));

        assert_eq!(fx[2].state(), UnitState::Active);
        assert!(!fx[2].node().is_bypassed());
        assert_eq!(fx[1].state(), UnitState::Bypassed);
    }

    #[test]
    fn test_new_unit_state_follows_master() {
        let mut master = MasterUnit::new();
        assert_eq!(master.state_for_new_unit(), UnitState::Active);
        master.switch(UnitState::Suppressed, std::iter::empty());
        assert_eq!(master.state(), UnitState::Bypassed);
        assert_eq!(master.state_for_new_unit(), UnitState::Suppressed);
    }
}
