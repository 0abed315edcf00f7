//! User-added audio units.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::{NodeProcessor, Passthrough, ProcessingNode};
use crate::state::{HostedUnitSettings, UnitSettings};
use crate::units::{apply_bypass, EffectUnit, UnitState};

/// Identifies a kind of audio unit a host can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUnitType {
    /// Component type code.
    pub component_type: u32,
    /// Component subtype code.
    pub component_subtype: u32,
}

impl AudioUnitType {
    /// Creates a unit type.
    pub const fn new(component_type: u32, component_subtype: u32) -> Self {
        Self {
            component_type,
            component_subtype,
        }
    }
}

impl fmt::Display for AudioUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}/{:#010x}", self.component_type, self.component_subtype)
    }
}

/// A third-party effect inserted into the removable part of the chain.
pub struct HostedAudioUnit {
    unit_type: AudioUnitType,
    name: String,
    nodes: [ProcessingNode; 1],
    state: UnitState,
    params: BTreeMap<String, f32>,
}

impl HostedAudioUnit {
    /// Creates an active unit around `processor`.
    pub fn new(
        unit_type: AudioUnitType,
        name: impl Into<String>,
        processor: Arc<dyn NodeProcessor>,
    ) -> Self {
        let name = name.into();
        let node = ProcessingNode::new(name.as_str(), processor);
        Self {
            unit_type,
            name,
            nodes: [node],
            state: UnitState::Active,
            params: BTreeMap::new(),
        }
    }

    /// The component this unit was created from.
    pub fn unit_type(&self) -> AudioUnitType {
        self.unit_type
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

    /// Exports the settings together with the unit type.
    pub fn hosted_settings(&self) -> HostedUnitSettings {
        HostedUnitSettings {
            unit_type: self.unit_type,
            settings: self.settings(),
        }
    }
}

impl EffectUnit for HostedAudioUnit {
    fn name(&self) -> &str {
        &self.name
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

impl fmt::Debug for HostedAudioUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedAudioUnit")
            .field("unit_type", &self.unit_type)
            .field("name", &self.name)
            .field("node", &self.nodes[0].id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Creates audio units on request.
pub trait AudioUnitHost: Send + Sync {
    /// Instantiates a unit, or returns `None` if the type is unknown.
    fn instantiate(&self, unit_type: AudioUnitType) -> Option<HostedAudioUnit>;
}

type ProcessorFactory = Arc<dyn Fn() -> Arc<dyn NodeProcessor> + Send + Sync>;

struct Registration {
    name: String,
    factory: ProcessorFactory,
}

/// An [`AudioUnitHost`] backed by an in-process registry.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioUnitHost, AudioUnitType, GenericUnitHost};
///
/// let limiter = AudioUnitType::new(0x6175_6678, 0x6c6d_7472);
/// let host = GenericUnitHost::new().with_unit(limiter, "Limiter");
///
/// assert!(host.instantiate(limiter).is_some());
/// assert!(host.instantiate(AudioUnitType::new(0, 0)).is_none());
/// ```
#[derive(Default)]
pub struct GenericUnitHost {
    units: HashMap<AudioUnitType, Registration>,
}

impl GenericUnitHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit type that leaves audio untouched.
    pub fn with_unit(self, unit_type: AudioUnitType, name: impl Into<String>) -> Self {
        self.with_processor(unit_type, name, || Arc::new(Passthrough))
    }

    /// Registers a unit type whose instances run a fresh processor from
    /// `factory`.
    pub fn with_processor<F>(
        mut self,
        unit_type: AudioUnitType,
        name: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn NodeProcessor> + Send + Sync + 'static,
    {
        self.units.insert(
            unit_type,
            Registration {
                name: name.into(),
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Registered unit types and their names.
    pub fn available(&self) -> Vec<(AudioUnitType, String)> {
        let mut units: Vec<_> = self
            .units
            .iter()
            .map(|(t, r)| (*t, r.name.clone()))
            .collect();
        units.sort();
        units
    }
}

impl AudioUnitHost for GenericUnitHost {
    fn instantiate(&self, unit_type: AudioUnitType) -> Option<HostedAudioUnit> {
        let registration = self.units.get(&unit_type)?;
        Some(HostedAudioUnit::new(
            unit_type,
            registration.name.clone(),
            (registration.factory)(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MixerProcessor;

    const LIMITER: AudioUnitType = AudioUnitType::new(1, 2);

    #[test]
    fn test_instances_get_distinct_nodes() {
        let host = GenericUnitHost::new().with_unit(LIMITER, "Limiter");
        let a = host.instantiate(LIMITER).unwrap();
        let b = host.instantiate(LIMITER).unwrap();
        assert_ne!(a.node().id(), b.node().id());
        assert_eq!(a.name(), "Limiter");
        assert!(a.is_active());
    }

    #[test]
    fn test_processor_factory_used() {
        let host = GenericUnitHost::new()
            .with_processor(LIMITER, "Gain", || Arc::new(MixerProcessor::new()));
        let mut unit = host.instantiate(LIMITER).unwrap();
        unit.set_parameter("gain", 0.5);

        let mut samples = [1.0f32; 4];
        unit.node()
            .processor()
            .process(&mut samples, crate::AudioFormat::cd());
        assert_eq!(samples, [0.5; 4]);
    }

    #[test]
    fn test_hosted_settings_carry_type() {
        let host = GenericUnitHost::new().with_unit(LIMITER, "Limiter");
        let mut unit = host.instantiate(LIMITER).unwrap();
        unit.set_state(UnitState::Bypassed);

        let saved = unit.hosted_settings();
        assert_eq!(saved.unit_type, LIMITER);
        assert_eq!(saved.settings.state, UnitState::Bypassed);
    }

    #[test]
    fn test_available_sorted() {
        let host = GenericUnitHost::new()
            .with_unit(AudioUnitType::new(2, 0), "B")
            .with_unit(AudioUnitType::new(1, 0), "A");
        let names: Vec<_> = host.available().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
