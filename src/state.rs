//! Persisted graph state.
//!
//! The graph exports its settings as an [`AudioGraphState`] and can be rebuilt
//! from one. The JSON shape uses camelCase keys:
//!
//! ```text
//! { outputDevice: {name, uid}, volume, muted, balance,
//!   masterUnit, eqUnit, pitchUnit, timeUnit, reverbUnit, delayUnit, filterUnit,
//!   audioUnits: [...], soundProfiles: [{file, volume, balance, effects}] }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::AudioDevice;
use crate::units::{AudioUnitType, FxSlot, UnitState};
use crate::GraphError;

/// State and parameters of one effect unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitSettings {
    /// On/off state.
    pub state: UnitState,
    /// Named parameters.
    pub params: BTreeMap<String, f32>,
}

impl UnitSettings {
    /// Settings with the given state and no parameters.
    pub fn with_state(state: UnitState) -> Self {
        Self {
            state,
            params: BTreeMap::new(),
        }
    }
}

/// Settings of a hosted audio unit, including what to instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedUnitSettings {
    /// Component to instantiate.
    #[serde(flatten)]
    pub unit_type: AudioUnitType,
    /// State and parameters.
    #[serde(flatten)]
    pub settings: UnitSettings,
}

/// Per-track overrides, restored when the track plays again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundProfile {
    /// Track file the profile belongs to.
    pub file: PathBuf,
    /// Player volume.
    pub volume: f32,
    /// Player balance.
    pub balance: f32,
    /// Unit settings keyed by `"master"` or an [`FxSlot::key`].
    #[serde(default)]
    pub effects: BTreeMap<String, UnitSettings>,
}

/// Sound profiles keyed by track file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoundProfiles {
    profiles: BTreeMap<PathBuf, SoundProfile>,
}

impl SoundProfiles {
    /// Builds the collection from persisted profiles. Later duplicates win.
    pub fn from_profiles(profiles: impl IntoIterator<Item = SoundProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.file.clone(), p))
                .collect(),
        }
    }

    /// Returns the profile for `file`.
    pub fn get(&self, file: &Path) -> Option<&SoundProfile> {
        self.profiles.get(file)
    }

    /// Returns `true` if `file` has a profile.
    pub fn contains(&self, file: &Path) -> bool {
        self.profiles.contains_key(file)
    }

    /// Adds or replaces a profile.
    pub fn insert(&mut self, profile: SoundProfile) {
        self.profiles.insert(profile.file.clone(), profile);
    }

    /// Removes and returns the profile for `file`.
    pub fn remove(&mut self, file: &Path) -> Option<SoundProfile> {
        self.profiles.remove(file)
    }

    /// Number of profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns `true` if there are no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profiles ordered by file.
    pub fn to_vec(&self) -> Vec<SoundProfile> {
        self.profiles.values().cloned().collect()
    }
}

/// Everything the graph persists between runs.
///
/// Missing fields fall back to defaults when the graph is built.
///
/// # Example
///
/// ```
/// use audio_graph::AudioGraphState;
///
/// let state = AudioGraphState::from_json(r#"{ "volume": 0.8, "muted": true }"#)?;
/// assert_eq!(state.volume, Some(0.8));
/// assert!(state.audio_units.is_empty());
/// # Ok::<(), audio_graph::GraphError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioGraphState {
    /// Selected output device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<AudioDevice>,
    /// Player volume, 0.0 to 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    /// Mute state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    /// Player balance, -1.0 (left) to 1.0 (right).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f32>,

    /// Master unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_unit: Option<UnitSettings>,
    /// Equalizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq_unit: Option<UnitSettings>,
    /// Pitch shift.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_unit: Option<UnitSettings>,
    /// Time stretch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<UnitSettings>,
    /// Reverb.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverb_unit: Option<UnitSettings>,
    /// Delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_unit: Option<UnitSettings>,
    /// Filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_unit: Option<UnitSettings>,

    /// Hosted audio units in chain order.
    pub audio_units: Vec<HostedUnitSettings>,
    /// Per-track sound profiles.
    pub sound_profiles: Vec<SoundProfile>,
}

impl AudioGraphState {
    /// Settings of a built-in slot.
    pub fn unit(&self, slot: FxSlot) -> Option<&UnitSettings> {
        match slot {
            FxSlot::Eq => self.eq_unit.as_ref(),
            FxSlot::Pitch => self.pitch_unit.as_ref(),
            FxSlot::Time => self.time_unit.as_ref(),
            FxSlot::Reverb => self.reverb_unit.as_ref(),
            FxSlot::Delay => self.delay_unit.as_ref(),
            FxSlot::Filter => self.filter_unit.as_ref(),
        }
    }

    /// Replaces the settings of a built-in slot.
    pub fn set_unit(&mut self, slot: FxSlot, settings: UnitSettings) {
        let field = match slot {
            FxSlot::Eq => &mut self.eq_unit,
            FxSlot::Pitch => &mut self.pitch_unit,
            FxSlot::Time => &mut self.time_unit,
            FxSlot::Reverb => &mut self.reverb_unit,
            FxSlot::Delay => &mut self.delay_unit,
            FxSlot::Filter => &mut self.filter_unit,
        };
        *field = Some(settings);
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses JSON.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the state to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GraphError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| GraphError::persistence(path, e))?;
        tracing::debug!(path = %path.display(), "Audio graph state saved");
        Ok(())
    }

    /// Reads the state from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| GraphError::persistence(path, e))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state() -> AudioGraphState {
        let mut state = AudioGraphState {
            output_device: Some(AudioDevice::new("Speakers", "Speakers")),
            volume: Some(0.7),
            muted: Some(false),
            balance: Some(-0.2),
            ..Default::default()
        };
        state.set_unit(FxSlot::Reverb, UnitSettings::with_state(UnitState::Active));
        state.audio_units.push(HostedUnitSettings {
            unit_type: AudioUnitType::new(1, 2),
            settings: UnitSettings::default(),
        });
        state.sound_profiles.push(SoundProfile {
            file: PathBuf::from("/music/a.flac"),
            volume: 0.4,
            balance: 0.0,
            effects: BTreeMap::new(),
        });
        state
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let json = sample_state().to_json().unwrap();
        assert!(json.contains("\"outputDevice\""));
        assert!(json.contains("\"reverbUnit\""));
        assert!(json.contains("\"componentType\": 1"));
        assert!(json.contains("\"soundProfiles\""));
        assert!(!json.contains("\"eqUnit\""));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audio-graph.json");

        let state = sample_state();
        state.save(&path).unwrap();
        assert_eq!(AudioGraphState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = AudioGraphState::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, GraphError::Persistence { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = AudioGraphState::from_json("{ not json").unwrap_err();
        assert!(matches!(err, GraphError::Serialization(_)));
    }

    #[test]
    fn test_unknown_state_defaults() {
        let state = AudioGraphState::from_json("{}").unwrap();
        assert_eq!(state, AudioGraphState::default());
        assert!(state.unit(FxSlot::Eq).is_none());
    }

    #[test]
    fn test_sound_profiles_keyed_by_file() {
        let profile = |volume| SoundProfile {
            file: PathBuf::from("/music/a.flac"),
            volume,
            balance: 0.0,
            effects: BTreeMap::new(),
        };
        let profiles = SoundProfiles::from_profiles([profile(0.1), profile(0.9)]);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles.get(Path::new("/music/a.flac")).unwrap().volume, 0.9);
    }
}
