//! The audio graph facade.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::builder::AudioGraphBuilder;
use crate::device::{AudioDevice, DeviceCatalog};
use crate::engine::GraphEngine;
use crate::format::AudioFormat;
use crate::node::{PlayerProcessor, ProcessingNode};
use crate::pipeline::{RenderObserver, RenderObserverBridge};
use crate::runtime::Endpoint;
use crate::state::{AudioGraphState, SoundProfile, SoundProfiles, UnitSettings};
use crate::units::{
    AudioUnitHost, AudioUnitType, EffectUnit, FxSlot, FxUnit, HostedAudioUnit, MasterUnit,
    UnitState,
};
use crate::{EventCallback, GraphConfig, GraphError, GraphEvent, SoundProfilePolicy};

/// Key of the master unit in [`SoundProfile::effects`].
const MASTER_KEY: &str = "master";

/// An [`AudioGraph`] shared between tasks.
///
/// The mutex is the single writer for every lifecycle and topology change,
/// whether it comes from a user action or the device change listener.
pub type SharedAudioGraph = Arc<tokio::sync::Mutex<AudioGraph>>;

/// What the playback layer needs from the graph.
pub trait PlayerGraph {
    /// Reconnects the player with the format of the next track.
    fn reconnect_with_format(&mut self, format: AudioFormat) -> Result<(), GraphError>;

    /// Clears reverb and delay tails between tracks.
    fn clear_sound_tails(&self);

    /// Tears the graph down and rebuilds it.
    fn restart_audio_engine(&mut self) -> Result<(), GraphError>;
}

/// What a recorder needs from the graph.
pub trait RecorderGraph {
    /// The node whose output carries the mixed signal before effects.
    fn tap_node(&self) -> &ProcessingNode;
}

/// The audio output graph of a media player.
///
/// The chain is fixed at the front and user-managed at the back:
///
/// ```text
/// Player → Aux Mixer → EQ → Pitch → Time → Reverb → Delay → Filter → [audio units…] → Sink
/// ```
///
/// The built-in effects are always connected and switched on and off via
/// bypass. Hosted audio units are inserted and removed while audio is
/// playing; the chain is repaired in place without restarting the engine.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, AudioGraph, FxSlot, MockDeviceCatalog, MockRuntime, UnitState};
///
/// let mut graph = AudioGraph::builder()
///     .runtime(MockRuntime::new(AudioFormat::cd()))
///     .devices(MockDeviceCatalog::new(["Speakers"]))
///     .build()?;
///
/// graph.set_volume(0.8);
/// graph.set_unit_state(FxSlot::Reverb, UnitState::Active);
///
/// let state = graph.persistent_state();
/// assert_eq!(state.volume, Some(0.8));
/// # Ok::<(), audio_graph::GraphError>(())
/// ```
pub struct AudioGraph {
    pub(crate) engine: GraphEngine,
    pub(crate) bridge: RenderObserverBridge,
    pub(crate) devices: Arc<dyn DeviceCatalog>,
    pub(crate) unit_host: Arc<dyn AudioUnitHost>,
    pub(crate) player: ProcessingNode,
    pub(crate) player_processor: Arc<PlayerProcessor>,
    pub(crate) aux_mixer: ProcessingNode,
    /// Built-in units in [`FxSlot::ORDER`].
    pub(crate) fx: Vec<FxUnit>,
    pub(crate) master: MasterUnit,
    /// Hosted units, parallel to the chain's removable nodes.
    pub(crate) audio_units: Vec<HostedAudioUnit>,
    pub(crate) sound_profiles: SoundProfiles,
    /// Volume the user set, kept while muted.
    pub(crate) volume: f32,
    pub(crate) muted: bool,
    pub(crate) config: GraphConfig,
    pub(crate) event_callback: Option<EventCallback>,
    /// Output configuration changes reported by the runtime. Taken by the
    /// device change listener.
    pub(crate) config_changes: Option<mpsc::UnboundedReceiver<()>>,
}

impl AudioGraph {
    /// Creates a new builder for configuring the graph.
    pub fn builder() -> AudioGraphBuilder {
        AudioGraphBuilder::new()
    }

    /// Wraps the graph for sharing between tasks.
    pub fn into_shared(self) -> SharedAudioGraph {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    // ----- Player ------------------------------------------------------

    /// Player volume, 0.0 to 1.0. Unaffected by mute.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the player volume, clamped to 0.0 to 1.0.
    ///
    /// While muted the value is stored and applied on unmute.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if !self.muted {
            self.player_processor.set_volume(self.volume);
        }
    }

    /// Raises the volume by the configured step. Returns the new volume.
    pub fn increase_volume(&mut self) -> f32 {
        self.set_volume(self.volume + self.config.volume_delta);
        self.volume
    }

    /// Lowers the volume by the configured step. Returns the new volume.
    pub fn decrease_volume(&mut self) -> f32 {
        self.set_volume(self.volume - self.config.volume_delta);
        self.volume
    }

    /// Stereo balance, -1.0 (left) to 1.0 (right).
    pub fn balance(&self) -> f32 {
        self.player_processor.balance()
    }

    /// Sets the balance, clamped to -1.0 to 1.0.
    pub fn set_balance(&mut self, balance: f32) {
        self.player_processor.set_balance(balance.clamp(-1.0, 1.0));
    }

    /// Pans left by the configured step, stopping at centre when crossing
    /// it. Returns the new balance.
    pub fn pan_left(&mut self) -> f32 {
        let current = self.balance();
        let mut next = current - self.config.balance_delta;
        if current > 0.0 && next < 0.0 {
            next = 0.0;
        }
        self.set_balance(next);
        self.balance()
    }

    /// Pans right by the configured step, stopping at centre when crossing
    /// it. Returns the new balance.
    pub fn pan_right(&mut self) -> f32 {
        let current = self.balance();
        let mut next = current + self.config.balance_delta;
        if current < 0.0 && next > 0.0 {
            next = 0.0;
        }
        self.set_balance(next);
        self.balance()
    }

    /// Returns `true` if muted.
    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Mutes or unmutes.
    ///
    /// Muting writes zero to the player; unmuting writes back the stored
    /// volume unchanged.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.player_processor
            .set_volume(if muted { 0.0 } else { self.volume });
    }

    /// The player (source) node.
    pub fn player_node(&self) -> &ProcessingNode {
        &self.player
    }

    // ----- Engine ------------------------------------------------------

    /// The engine.
    pub fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    /// Returns `true` while rendering.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Reconnects the player to the aux mixer with `format`.
    ///
    /// Used on track changes whose sample rate or channel layout differ from
    /// the previous track.
    pub fn reconnect_player_node(&mut self, format: AudioFormat) -> Result<(), GraphError> {
        tracing::debug!(%format, "Reconnecting player node");
        self.engine.reconnect(
            self.player.id(),
            Endpoint::Node(self.aux_mixer.id()),
            format,
        )
    }

    /// Resets the reverb and delay units if they are active.
    pub fn clear_sound_tails(&self) {
        for slot in [FxSlot::Delay, FxSlot::Reverb] {
            let unit = self.fx_unit(slot);
            if unit.is_active() {
                unit.reset();
            }
        }
    }

    /// Tears the graph down and rebuilds it.
    ///
    /// Reports [`GraphEvent::EngineStartFailed`] if the engine does not come
    /// back up.
    pub fn restart_audio_engine(&mut self) -> Result<(), GraphError> {
        let result = self.engine.restart();
        if let Err(ref e) = result {
            self.emit_event(GraphEvent::EngineStartFailed {
                reason: e.to_string(),
            });
        }
        result
    }

    // ----- Devices -----------------------------------------------------

    /// Output devices currently available.
    pub fn available_devices(&self) -> Result<Vec<AudioDevice>, GraphError> {
        self.devices.list_devices()
    }

    /// The system default output device.
    pub fn system_device(&self) -> Result<AudioDevice, GraphError> {
        self.devices.system_device()
    }

    /// The device the graph renders to.
    pub fn output_device(&self) -> Result<AudioDevice, GraphError> {
        self.devices.output_device()
    }

    /// Switches output to `device` and restarts the output on it.
    pub fn set_output_device(&mut self, device: &AudioDevice) -> Result<(), GraphError> {
        if self
            .devices
            .output_device()
            .is_ok_and(|current| current.matches(device))
        {
            return Ok(());
        }
        self.devices.set_output_device(device)?;
        self.output_device_changed()
    }

    /// Output buffer size in frames.
    pub fn output_buffer_size(&self) -> u32 {
        self.devices.output_buffer_size()
    }

    /// Requests an output buffer size, applied the next time the output is
    /// opened.
    pub fn set_output_buffer_size(&mut self, frames: u32) {
        self.devices.set_output_buffer_size(frames);
    }

    /// Output sample rate in Hz.
    pub fn output_sample_rate(&self) -> u32 {
        self.devices.output_sample_rate()
    }

    /// Handles a change of output hardware.
    ///
    /// Re-applies the slice limit and starts the engine again on the new
    /// device. Existing edges stay as they are.
    pub fn output_device_changed(&mut self) -> Result<(), GraphError> {
        self.devices
            .set_max_frames_per_slice(self.config.visualization_buffer_size);

        match self.engine.start() {
            Ok(()) => {
                let buffer_size = self.devices.output_buffer_size();
                let sample_rate = self.devices.output_sample_rate();
                tracing::info!(buffer_size, sample_rate, "Output device changed");
                self.emit_event(GraphEvent::OutputDeviceChanged {
                    buffer_size,
                    sample_rate,
                });
                Ok(())
            }
            Err(e) => {
                if matches!(e, GraphError::EngineStart { .. }) {
                    self.emit_event(GraphEvent::EngineStartFailed {
                        reason: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Handles configuration changes the runtime reported since the last
    /// call. Returns the number of notices drained.
    ///
    /// Several notices in a row are handled as one device change. Returns 0
    /// once a device change listener owns the notices.
    pub fn process_device_changes(&mut self) -> usize {
        let Some(changes) = self.config_changes.as_mut() else {
            return 0;
        };
        let mut count = 0;
        while changes.try_recv().is_ok() {
            count += 1;
        }
        if count > 0 {
            if let Err(e) = self.output_device_changed() {
                tracing::warn!("Output device change not applied: {}", e);
            }
        }
        count
    }

    // ----- Audio units -------------------------------------------------

    /// A built-in effect unit.
    pub fn fx_unit(&self, slot: FxSlot) -> &FxUnit {
        &self.fx[slot.index()]
    }

    /// A built-in effect unit, mutably, for parameter changes.
    pub fn fx_unit_mut(&mut self, slot: FxSlot) -> &mut FxUnit {
        &mut self.fx[slot.index()]
    }

    /// The master unit.
    pub fn master_unit(&self) -> &MasterUnit {
        &self.master
    }

    /// Hosted audio units in chain order.
    pub fn audio_units(&self) -> &[HostedAudioUnit] {
        &self.audio_units
    }

    /// A hosted audio unit, mutably, for parameter changes.
    pub fn audio_unit_mut(&mut self, index: usize) -> Option<&mut HostedAudioUnit> {
        self.audio_units.get_mut(index)
    }

    /// Switches a built-in unit.
    ///
    /// Activating a unit while the master is bypassed activates the master
    /// too, which restores the units it had suppressed.
    pub fn set_unit_state(&mut self, slot: FxSlot, state: UnitState) {
        if state == UnitState::Active && !self.master.is_active() {
            self.set_master_state(UnitState::Active);
        }
        self.fx[slot.index()].set_state(state);
    }

    /// Switches a hosted unit. See [`set_unit_state`](Self::set_unit_state).
    pub fn set_audio_unit_state(&mut self, index: usize, state: UnitState) -> Result<(), GraphError> {
        let len = self.audio_units.len();
        if index >= len {
            return Err(GraphError::IndexOutOfRange { index, len });
        }
        if state == UnitState::Active && !self.master.is_active() {
            self.set_master_state(UnitState::Active);
        }
        self.audio_units[index].set_state(state);
        Ok(())
    }

    /// Switches the master unit and propagates it to every other unit.
    /// Returns the number of units whose state changed.
    pub fn set_master_state(&mut self, state: UnitState) -> usize {
        let units = self
            .fx
            .iter_mut()
            .map(|u| u as &mut dyn EffectUnit)
            .chain(self.audio_units.iter_mut().map(|u| u as &mut dyn EffectUnit));
        self.master.switch(state, units)
    }

    /// Instantiates a hosted audio unit and appends it to the chain while
    /// audio keeps playing.
    ///
    /// Returns the unit and its index among the hosted units.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAudioUnit` if the host cannot create the unit.
    pub fn add_audio_unit(
        &mut self,
        unit_type: AudioUnitType,
    ) -> Result<(&HostedAudioUnit, usize), GraphError> {
        let mut unit = self
            .unit_host
            .instantiate(unit_type)
            .ok_or(GraphError::UnknownAudioUnit {
                component_type: unit_type.component_type,
                component_subtype: unit_type.component_subtype,
            })?;
        unit.set_state(self.master.state_for_new_unit());

        self.emit_event(GraphEvent::GraphChanging);
        let result = self.engine.insert_node(unit.node().clone());
        self.emit_event(GraphEvent::GraphChanged);
        let index = result?;

        tracing::debug!(unit = unit.name(), index, "Audio unit added");
        self.audio_units.push(unit);
        Ok((&self.audio_units[index], index))
    }

    /// Removes hosted audio units.
    ///
    /// `indices` may be in any order and contain duplicates. All of them
    /// are validated before the chain is touched.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if any index does not refer to a unit.
    pub fn remove_audio_units(
        &mut self,
        indices: &[usize],
    ) -> Result<Vec<HostedAudioUnit>, GraphError> {
        let mut descending = indices.to_vec();
        descending.sort_unstable_by(|a, b| b.cmp(a));
        descending.dedup();

        let len = self.audio_units.len();
        if let Some(&index) = descending.first().filter(|&&index| index >= len) {
            return Err(GraphError::IndexOutOfRange { index, len });
        }
        if descending.is_empty() {
            return Ok(Vec::new());
        }

        self.emit_event(GraphEvent::GraphChanging);
        let result = self.engine.remove_nodes(&descending);
        self.emit_event(GraphEvent::GraphChanged);
        result?;

        let removed: Vec<HostedAudioUnit> = descending
            .iter()
            .map(|&index| self.audio_units.remove(index))
            .collect();
        tracing::debug!(count = removed.len(), "Audio units removed");
        Ok(removed)
    }

    // ----- Sound profiles ----------------------------------------------

    /// Saved sound profiles.
    pub fn sound_profiles(&self) -> &SoundProfiles {
        &self.sound_profiles
    }

    /// Saves the current volume, balance and effect settings for `file`.
    pub fn save_sound_profile(&mut self, file: impl Into<PathBuf>) {
        let profile = SoundProfile {
            file: file.into(),
            volume: self.volume,
            balance: self.balance(),
            effects: self.effect_settings(),
        };
        tracing::debug!(file = %profile.file.display(), "Sound profile saved");
        self.sound_profiles.insert(profile);
    }

    /// Applies the profile saved for `file`. Returns `false` if there is
    /// none.
    pub fn apply_sound_profile(&mut self, file: &Path) -> bool {
        let Some(profile) = self.sound_profiles.get(file).cloned() else {
            return false;
        };
        self.set_volume(profile.volume);
        self.set_balance(profile.balance);
        for unit in &mut self.fx {
            if let Some(settings) = profile.effects.get(unit.slot().key()) {
                unit.apply_settings(settings);
            }
        }
        // Through the switch, so hosted units follow the master too
        if let Some(settings) = profile.effects.get(MASTER_KEY) {
            self.set_master_state(settings.state);
        }
        tracing::debug!(file = %file.display(), "Sound profile applied");
        true
    }

    /// Deletes the profile saved for `file`.
    pub fn remove_sound_profile(&mut self, file: &Path) -> Option<SoundProfile> {
        self.sound_profiles.remove(file)
    }

    /// Saves and restores sound profiles around a track change, following
    /// the configured [`SoundProfilePolicy`].
    pub fn track_changed(&mut self, previous: Option<&Path>, next: Option<&Path>) {
        if let Some(previous) = previous {
            let save = match self.config.sound_profile_policy {
                SoundProfilePolicy::Never => false,
                SoundProfilePolicy::IndividualTracks => self.sound_profiles.contains(previous),
                SoundProfilePolicy::AllTracks => true,
            };
            if save {
                self.save_sound_profile(previous);
            }
        }
        if let Some(next) = next {
            self.apply_sound_profile(next);
        }
    }

    fn effect_settings(&self) -> BTreeMap<String, UnitSettings> {
        let mut effects: BTreeMap<String, UnitSettings> = self
            .fx
            .iter()
            .map(|unit| (unit.slot().key().to_string(), unit.settings()))
            .collect();
        effects.insert(MASTER_KEY.to_string(), self.master.settings());
        effects
    }

    // ----- Render observers --------------------------------------------

    /// Registers the render observer, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `NoAsyncRuntime` outside a tokio runtime.
    pub async fn register_render_observer(
        &mut self,
        observer: Arc<dyn RenderObserver>,
    ) -> Result<(), GraphError> {
        self.bridge
            .register(observer, self.engine.runtime_mut())
            .await
    }

    /// Unregisters `observer` if it is the registered one.
    ///
    /// Once this returns, `observer` is not invoked again.
    pub async fn remove_render_observer(&mut self, observer: &Arc<dyn RenderObserver>) {
        if self.bridge.is_current(observer).await {
            self.bridge.unregister(self.engine.runtime_mut()).await;
        }
    }

    // ----- State -------------------------------------------------------

    /// Exports everything the graph persists.
    pub fn persistent_state(&self) -> AudioGraphState {
        let mut state = AudioGraphState {
            output_device: self.devices.output_device().ok(),
            volume: Some(self.volume),
            muted: Some(self.muted),
            balance: Some(self.balance()),
            master_unit: Some(self.master.settings()),
            audio_units: self
                .audio_units
                .iter()
                .map(HostedAudioUnit::hosted_settings)
                .collect(),
            sound_profiles: self.sound_profiles.to_vec(),
            ..Default::default()
        };
        for unit in &self.fx {
            state.set_unit(unit.slot(), unit.settings());
        }
        state
    }

    /// Unregisters the render observer, stops the engine and detaches every
    /// node.
    pub async fn tear_down(&mut self) {
        self.bridge.unregister(self.engine.runtime_mut()).await;
        self.engine.tear_down();
    }

    pub(crate) fn emit_event(&self, event: GraphEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Applies runtime configuration changes from a background task.
///
/// The task locks `graph` for every change, so device changes are
/// serialized with all other mutations. It ends when the graph is dropped.
///
/// # Errors
///
/// Returns `NoAsyncRuntime` outside a tokio runtime, or `InvalidState` if a
/// listener is already running for this graph.
pub async fn spawn_device_change_listener(
    graph: &SharedAudioGraph,
) -> Result<JoinHandle<()>, GraphError> {
    let handle = Handle::try_current().map_err(|_| GraphError::NoAsyncRuntime)?;
    let mut changes = graph
        .lock()
        .await
        .config_changes
        .take()
        .ok_or(GraphError::InvalidState {
            operation: "listen for device changes",
            state: "already listening",
        })?;
    let weak = Arc::downgrade(graph);

    Ok(handle.spawn(async move {
        while changes.recv().await.is_some() {
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let mut graph = shared.lock().await;
            while changes.try_recv().is_ok() {}
            if let Err(e) = graph.output_device_changed() {
                tracing::warn!("Output device change not applied: {}", e);
            }
        }
        tracing::debug!("Device change listener stopped");
    }))
}

impl PlayerGraph for AudioGraph {
    fn reconnect_with_format(&mut self, format: AudioFormat) -> Result<(), GraphError> {
        self.reconnect_player_node(format)
    }

    fn clear_sound_tails(&self) {
        AudioGraph::clear_sound_tails(self);
    }

    fn restart_audio_engine(&mut self) -> Result<(), GraphError> {
        AudioGraph::restart_audio_engine(self)
    }
}

impl RecorderGraph for AudioGraph {
    fn tap_node(&self) -> &ProcessingNode {
        &self.aux_mixer
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("engine", &self.engine)
            .field("volume", &self.volume)
            .field("muted", &self.muted)
            .field("audio_units", &self.audio_units)
            .finish_non_exhaustive()
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.bridge.abort();
        self.engine.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceCatalog;
    use crate::node::NodeProcessor;
    use crate::runtime::{AudioRuntime, MockRuntime};
    use crate::units::GenericUnitHost;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const LIMITER: AudioUnitType = AudioUnitType::new(0x6175_6678, 1);
    const COMPRESSOR: AudioUnitType = AudioUnitType::new(0x6175_6678, 2);

    struct Fixture {
        graph: AudioGraph,
        runtime: MockRuntime,
        devices: MockDeviceCatalog,
        events: Arc<Mutex<Vec<GraphEvent>>>,
    }

    fn fixture() -> Fixture {
        let runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
        let devices = MockDeviceCatalog::new(["Speakers", "Headphones"]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let graph = AudioGraph::builder()
            .runtime(runtime.clone())
            .devices(devices.clone())
            .unit_host(
                GenericUnitHost::new()
                    .with_unit(LIMITER, "Limiter")
                    .with_unit(COMPRESSOR, "Compressor"),
            )
            .on_event(move |e| sink.lock().unwrap().push(e))
            .build()
            .unwrap();
        Fixture {
            graph,
            runtime,
            devices,
            events,
        }
    }

    #[test]
    fn test_mute_restores_exact_volume() {
        let Fixture {
            mut graph, runtime, ..
        } = fixture();
        graph.set_volume(0.333_333_34);
        graph.set_muted(true);
        assert_eq!(runtime.render(&[1.0, 1.0]), vec![0.0, 0.0]);

        graph.set_muted(false);
        assert_eq!(graph.volume(), 0.333_333_34);
        assert_eq!(
            runtime.render(&[1.0, 1.0]),
            vec![0.333_333_34, 0.333_333_34]
        );
    }

    #[test]
    fn test_volume_change_while_muted_applies_on_unmute() {
        let Fixture {
            mut graph, runtime, ..
        } = fixture();
        graph.set_muted(true);
        graph.set_volume(0.25);
        assert_eq!(runtime.render(&[1.0, 1.0]), vec![0.0, 0.0]);
        graph.set_muted(false);
        assert_eq!(runtime.render(&[1.0, 1.0]), vec![0.25, 0.25]);
    }

    #[test]
    fn test_volume_and_balance_clamped() {
        let Fixture { mut graph, .. } = fixture();
        graph.set_volume(1.5);
        assert_eq!(graph.volume(), 1.0);
        graph.set_balance(-3.0);
        assert_eq!(graph.balance(), -1.0);
        assert_eq!(graph.increase_volume(), 1.0);
    }

    #[test]
    fn test_pan_stops_at_centre() {
        let Fixture { mut graph, .. } = fixture();
        graph.set_balance(0.05);
        assert_eq!(graph.pan_left(), 0.0);
        assert!(graph.pan_left() < 0.0);
        graph.set_balance(-0.05);
        assert_eq!(graph.pan_right(), 0.0);
    }

    #[test]
    fn test_add_and_remove_audio_units() {
        let Fixture {
            mut graph,
            runtime,
            events,
            ..
        } = fixture();

        let (unit, index) = graph.add_audio_unit(LIMITER).unwrap();
        assert_eq!(unit.name(), "Limiter");
        assert_eq!(index, 0);
        let (_, index) = graph.add_audio_unit(COMPRESSOR).unwrap();
        assert_eq!(index, 1);
        assert_eq!(
            runtime.render_path()[8..],
            ["Limiter".to_string(), "Compressor".to_string()]
        );

        let removed = graph.remove_audio_units(&[0, 0]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(graph.audio_units()[0].name(), "Compressor");
        assert_eq!(runtime.render_path().last().unwrap(), "Compressor");
        assert!(runtime.violations().is_empty());

        let events = events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            [
                GraphEvent::GraphChanging,
                GraphEvent::GraphChanged,
                GraphEvent::GraphChanging,
                GraphEvent::GraphChanged,
                GraphEvent::GraphChanging,
                GraphEvent::GraphChanged,
            ]
        );
    }

    #[test]
    fn test_remove_unsorted_indices_canonicalised() {
        let Fixture {
            mut graph, runtime, ..
        } = fixture();
        for _ in 0..3 {
            graph.add_audio_unit(LIMITER).unwrap();
        }
        graph.remove_audio_units(&[0, 2]).unwrap();
        assert_eq!(graph.audio_units().len(), 1);
        assert_eq!(runtime.render_path().len(), 9);
        assert!(runtime.violations().is_empty());
    }

    #[test]
    fn test_remove_out_of_range_rejected_without_events() {
        let Fixture {
            mut graph, events, ..
        } = fixture();
        graph.add_audio_unit(LIMITER).unwrap();
        events.lock().unwrap().clear();

        let err = graph.remove_audio_units(&[0, 4]).unwrap_err();
        assert!(matches!(err, GraphError::IndexOutOfRange { index: 4, len: 1 }));
        assert_eq!(graph.audio_units().len(), 1);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_audio_unit() {
        let Fixture { mut graph, .. } = fixture();
        let err = graph.add_audio_unit(AudioUnitType::new(1, 1)).unwrap_err();
        assert!(matches!(err, GraphError::UnknownAudioUnit { .. }));
    }

    #[test]
    fn test_master_bypass_suppresses_and_restores() {
        let Fixture { mut graph, .. } = fixture();
        graph.set_unit_state(FxSlot::Eq, UnitState::Active);
        graph.add_audio_unit(LIMITER).unwrap();

        assert_eq!(graph.set_master_state(UnitState::Bypassed), 2);
        assert_eq!(graph.fx_unit(FxSlot::Eq).state(), UnitState::Suppressed);
        assert_eq!(graph.audio_units()[0].state(), UnitState::Suppressed);

        // Units added while the master is off start suppressed
        graph.add_audio_unit(COMPRESSOR).unwrap();
        assert_eq!(graph.audio_units()[1].state(), UnitState::Suppressed);

        graph.set_master_state(UnitState::Active);
        assert!(graph.fx_unit(FxSlot::Eq).is_active());
        assert!(graph.audio_units()[1].is_active());
        assert_eq!(graph.fx_unit(FxSlot::Pitch).state(), UnitState::Bypassed);
    }

    #[test]
    fn test_activating_unit_reactivates_master() {
        let Fixture { mut graph, .. } = fixture();
        graph.set_unit_state(FxSlot::Eq, UnitState::Active);
        graph.set_master_state(UnitState::Bypassed);

        graph.set_unit_state(FxSlot::Delay, UnitState::Active);
        assert!(graph.master_unit().is_active());
        assert!(graph.fx_unit(FxSlot::Eq).is_active());
    }

    #[derive(Default)]
    struct ResetCounter(AtomicUsize);

    impl NodeProcessor for ResetCounter {
        fn process(&self, _samples: &mut [f32], _format: AudioFormat) {}

        fn reset(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_clear_sound_tails_only_active_units() {
        let runtime = MockRuntime::default();
        let reverb = Arc::new(ResetCounter::default());
        let delay = Arc::new(ResetCounter::default());
        let mut graph = AudioGraph::builder()
            .runtime(runtime)
            .devices(MockDeviceCatalog::new(["Speakers"]))
            .fx_processor(FxSlot::Reverb, ArcProcessor(reverb.clone()))
            .fx_processor(FxSlot::Delay, ArcProcessor(delay.clone()))
            .build()
            .unwrap();

        graph.set_unit_state(FxSlot::Reverb, UnitState::Active);
        graph.clear_sound_tails();
        assert_eq!(reverb.0.load(Ordering::SeqCst), 1);
        assert_eq!(delay.0.load(Ordering::SeqCst), 0);
    }

    struct ArcProcessor(Arc<ResetCounter>);

    impl NodeProcessor for ArcProcessor {
        fn process(&self, samples: &mut [f32], format: AudioFormat) {
            self.0.process(samples, format);
        }

        fn reset(&self) {
            self.0.reset();
        }
    }

    #[test]
    fn test_reconnect_player_node_sets_format() {
        let Fixture {
            mut graph, runtime, ..
        } = fixture();
        let format = AudioFormat::new(96_000, 2);
        graph.reconnect_with_format(format).unwrap();
        assert_eq!(runtime.edge_format(graph.player_node().id()), Some(format));
        assert_eq!(
            runtime.successor(graph.player_node().id()),
            Some(Endpoint::Node(graph.tap_node().id()))
        );
    }

    #[test]
    fn test_device_change_restarts_output_without_new_edges() {
        let Fixture {
            mut graph,
            runtime,
            events,
            ..
        } = fixture();
        let edges = runtime.edges();

        runtime.fire_device_change();
        assert_eq!(graph.process_device_changes(), 1);
        assert_eq!(runtime.start_count(), 2);
        assert_eq!(runtime.edges(), edges);
        assert!(events.lock().unwrap().contains(&GraphEvent::OutputDeviceChanged {
            buffer_size: 512,
            sample_rate: 44_100,
        }));
    }

    #[test]
    fn test_set_output_device() {
        let Fixture {
            mut graph,
            runtime,
            devices,
            ..
        } = fixture();
        let headphones = AudioDevice::new("Headphones", "Headphones");
        graph.set_output_device(&headphones).unwrap();
        assert_eq!(devices.output_device().unwrap(), headphones);
        assert_eq!(runtime.start_count(), 2);

        // Same device again is a no-op
        graph.set_output_device(&headphones).unwrap();
        assert_eq!(runtime.start_count(), 2);

        let missing = AudioDevice::new("USB DAC", "usb");
        assert!(graph.set_output_device(&missing).is_err());
    }

    #[test]
    fn test_sound_profile_policy_individual_tracks() {
        let Fixture { mut graph, .. } = fixture();
        let a = Path::new("/music/a.flac");
        let b = Path::new("/music/b.flac");

        graph.set_volume(0.9);
        graph.save_sound_profile(a);

        // b has no profile, so nothing is saved for it
        graph.track_changed(None, Some(b));
        graph.set_volume(0.2);
        graph.track_changed(Some(b), Some(a));
        assert!(!graph.sound_profiles().contains(b));
        assert_eq!(graph.volume(), 0.9);

        graph.set_unit_state(FxSlot::Time, UnitState::Active);
        graph.set_volume(0.6);
        graph.track_changed(Some(a), None);
        let profile = graph.sound_profiles().get(a).unwrap();
        assert_eq!(profile.volume, 0.6);
        assert_eq!(profile.effects["time"].state, UnitState::Active);
    }

    #[test]
    fn test_apply_sound_profile_restores_effects() {
        let Fixture { mut graph, .. } = fixture();
        let track = Path::new("/music/a.flac");
        graph.set_unit_state(FxSlot::Reverb, UnitState::Active);
        graph.fx_unit_mut(FxSlot::Reverb).set_parameter("mix", 0.4);
        graph.save_sound_profile(track);

        graph.set_unit_state(FxSlot::Reverb, UnitState::Bypassed);
        graph.fx_unit_mut(FxSlot::Reverb).set_parameter("mix", 0.1);

        assert!(graph.apply_sound_profile(track));
        assert!(graph.fx_unit(FxSlot::Reverb).is_active());
        assert_eq!(graph.fx_unit(FxSlot::Reverb).parameter("mix"), Some(0.4));

        assert!(graph.remove_sound_profile(track).is_some());
        assert!(!graph.apply_sound_profile(track));
    }

    #[test]
    fn test_profile_master_state_reaches_hosted_units() {
        let Fixture { mut graph, .. } = fixture();
        let track = Path::new("/music/a.flac");
        graph.add_audio_unit(LIMITER).unwrap();
        graph.save_sound_profile(track);

        graph.set_master_state(UnitState::Bypassed);
        assert_eq!(graph.audio_units()[0].state(), UnitState::Suppressed);

        assert!(graph.apply_sound_profile(track));
        assert!(graph.master_unit().is_active());
        assert!(graph.audio_units()[0].is_active());
        assert!(!graph.audio_units()[0].node().is_bypassed());

        // And back: a bypassed master in the profile suppresses them again
        graph.set_master_state(UnitState::Bypassed);
        graph.save_sound_profile(track);
        graph.set_master_state(UnitState::Active);
        assert!(graph.apply_sound_profile(track));
        assert!(!graph.master_unit().is_active());
        assert_eq!(graph.audio_units()[0].state(), UnitState::Suppressed);
    }

    #[tokio::test]
    async fn test_device_change_after_tear_down_is_not_a_start_failure() {
        let Fixture {
            mut graph, events, ..
        } = fixture();
        graph.tear_down().await;
        events.lock().unwrap().clear();

        let err = graph.output_device_changed().unwrap_err();
        assert!(matches!(err, GraphError::InvalidState { .. }));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_device_change_start_failure_reported() {
        let Fixture {
            mut graph,
            runtime,
            events,
            ..
        } = fixture();
        runtime.set_start_failure(Some("device busy"));

        assert!(graph.output_device_changed().is_err());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GraphEvent::EngineStartFailed { .. })));
    }

    #[test]
    fn test_persistent_state_round_trip() {
        let Fixture {
            mut graph, devices, ..
        } = fixture();
        graph.set_volume(0.7);
        graph.set_balance(0.3);
        graph.set_unit_state(FxSlot::Filter, UnitState::Active);
        graph.add_audio_unit(LIMITER).unwrap();
        graph.save_sound_profile("/music/a.flac");
        let state = graph.persistent_state();
        drop(graph);

        let runtime = MockRuntime::default();
        let restored = AudioGraph::builder()
            .runtime(runtime.clone())
            .devices(devices)
            .unit_host(GenericUnitHost::new().with_unit(LIMITER, "Limiter"))
            .state(state.clone())
            .build()
            .unwrap();

        assert_eq!(restored.persistent_state(), state);
        assert_eq!(runtime.render_path().len(), 9);
    }

    #[tokio::test]
    async fn test_tear_down_detaches_everything() {
        let Fixture {
            mut graph, runtime, ..
        } = fixture();
        graph.tear_down().await;
        assert!(!graph.is_running());
        assert!(runtime.attached().is_empty());
        assert!(!runtime.has_render_callbacks());
    }

    #[tokio::test]
    async fn test_device_change_listener() {
        let Fixture {
            graph,
            runtime,
            events,
            ..
        } = fixture();
        let shared = graph.into_shared();
        let listener = spawn_device_change_listener(&shared).await.unwrap();
        assert!(spawn_device_change_listener(&shared).await.is_err());

        runtime.fire_device_change();
        for _ in 0..200 {
            if runtime.start_count() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(runtime.start_count(), 2);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GraphEvent::OutputDeviceChanged { .. })));

        // The mock runtime outlives the graph here, so the notice channel
        // stays open
        listener.abort();
        drop(shared);
    }
}
