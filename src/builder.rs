//! Builder pattern for `AudioGraph`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio_graph::AudioGraph;
use crate::chain::NodeChain;
use crate::device::{AudioDevice, CpalDeviceCatalog, DeviceCatalog};
use crate::engine::GraphEngine;
use crate::node::{MixerProcessor, NodeProcessor, Passthrough, PlayerProcessor, ProcessingNode};
use crate::pipeline::RenderObserverBridge;
use crate::runtime::{AudioRuntime, CpalRuntime};
use crate::state::{AudioGraphState, SoundProfiles};
use crate::units::{AudioUnitHost, EffectUnit, FxSlot, FxUnit, GenericUnitHost, MasterUnit};
use crate::{event_callback, EventCallback, GraphConfig, GraphError, GraphEvent};

/// Builder for configuring and starting an [`AudioGraph`].
///
/// Use [`AudioGraph::builder()`] to create a new builder. Without a runtime
/// and device catalog the graph renders to the system output through CPAL.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioFormat, AudioGraph, MockDeviceCatalog, MockRuntime};
///
/// let runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
/// let graph = AudioGraph::builder()
///     .runtime(runtime.clone())
///     .devices(MockDeviceCatalog::new(["Speakers"]))
///     .on_event(|e| tracing::debug!(?e, "graph event"))
///     .build()?;
///
/// assert!(graph.is_running());
/// assert!(runtime.violations().is_empty());
/// # Ok::<(), audio_graph::GraphError>(())
/// ```
#[must_use]
pub struct AudioGraphBuilder {
    /// Runtime override.
    runtime: Option<Box<dyn AudioRuntime>>,
    /// Device catalog override.
    devices: Option<Arc<dyn DeviceCatalog>>,
    /// Audio unit host override.
    unit_host: Option<Arc<dyn AudioUnitHost>>,
    /// State restored on build.
    state: AudioGraphState,
    /// Processors for the built-in slots.
    processors: BTreeMap<FxSlot, Arc<dyn NodeProcessor>>,
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Graph configuration.
    config: GraphConfig,
}

impl Default for AudioGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioGraphBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            runtime: None,
            devices: None,
            unit_host: None,
            state: AudioGraphState::default(),
            processors: BTreeMap::new(),
            event_callback: None,
            config: GraphConfig::default(),
        }
    }

    /// Renders through `runtime` instead of CPAL.
    pub fn runtime<R: AudioRuntime + 'static>(mut self, runtime: R) -> Self {
        self.runtime = Some(Box::new(runtime));
        self
    }

    /// Uses `devices` to enumerate and select output devices.
    ///
    /// When no runtime is set, the CPAL runtime still follows its own
    /// [`CpalDeviceCatalog`]; set both together.
    pub fn devices<D: DeviceCatalog + 'static>(mut self, devices: D) -> Self {
        self.devices = Some(Arc::new(devices));
        self
    }

    /// Creates hosted audio units through `host`.
    ///
    /// Default: an empty [`GenericUnitHost`], which knows no units.
    pub fn unit_host<H: AudioUnitHost + 'static>(mut self, host: H) -> Self {
        self.unit_host = Some(Arc::new(host));
        self
    }

    /// Restores settings saved by [`AudioGraph::persistent_state()`].
    pub fn state(mut self, state: AudioGraphState) -> Self {
        self.state = state;
        self
    }

    /// Runs `processor` in a built-in effect slot.
    ///
    /// Slots without a processor leave audio untouched.
    pub fn fx_processor<P: NodeProcessor + 'static>(mut self, slot: FxSlot, processor: P) -> Self {
        self.processors.insert(slot, Arc::new(processor));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include graph changes, device changes, engine start failures
    /// and dropped render buffers.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(GraphEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom graph configuration.
    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the graph and starts the engine.
    ///
    /// A failure to start the engine is not an error: it is logged, reported
    /// as [`GraphEvent::EngineStartFailed`], and the graph stays connected
    /// but silent until the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain cannot be built.
    pub fn build(self) -> Result<AudioGraph, GraphError> {
        let Self {
            runtime,
            devices,
            unit_host,
            state,
            mut processors,
            event_callback,
            config,
        } = self;

        let (runtime, devices): (Box<dyn AudioRuntime>, Arc<dyn DeviceCatalog>) =
            match (runtime, devices) {
                (Some(runtime), Some(devices)) => (runtime, devices),
                (Some(runtime), None) => (runtime, Arc::new(CpalDeviceCatalog::new())),
                (None, devices) => {
                    let catalog = CpalDeviceCatalog::new();
                    let runtime = Box::new(CpalRuntime::new(&catalog));
                    (runtime, devices.unwrap_or_else(|| Arc::new(catalog)))
                }
            };
        let unit_host = unit_host.unwrap_or_else(|| Arc::new(GenericUnitHost::new()));

        if let Some(ref remembered) = state.output_device {
            restore_output_device(devices.as_ref(), remembered);
        }

        // Player volume, balance and mute
        let volume = state.volume.unwrap_or(config.default_volume).clamp(0.0, 1.0);
        let balance = state
            .balance
            .unwrap_or(config.default_balance)
            .clamp(-1.0, 1.0);
        let muted = state.muted.unwrap_or(false);
        let player_processor = Arc::new(PlayerProcessor::new(
            if muted { 0.0 } else { volume },
            balance,
        ));
        let player = ProcessingNode::new("Player", player_processor.clone());
        let aux_mixer = ProcessingNode::new("Aux Mixer", Arc::new(MixerProcessor::new()));

        // Built-in effects, fixed order
        let fx: Vec<FxUnit> = FxSlot::ORDER
            .iter()
            .map(|&slot| {
                let processor = processors
                    .remove(&slot)
                    .unwrap_or_else(|| Arc::new(Passthrough));
                let mut unit = FxUnit::new(slot, processor);
                if let Some(settings) = state.unit(slot) {
                    unit.apply_settings(settings);
                }
                unit
            })
            .collect();

        let mut master = MasterUnit::new();
        if let Some(ref settings) = state.master_unit {
            master.apply_settings(settings);
        }

        // Hosted units the host no longer knows are skipped
        let mut audio_units = Vec::with_capacity(state.audio_units.len());
        for saved in &state.audio_units {
            match unit_host.instantiate(saved.unit_type) {
                Some(mut unit) => {
                    unit.apply_settings(&saved.settings);
                    audio_units.push(unit);
                }
                None => {
                    tracing::warn!(
                        unit_type = %saved.unit_type,
                        "Skipping persisted audio unit, host cannot instantiate it"
                    );
                }
            }
        }

        let permanent: Vec<ProcessingNode> = [player.clone(), aux_mixer.clone()]
            .into_iter()
            .chain(fx.iter().map(|unit| unit.node().clone()))
            .collect();
        let removable: Vec<ProcessingNode> =
            audio_units.iter().map(|unit| unit.node().clone()).collect();

        let mut engine = GraphEngine::new(runtime, NodeChain::new(permanent, removable)?);
        engine.build()?;

        devices.set_max_frames_per_slice(config.visualization_buffer_size);

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        engine
            .runtime_mut()
            .set_configuration_change_handler(Arc::new(move || {
                let _ = change_tx.send(());
            }));

        let bridge = RenderObserverBridge::new(Arc::clone(&devices), &config, event_callback.clone());

        tracing::info!(
            nodes = engine.chain().node_count(),
            audio_units = audio_units.len(),
            "Audio graph built"
        );

        let mut graph = AudioGraph {
            engine,
            bridge,
            devices,
            unit_host,
            player,
            player_processor,
            aux_mixer,
            fx,
            master,
            audio_units,
            sound_profiles: SoundProfiles::from_profiles(state.sound_profiles),
            volume,
            muted,
            config,
            event_callback,
            config_changes: Some(change_rx),
        };

        if let Err(e) = graph.engine.start() {
            graph.emit_event(GraphEvent::EngineStartFailed {
                reason: e.to_string(),
            });
        }
        Ok(graph)
    }
}

/// Selects the remembered device if the catalog still lists it.
fn restore_output_device(devices: &dyn DeviceCatalog, remembered: &AudioDevice) {
    let available = match devices.list_devices() {
        Ok(available) => available,
        Err(e) => {
            tracing::warn!("Could not list output devices: {}", e);
            return;
        }
    };

    match available.iter().find(|d| d.matches(remembered)) {
        Some(device) => {
            if let Err(e) = devices.set_output_device(device) {
                tracing::warn!("Could not restore output device {}: {}", device.name, e);
            } else {
                tracing::info!(device = %device.name, "Restored output device");
            }
        }
        None => {
            tracing::info!(
                device = %remembered.name,
                "Remembered output device not available, using current device"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceCatalog;
    use crate::format::AudioFormat;
    use crate::runtime::{Endpoint, MockRuntime};
    use crate::state::{HostedUnitSettings, UnitSettings};
    use crate::units::{AudioUnitType, UnitState};
    use std::sync::Mutex;

    fn mock_builder() -> (AudioGraphBuilder, MockRuntime, MockDeviceCatalog) {
        let runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
        let devices = MockDeviceCatalog::new(["Speakers", "Headphones"]);
        let builder = AudioGraph::builder()
            .runtime(runtime.clone())
            .devices(devices.clone());
        (builder, runtime, devices)
    }

    #[test]
    fn test_build_connects_fixed_order() {
        let (builder, runtime, _) = mock_builder();
        let graph = builder.build().unwrap();

        assert!(graph.is_running());
        assert_eq!(
            runtime.render_path(),
            vec!["Player", "Aux Mixer", "EQ", "Pitch", "Time", "Reverb", "Delay", "Filter"]
        );
        assert_eq!(
            runtime.walk_from(graph.player_node().id()).last(),
            Some(&Endpoint::Sink)
        );
        assert!(runtime.violations().is_empty());
    }

    #[test]
    fn test_build_sets_slice_limit() {
        let (builder, _, devices) = mock_builder();
        let _graph = builder.build().unwrap();
        assert_eq!(devices.max_frames_per_slice(), Some(2048));
    }

    #[test]
    fn test_build_restores_remembered_device() {
        let (builder, _, devices) = mock_builder();
        let state = AudioGraphState {
            output_device: Some(AudioDevice::new("Headphones", "Headphones")),
            ..Default::default()
        };
        let _graph = builder.state(state).build().unwrap();
        assert_eq!(devices.output_device().unwrap().name, "Headphones");
    }

    #[test]
    fn test_build_ignores_missing_device() {
        let (builder, _, devices) = mock_builder();
        let state = AudioGraphState {
            output_device: Some(AudioDevice::new("USB DAC", "usb-1")),
            ..Default::default()
        };
        let _graph = builder.state(state).build().unwrap();
        assert_eq!(devices.output_device().unwrap().name, "Speakers");
    }

    #[test]
    fn test_build_restores_units_and_skips_unknown() {
        let (builder, runtime, _) = mock_builder();
        let known = AudioUnitType::new(1, 1);
        let mut state = AudioGraphState::default();
        state.set_unit(FxSlot::Reverb, UnitSettings::with_state(UnitState::Active));
        for unit_type in [known, AudioUnitType::new(9, 9)] {
            state.audio_units.push(HostedUnitSettings {
                unit_type,
                settings: UnitSettings::with_state(UnitState::Active),
            });
        }

        let graph = builder
            .unit_host(GenericUnitHost::new().with_unit(known, "Limiter"))
            .state(state)
            .build()
            .unwrap();

        assert_eq!(graph.audio_units().len(), 1);
        assert!(graph.fx_unit(FxSlot::Reverb).is_active());
        assert_eq!(runtime.render_path().last().map(String::as_str), Some("Limiter"));
    }

    #[test]
    fn test_start_failure_reported_not_fatal() {
        let (builder, runtime, _) = mock_builder();
        runtime.set_start_failure(Some("device busy"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let graph = builder
            .on_event(move |e| sink.lock().unwrap().push(e))
            .build()
            .unwrap();

        assert!(!graph.is_running());
        assert!(matches!(
            events.lock().unwrap().as_slice(),
            [GraphEvent::EngineStartFailed { .. }]
        ));
        assert_eq!(runtime.edges().len(), 8);
    }

    #[test]
    fn test_muted_state_silences_player() {
        let (builder, runtime, _) = mock_builder();
        let state = AudioGraphState {
            volume: Some(0.8),
            muted: Some(true),
            ..Default::default()
        };
        let graph = builder.state(state).build().unwrap();

        assert!(graph.muted());
        assert!((graph.volume() - 0.8).abs() < f32::EPSILON);
        assert_eq!(runtime.render(&[1.0, 1.0]), vec![0.0, 0.0]);
    }
}
