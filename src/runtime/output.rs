//! CPAL output runtime.
//!
//! The control side keeps the staged [`Topology`]. On commit it compiles the
//! path into the sink into a flat render plan and hands it to the audio
//! thread through a lock-free command ring. Whatever the audio thread
//! replaces (old plans, taps, feeds) travels back through a second ring and
//! is dropped on the control side, so the callback never frees memory.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::{Mutex, RwLock};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::device::{
    reconcile_selection, resolve_output_device, CpalDeviceCatalog, OutputSelection,
};
use crate::format::AudioFormat;
use crate::node::{NodeId, NodeProcessor, ProcessingNode};
use crate::runtime::{
    AudioRuntime, Endpoint, Notification, RenderCallbacks, RenderInfo, RenderSink, Topology,
};
use crate::GraphError;

/// Pending control messages the audio thread can hold.
const COMMAND_CAPACITY: usize = 64;

/// Interleaved samples rendered per pass when converting to the device format.
const SCRATCH_SAMPLES: usize = 16_384;

/// Wrapper to hold `cpal::Stream` in a `Send` context.
///
/// # Safety
/// `cpal::Stream` is `!Send` due to platform internals. The handle is only
/// created, replaced and dropped through `&mut CpalRuntime`, which the
/// engine owns exclusively.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

#[allow(unsafe_code)]
unsafe impl Send for StreamHandle {}

struct Stage {
    processor: Arc<dyn NodeProcessor>,
    bypassed: Arc<AtomicBool>,
}

#[derive(Default)]
struct RenderPlan {
    stages: Vec<Stage>,
}

impl RenderPlan {
    fn compile(order: &[ProcessingNode]) -> Self {
        Self {
            stages: order
                .iter()
                .map(|node| Stage {
                    processor: Arc::clone(node.processor()),
                    bypassed: node.bypass_flag(),
                })
                .collect(),
        }
    }
}

enum RtCommand {
    SetPlan(Box<RenderPlan>),
    InstallTap(Box<dyn RenderSink>),
    RemoveTap,
    SetFeed(HeapCons<f32>),
}

// Payloads are only held to be dropped on the control side
#[allow(dead_code)]
enum Retired {
    Plan(Box<RenderPlan>),
    Tap(Box<dyn RenderSink>),
    Feed(HeapCons<f32>),
}

/// Audio-thread state. Survives stream rebuilds so a device change keeps the
/// plan, tap and feed.
struct RenderState {
    commands: HeapCons<RtCommand>,
    retired: HeapProd<Retired>,
    plan: Box<RenderPlan>,
    tap: Option<Box<dyn RenderSink>>,
    feed: Option<HeapCons<f32>>,
    scratch: Vec<f32>,
    sample_time: u64,
}

impl RenderState {
    fn apply_pending(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            if let Some(old) = self.apply(command) {
                self.retire(old);
            }
        }
    }

    fn apply(&mut self, command: RtCommand) -> Option<Retired> {
        match command {
            RtCommand::SetPlan(plan) => {
                Some(Retired::Plan(std::mem::replace(&mut self.plan, plan)))
            }
            RtCommand::InstallTap(tap) => self.tap.replace(tap).map(Retired::Tap),
            RtCommand::RemoveTap => self.tap.take().map(Retired::Tap),
            RtCommand::SetFeed(feed) => self.feed.replace(feed).map(Retired::Feed),
        }
    }

    fn retire(&mut self, item: Retired) {
        if let Err(item) = self.retired.try_push(item) {
            // Retired ring full: leak rather than free on the audio thread
            std::mem::forget(item);
        }
    }

    fn render(&mut self, block: &mut [f32], format: AudioFormat) {
        let filled = self.feed.as_mut().map_or(0, |feed| feed.pop_slice(block));
        block[filled..].fill(0.0);

        for stage in &self.plan.stages {
            if !stage.bypassed.load(Ordering::Acquire) {
                stage.processor.process(block, format);
            }
        }

        let frames = (block.len() / usize::from(format.channels.max(1))) as u64;
        if let Some(tap) = self.tap.as_mut() {
            let info = RenderInfo {
                sample_time: self.sample_time,
                frame_count: frames as u32,
                format,
            };
            tap.post_render(info, block);
        }
        self.sample_time += frames;
    }
}

/// [`AudioRuntime`] rendering to a CPAL output device.
///
/// Audio enters the chain through the feed returned by
/// [`feed()`](Self::feed): the playback layer pushes interleaved `f32`
/// samples in the output format, and the first node of the chain processes
/// them. Missing samples render as silence.
///
/// # Example
///
/// ```ignore
/// use audio_graph::{CpalDeviceCatalog, CpalRuntime};
/// use ringbuf::traits::Producer;
///
/// let catalog = CpalDeviceCatalog::new();
/// let mut runtime = CpalRuntime::new(&catalog);
/// let mut feed = runtime.feed(48_000 * 2);
/// feed.push_slice(&decoded_samples);
/// ```
pub struct CpalRuntime {
    selection: Arc<RwLock<OutputSelection>>,
    topology: Topology,
    commands: HeapProd<RtCommand>,
    retired: HeapCons<Retired>,
    render_state: Arc<Mutex<RenderState>>,
    stream: Option<StreamHandle>,
    stream_lost: Arc<AtomicBool>,
    format: AudioFormat,
    device_name: Option<String>,
    notifications: Option<(Notification, Notification)>,
    config_handler: Arc<RwLock<Option<Notification>>>,
}

impl CpalRuntime {
    /// Creates a runtime that renders to the device selected in `catalog`.
    pub fn new(catalog: &CpalDeviceCatalog) -> Self {
        let (commands, command_rx) = HeapRb::<RtCommand>::new(COMMAND_CAPACITY).split();
        let (retired_tx, retired) = HeapRb::<Retired>::new(COMMAND_CAPACITY).split();

        let selection = catalog.selection();
        let format = resolve_output_device(&selection.read())
            .and_then(|d| d.default_output_config().map_err(GraphError::backend))
            .map(|c| AudioFormat::new(c.sample_rate().0, c.channels()))
            .unwrap_or_default();

        Self {
            selection,
            topology: Topology::default(),
            commands,
            retired,
            render_state: Arc::new(Mutex::new(RenderState {
                commands: command_rx,
                retired: retired_tx,
                plan: Box::default(),
                tap: None,
                feed: None,
                scratch: vec![0.0; SCRATCH_SAMPLES],
                sample_time: 0,
            })),
            stream: None,
            stream_lost: Arc::new(AtomicBool::new(false)),
            format,
            device_name: None,
            notifications: None,
            config_handler: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the audio feed and returns its producer.
    ///
    /// `capacity` is in interleaved samples.
    pub fn feed(&mut self, capacity: usize) -> HeapProd<f32> {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        self.send(RtCommand::SetFeed(consumer));
        producer
    }

    /// Name of the device the stream is open on.
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    fn send(&mut self, command: RtCommand) {
        // Dropping what the audio thread handed back happens here
        while self.retired.try_pop().is_some() {}

        if self.stream.is_none() {
            // No callback can hold the state; apply in order directly
            let mut state = self.render_state.lock();
            state.apply_pending();
            if let Some(old) = state.apply(command) {
                state.retire(old);
            }
        } else if let Err(command) = self.commands.try_push(command) {
            tracing::warn!("Render command queue full, applying under lock");
            let mut state = self.render_state.lock();
            state.apply_pending();
            if let Some(old) = state.apply(command) {
                state.retire(old);
            }
        }

        while self.retired.try_pop().is_some() {}
    }

    fn open_stream(
        &self,
        device: &cpal::Device,
        selection: &OutputSelection,
    ) -> Result<(cpal::Stream, AudioFormat), GraphError> {
        let supported = device
            .default_output_config()
            .map_err(GraphError::backend)?;
        let format = AudioFormat::new(supported.sample_rate().0, supported.channels());
        let sample_format = supported.sample_format();

        let mut config: cpal::StreamConfig = supported.into();
        if let Some(frames) = selection.effective_buffer_size() {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let stream = match sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(device, &config, format)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(device, &config, format)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(device, &config, format)?,
            other => {
                return Err(GraphError::BackendError(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        };

        Ok((stream, format))
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        format: AudioFormat,
    ) -> Result<cpal::Stream, GraphError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let shared = Arc::clone(&self.render_state);
        let lost = Arc::clone(&self.stream_lost);
        let handler = Arc::clone(&self.config_handler);

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let result = catch_unwind(AssertUnwindSafe(|| match shared.try_lock() {
                        Some(mut state) => fill_output(&mut state, data, format),
                        // Only contended while an old and a new stream overlap
                        None => output_silence(data),
                    }));
                    if result.is_err() {
                        output_silence(data);
                    }
                },
                move |err| {
                    tracing::error!("Audio output stream error: {}", err);
                    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                        lost.store(true, Ordering::Release);
                        let notify = handler.read().clone();
                        if let Some(notify) = notify {
                            notify();
                        }
                    }
                },
                None,
            )
            .map_err(GraphError::backend)
    }
}

fn fill_output<T>(state: &mut RenderState, data: &mut [T], format: AudioFormat)
where
    T: SizedSample + FromSample<f32>,
{
    state.apply_pending();

    let channels = usize::from(format.channels.max(1));
    let pass = (SCRATCH_SAMPLES / channels).max(1) * channels;
    let mut scratch = std::mem::take(&mut state.scratch);
    for out in data.chunks_mut(pass) {
        let block = &mut scratch[..out.len()];
        state.render(block, format);
        for (dst, &src) in out.iter_mut().zip(block.iter()) {
            *dst = T::from_sample(src);
        }
    }
    state.scratch = scratch;
}

fn output_silence<T: Sample>(data: &mut [T]) {
    data.fill(T::EQUILIBRIUM);
}

impl AudioRuntime for CpalRuntime {
    fn attach(&mut self, node: &ProcessingNode) {
        self.topology.attach(node);
    }

    fn detach(&mut self, id: NodeId) {
        if let Err(violation) = self.topology.detach(id) {
            tracing::warn!("Rejected detach: {}", violation);
        }
    }

    fn is_attached(&self, id: NodeId) -> bool {
        self.topology.is_attached(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint, format: Option<AudioFormat>) {
        if let Err(violation) = self.topology.connect(from, to, format) {
            tracing::warn!("Rejected connect: {}", violation);
        }
    }

    fn disconnect_output(&mut self, id: NodeId) {
        self.topology.disconnect_output(id);
    }

    fn disconnect_input(&mut self, to: Endpoint) {
        self.topology.disconnect_input(to);
    }

    fn commit(&mut self) {
        let plan = RenderPlan::compile(&self.topology.render_order());
        tracing::debug!(stages = plan.stages.len(), "Publishing render plan");
        self.send(RtCommand::SetPlan(Box::new(plan)));
    }

    fn start(&mut self) -> Result<(), GraphError> {
        // An unplugged device falls back to the system default
        let selection = reconcile_selection(&self.selection)?;
        let device = resolve_output_device(&selection)?;
        let name = device.name().ok();

        let lost = self.stream_lost.load(Ordering::Acquire);
        if self.stream.is_some() && !lost && name == self.device_name {
            return Ok(());
        }

        // Release the old stream before opening the device again
        self.stream = None;
        let (stream, format) = self.open_stream(&device, &selection)?;
        stream.play().map_err(GraphError::backend)?;
        self.stream = Some(StreamHandle(stream));
        self.stream_lost.store(false, Ordering::Release);

        let device_changed = self.device_name.is_some() && self.device_name != name;
        let rate_changed = self.format.sample_rate != format.sample_rate;
        self.format = format;
        self.device_name = name;

        tracing::info!(
            device = self.device_name.as_deref().unwrap_or("unknown"),
            %format,
            "Output stream started"
        );

        if let Some((on_device, on_rate)) = self.notifications.clone() {
            if device_changed {
                on_device();
            }
            if rate_changed {
                on_rate();
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Output stream stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn install_render_callbacks(&mut self, callbacks: RenderCallbacks) {
        self.notifications = Some((callbacks.device_changed, callbacks.sample_rate_changed));
        self.send(RtCommand::InstallTap(callbacks.render));
    }

    fn remove_render_callbacks(&mut self) {
        if self.notifications.take().is_some() {
            self.send(RtCommand::RemoveTap);
        }
    }

    fn has_render_callbacks(&self) -> bool {
        self.notifications.is_some()
    }

    fn set_configuration_change_handler(&mut self, handler: Notification) {
        *self.config_handler.write() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PlayerProcessor;

    struct CountingTap(Arc<std::sync::atomic::AtomicUsize>);

    impl RenderSink for CountingTap {
        fn post_render(&mut self, _info: RenderInfo, _samples: &[f32]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_render_state_applies_plan_and_feed() {
        let mut runtime = CpalRuntime::new(&CpalDeviceCatalog::new());
        let player = ProcessingNode::new("player", Arc::new(PlayerProcessor::new(0.5, 0.0)));
        runtime.attach(&player);
        runtime.connect(player.id(), Endpoint::Sink, None);
        runtime.commit();

        let mut feed = runtime.feed(8);
        feed.push_slice(&[1.0, 1.0]);

        let mut out = [0.0f32; 4];
        let mut state = runtime.render_state.lock();
        fill_output(&mut state, &mut out, AudioFormat::new(48_000, 2));
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(state.sample_time, 2);
    }

    #[test]
    fn test_bypassed_stage_skipped() {
        let mut runtime = CpalRuntime::new(&CpalDeviceCatalog::new());
        let player = ProcessingNode::new("player", Arc::new(PlayerProcessor::new(0.0, 0.0)));
        runtime.attach(&player);
        runtime.connect(player.id(), Endpoint::Sink, None);
        runtime.commit();
        player.set_bypassed(true);

        let mut feed = runtime.feed(4);
        feed.push_slice(&[0.25, 0.25]);

        let mut out = [0.0f32; 2];
        fill_output(
            &mut runtime.render_state.lock(),
            &mut out,
            AudioFormat::new(48_000, 2),
        );
        assert_eq!(out, [0.25, 0.25]);
    }

    #[test]
    fn test_tap_install_and_remove() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut runtime = CpalRuntime::new(&CpalDeviceCatalog::new());
        runtime.install_render_callbacks(RenderCallbacks {
            render: Box::new(CountingTap(Arc::clone(&count))),
            device_changed: Arc::new(|| {}),
            sample_rate_changed: Arc::new(|| {}),
        });
        assert!(runtime.has_render_callbacks());

        let mut out = [0i16; 8];
        fill_output(
            &mut runtime.render_state.lock(),
            &mut out,
            AudioFormat::new(48_000, 2),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);

        runtime.remove_render_callbacks();
        fill_output(
            &mut runtime.render_state.lock(),
            &mut out,
            AudioFormat::new(48_000, 2),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!runtime.has_render_callbacks());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_start_default_device() {
        let mut runtime = CpalRuntime::new(&CpalDeviceCatalog::new());
        runtime.start().unwrap();
        assert!(runtime.is_running());
        runtime.stop();
        assert!(!runtime.is_running());
    }
}
