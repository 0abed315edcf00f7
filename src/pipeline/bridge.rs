//! Single-slot render observer bridge.
//!
//! The runtime calls the tap on the audio thread; a dispatcher task drains it
//! on the tokio runtime and invokes the registered observer there, together
//! with device and sample-rate notices.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::device::DeviceCatalog;
use crate::pipeline::tap::{create_tap, TapReader};
use crate::pipeline::RenderedBuffer;
use crate::runtime::{AudioRuntime, RenderCallbacks};
use crate::{EventCallback, GraphConfig, GraphError, GraphEvent};

/// Blocks the tap can queue, independent of their size.
const TAP_BLOCK_CAPACITY: usize = 256;

/// Smallest tap, in interleaved samples.
const MIN_TAP_SAMPLES: usize = 16_384;

/// A consumer of rendered audio and output changes, such as a visualizer or
/// level meter.
///
/// All methods run on the tokio runtime, never on the audio thread. Delivery
/// is best-effort: under load some buffers are skipped and reported as
/// [`GraphEvent::RenderBuffersDropped`].
///
/// # Example
///
/// ```
/// use audio_graph::{RenderObserver, RenderedBuffer};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// struct PeakMeter {
///     peak_bits: AtomicU32,
/// }
///
/// #[async_trait]
/// impl RenderObserver for PeakMeter {
///     async fn rendered(&self, buffer: &RenderedBuffer) {
///         self.peak_bits.store(buffer.peak().to_bits(), Ordering::Relaxed);
///     }
/// }
/// ```
#[async_trait]
pub trait RenderObserver: Send + Sync {
    /// Called with a copy of each rendered block.
    async fn rendered(&self, buffer: &RenderedBuffer);

    /// Called after the output device changed.
    async fn device_changed(&self, _buffer_size: u32, _sample_rate: u32) {}

    /// Called after the output sample rate changed.
    async fn sample_rate_changed(&self, _sample_rate: u32) {}
}

type ObserverSlot = Arc<Mutex<Option<Arc<dyn RenderObserver>>>>;

#[derive(Debug, Clone, Copy)]
enum Notice {
    DeviceChanged,
    SampleRateChanged,
}

struct DispatcherHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Holds at most one [`RenderObserver`] and connects it to a runtime.
///
/// Registering installs the runtime callbacks and spawns the dispatcher;
/// the last registration wins. Unregistering clears the slot, removes the
/// callbacks and stops the dispatcher. Once [`unregister`](Self::unregister)
/// returns, the previous observer is never invoked again.
pub struct RenderObserverBridge {
    slot: ObserverSlot,
    devices: Arc<dyn DeviceCatalog>,
    tap_capacity: Duration,
    poll_interval: Duration,
    event_callback: Option<EventCallback>,
    dispatcher: Option<DispatcherHandle>,
}

impl RenderObserverBridge {
    /// Creates an empty bridge.
    pub fn new(
        devices: Arc<dyn DeviceCatalog>,
        config: &GraphConfig,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            devices,
            tap_capacity: config.tap_capacity,
            poll_interval: config.observer_poll_interval,
            event_callback,
            dispatcher: None,
        }
    }

    /// Returns `true` if an observer is registered.
    pub async fn is_registered(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Returns `true` if `observer` is the registered observer.
    pub async fn is_current(&self, observer: &Arc<dyn RenderObserver>) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, observer))
    }

    /// Stores `observer` in the slot, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `NoAsyncRuntime` outside a tokio runtime.
    pub async fn register(
        &mut self,
        observer: Arc<dyn RenderObserver>,
        runtime: &mut dyn AudioRuntime,
    ) -> Result<(), GraphError> {
        let handle = Handle::try_current().map_err(|_| GraphError::NoAsyncRuntime)?;

        *self.slot.lock().await = Some(observer);
        if self.dispatcher.is_none() || !runtime.has_render_callbacks() {
            self.install(runtime, &handle);
        }
        tracing::debug!("Render observer registered");
        Ok(())
    }

    /// Clears the slot and removes the runtime callbacks.
    ///
    /// Safe to call when nothing is registered.
    pub async fn unregister(&mut self, runtime: &mut dyn AudioRuntime) {
        // Waits out an invocation in progress
        let previous = self.slot.lock().await.take();
        runtime.remove_render_callbacks();

        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.shutdown.send(());
            let _ = dispatcher.task.await;
        }
        if previous.is_some() {
            tracing::debug!("Render observer unregistered");
        }
    }

    /// Stops the dispatcher without waiting for it.
    ///
    /// Used where awaiting is impossible; the callbacks stay installed and
    /// render into a tap nobody reads.
    pub(crate) fn abort(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.shutdown.send(());
            dispatcher.task.abort();
        }
    }

    fn install(&mut self, runtime: &mut dyn AudioRuntime, handle: &Handle) {
        self.abort();

        let format = runtime.output_format();
        let capacity = format
            .samples_for_duration(self.tap_capacity)
            .max(MIN_TAP_SAMPLES);
        let (tap, reader) = create_tap(capacity, TAP_BLOCK_CAPACITY);

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let on_device = {
            let tx = notice_tx.clone();
            Arc::new(move || {
                let _ = tx.send(Notice::DeviceChanged);
            })
        };
        let on_rate = Arc::new(move || {
            let _ = notice_tx.send(Notice::SampleRateChanged);
        });

        runtime.install_render_callbacks(RenderCallbacks {
            render: Box::new(tap),
            device_changed: on_device,
            sample_rate_changed: on_rate,
        });

        let dispatcher = Dispatcher {
            reader,
            slot: Arc::clone(&self.slot),
            devices: Arc::clone(&self.devices),
            event_callback: self.event_callback.clone(),
            delivered: 0,
        };
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = handle.spawn(dispatcher.run(notices, shutdown_rx, self.poll_interval));
        self.dispatcher = Some(DispatcherHandle { shutdown, task });

        tracing::debug!(capacity, "Render tap installed");
    }
}

impl Drop for RenderObserverBridge {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Drains the tap and forwards notices to the observer.
struct Dispatcher {
    reader: TapReader,
    slot: ObserverSlot,
    devices: Arc<dyn DeviceCatalog>,
    event_callback: Option<EventCallback>,
    delivered: u64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut notices: mpsc::UnboundedReceiver<Notice>,
        mut shutdown: oneshot::Receiver<()>,
        poll_interval: Duration,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(notice) = notices.recv() => {
                    self.deliver_notice(notice).await;
                }
                _ = interval.tick() => {
                    self.drain().await;
                }
            }
        }

        tracing::debug!(
            delivered = self.delivered,
            "Render observer dispatcher stopped"
        );
    }

    async fn drain(&mut self) {
        let dropped = self.reader.take_dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "Render observer fell behind, buffers dropped");
            self.emit_event(GraphEvent::RenderBuffersDropped { count: dropped });
        }

        while let Some(buffer) = self.reader.try_read() {
            let slot = self.slot.lock().await;
            let Some(observer) = slot.as_ref() else {
                continue;
            };
            observer.rendered(&buffer).await;
            self.delivered += 1;

            if self.delivered % 500 == 0 {
                tracing::debug!(
                    pending = self.reader.pending(),
                    "Render dispatcher: delivered buffer #{}, ts={:?}",
                    self.delivered,
                    buffer.timestamp()
                );
            }
        }
    }

    async fn deliver_notice(&mut self, notice: Notice) {
        let slot = self.slot.lock().await;
        let Some(observer) = slot.as_ref() else {
            return;
        };
        match notice {
            Notice::DeviceChanged => {
                let buffer_size = self.devices.output_buffer_size();
                let sample_rate = self.devices.output_sample_rate();
                observer.device_changed(buffer_size, sample_rate).await;
            }
            Notice::SampleRateChanged => {
                observer
                    .sample_rate_changed(self.devices.output_sample_rate())
                    .await;
            }
        }
    }

    fn emit_event(&self, event: GraphEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDeviceCatalog;
    use crate::format::AudioFormat;
    use crate::runtime::MockRuntime;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        buffers: AtomicUsize,
        rate: AtomicU32,
    }

    #[async_trait]
    impl RenderObserver for Recorder {
        async fn rendered(&self, _buffer: &RenderedBuffer) {
            self.buffers.fetch_add(1, Ordering::SeqCst);
        }

        async fn sample_rate_changed(&self, sample_rate: u32) {
            self.rate.store(sample_rate, Ordering::SeqCst);
        }
    }

    fn bridge(catalog: &MockDeviceCatalog) -> RenderObserverBridge {
        let config = GraphConfig {
            observer_poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        RenderObserverBridge::new(Arc::new(catalog.clone()), &config, None)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    fn running_runtime() -> MockRuntime {
        let mut runtime = MockRuntime::new(AudioFormat::new(48_000, 2));
        runtime.start().unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_register_installs_callbacks() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let mut bridge = bridge(&catalog);
        let mut runtime = running_runtime();
        let recorder = Arc::new(Recorder::default());

        bridge.register(recorder.clone(), &mut runtime).await.unwrap();
        assert!(runtime.has_render_callbacks());
        assert!(bridge.is_registered().await);

        runtime.render(&[0.5; 64]);
        wait_for(|| recorder.buffers.load(Ordering::SeqCst) == 1).await;

        bridge.unregister(&mut runtime).await;
        assert!(!runtime.has_render_callbacks());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let mut bridge = bridge(&catalog);
        let mut runtime = running_runtime();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        bridge.register(first.clone(), &mut runtime).await.unwrap();
        bridge.register(second.clone(), &mut runtime).await.unwrap();

        runtime.render(&[0.5; 64]);
        wait_for(|| second.buffers.load(Ordering::SeqCst) == 1).await;
        assert_eq!(first.buffers.load(Ordering::SeqCst), 0);

        let second_dyn: Arc<dyn RenderObserver> = second;
        assert!(bridge.is_current(&second_dyn).await);
        bridge.unregister(&mut runtime).await;
    }

    #[tokio::test]
    async fn test_unregister_without_registration() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let mut bridge = bridge(&catalog);
        let mut runtime = running_runtime();
        bridge.unregister(&mut runtime).await;
        bridge.unregister(&mut runtime).await;
        assert!(!bridge.is_registered().await);
    }

    #[tokio::test]
    async fn test_sample_rate_notice_reaches_observer() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let mut bridge = bridge(&catalog);
        let mut runtime = running_runtime();
        let recorder = Arc::new(Recorder::default());
        bridge.register(recorder.clone(), &mut runtime).await.unwrap();

        catalog.set_sample_rate(96_000);
        runtime.fire_sample_rate_change(96_000);
        wait_for(|| recorder.rate.load(Ordering::SeqCst) == 96_000).await;

        bridge.unregister(&mut runtime).await;
    }

    #[test]
    fn test_register_outside_runtime_fails() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let mut bridge = bridge(&catalog);
        let mut runtime = MockRuntime::default();
        let recorder: Arc<dyn RenderObserver> = Arc::new(Recorder::default());

        // Polled by hand so no tokio context is entered
        let result = poll_once(bridge.register(recorder, &mut runtime));
        assert!(matches!(result, Some(Err(GraphError::NoAsyncRuntime))));
        assert!(!runtime.has_render_callbacks());
    }

    struct NoopWake;

    impl std::task::Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once<F: std::future::Future>(future: F) -> Option<F::Output> {
        let waker = std::task::Waker::from(Arc::new(NoopWake));
        let mut cx = std::task::Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);
        match std::future::Future::poll(future.as_mut(), &mut cx) {
            std::task::Poll::Ready(output) => Some(output),
            std::task::Poll::Pending => None,
        }
    }
}
