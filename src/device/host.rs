//! CPAL-backed device catalog.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use parking_lot::RwLock;

use crate::device::{AudioDevice, DeviceCatalog};
use crate::GraphError;

/// Buffer size reported when none was requested.
const DEFAULT_BUFFER_FRAMES: u32 = 512;

/// Output device selection shared between a [`CpalDeviceCatalog`] and the
/// [`CpalRuntime`](crate::CpalRuntime) that renders to it.
#[derive(Debug, Clone, Default)]
pub struct OutputSelection {
    /// Selected device name, `None` for the system default.
    pub device: Option<String>,
    /// Requested buffer size in frames, `None` for the device default.
    pub buffer_size: Option<u32>,
    /// Upper bound on frames rendered per callback.
    pub max_frames_per_slice: Option<u32>,
}

impl OutputSelection {
    /// Buffer size to request from the device, honoring the slice limit.
    pub fn effective_buffer_size(&self) -> Option<u32> {
        match (self.buffer_size, self.max_frames_per_slice) {
            (Some(size), Some(max)) => Some(size.min(max)),
            (size, _) => size,
        }
    }

    /// Clears a selected device that is not among `available`, so the next
    /// stream opens on the system default. Returns `true` if it was cleared.
    pub fn forget_missing<S: AsRef<str>>(&mut self, available: &[S]) -> bool {
        let Some(name) = self.device.as_deref() else {
            return false;
        };
        if available.iter().any(|n| n.as_ref() == name) {
            return false;
        }
        tracing::warn!(device = name, "Selected output device is gone, using system default");
        self.device = None;
        true
    }
}

/// [`DeviceCatalog`] over the default CPAL host.
///
/// Clones share the selection.
#[derive(Debug, Clone, Default)]
pub struct CpalDeviceCatalog {
    selection: Arc<RwLock<OutputSelection>>,
}

impl CpalDeviceCatalog {
    /// Creates a catalog that renders to the system default device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared selection read by the runtime when it opens a stream.
    pub(crate) fn selection(&self) -> Arc<RwLock<OutputSelection>> {
        Arc::clone(&self.selection)
    }

    fn describe(device: &cpal::Device) -> Option<AudioDevice> {
        let name = device.name().ok()?;
        Some(AudioDevice::new(name.clone(), name))
    }
}

/// Drops the selected device if it was unplugged and returns the selection
/// to open.
pub(crate) fn reconcile_selection(
    selection: &RwLock<OutputSelection>,
) -> Result<OutputSelection, GraphError> {
    if selection.read().device.is_some() {
        let available: Vec<String> = cpal::default_host()
            .output_devices()
            .map_err(GraphError::backend)?
            .filter_map(|d| d.name().ok())
            .collect();
        selection.write().forget_missing(&available);
    }
    Ok(selection.read().clone())
}

/// Resolves the selected device, or the system default when none is
/// selected.
pub(crate) fn resolve_output_device(
    selection: &OutputSelection,
) -> Result<cpal::Device, GraphError> {
    let host = cpal::default_host();
    match &selection.device {
        Some(name) => host
            .output_devices()
            .map_err(GraphError::backend)?
            .find(|d| d.name().is_ok_and(|n| &n == name))
            .ok_or_else(|| GraphError::DeviceNotFound { name: name.clone() }),
        None => host
            .default_output_device()
            .ok_or(GraphError::NoOutputDevice),
    }
}

impl DeviceCatalog for CpalDeviceCatalog {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, GraphError> {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(GraphError::backend)?;
        Ok(devices.filter_map(|d| Self::describe(&d)).collect())
    }

    fn system_device(&self) -> Result<AudioDevice, GraphError> {
        cpal::default_host()
            .default_output_device()
            .and_then(|d| Self::describe(&d))
            .ok_or(GraphError::NoOutputDevice)
    }

    fn output_device(&self) -> Result<AudioDevice, GraphError> {
        let device = resolve_output_device(&reconcile_selection(&self.selection)?)?;
        Self::describe(&device).ok_or(GraphError::NoOutputDevice)
    }

    fn set_output_device(&self, device: &AudioDevice) -> Result<(), GraphError> {
        if !self.list_devices()?.iter().any(|d| d.matches(device)) {
            return Err(GraphError::DeviceNotFound {
                name: device.name.clone(),
            });
        }
        self.selection.write().device = Some(device.name.clone());
        tracing::info!(device = %device.name, "Output device selected");
        Ok(())
    }

    fn output_buffer_size(&self) -> u32 {
        self.selection
            .read()
            .effective_buffer_size()
            .unwrap_or(DEFAULT_BUFFER_FRAMES)
    }

    fn set_output_buffer_size(&self, frames: u32) {
        self.selection.write().buffer_size = Some(frames);
    }

    fn output_sample_rate(&self) -> u32 {
        let selection = self.selection.read().clone();
        resolve_output_device(&selection)
            .and_then(|d| d.default_output_config().map_err(GraphError::backend))
            .map(|config| config.sample_rate().0)
            .unwrap_or_else(|e| {
                tracing::warn!("Cannot query output sample rate: {}", e);
                0
            })
    }

    fn set_max_frames_per_slice(&self, frames: u32) {
        self.selection.write().max_frames_per_slice = Some(frames);
    }
}
