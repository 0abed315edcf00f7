//! Mock device catalog for testing without hardware.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{AudioDevice, DeviceCatalog};
use crate::GraphError;

#[derive(Debug)]
struct CatalogState {
    devices: Vec<AudioDevice>,
    system: usize,
    output: usize,
    buffer_size: u32,
    sample_rate: u32,
    max_frames_per_slice: Option<u32>,
}

/// A [`DeviceCatalog`] over a fixed device list.
///
/// Clones share state, so a test can keep a handle to swap devices or
/// change the sample rate after handing the catalog to the graph.
///
/// # Example
///
/// ```
/// use audio_graph::{AudioDevice, DeviceCatalog, MockDeviceCatalog};
///
/// let catalog = MockDeviceCatalog::new(["Speakers", "Headphones"]);
/// assert_eq!(catalog.output_device().unwrap().name, "Speakers");
///
/// catalog.set_output_device(&AudioDevice::new("Headphones", "Headphones")).unwrap();
/// assert_eq!(catalog.output_device().unwrap().name, "Headphones");
/// ```
#[derive(Debug, Clone)]
pub struct MockDeviceCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MockDeviceCatalog {
    /// Creates a catalog listing the given device names. The first one is the
    /// system default. Each device's uid equals its name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let devices = names
            .into_iter()
            .map(|n| {
                let name = n.into();
                AudioDevice::new(name.clone(), name)
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(CatalogState {
                devices,
                system: 0,
                output: 0,
                buffer_size: 512,
                sample_rate: 44_100,
                max_frames_per_slice: None,
            })),
        }
    }

    /// Changes the reported output sample rate.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.state.lock().sample_rate = sample_rate;
    }

    /// Last value passed to `set_max_frames_per_slice`.
    pub fn max_frames_per_slice(&self) -> Option<u32> {
        self.state.lock().max_frames_per_slice
    }

    /// Removes a device, as if it was unplugged. The output falls back to the
    /// system default.
    pub fn unplug(&self, name: &str) {
        let mut state = self.state.lock();
        let Some(index) = state.devices.iter().position(|d| d.name == name) else {
            return;
        };
        let output_name = state.devices.get(state.output).map(|d| d.name.clone());
        state.devices.remove(index);
        let output = output_name
            .and_then(|n| state.devices.iter().position(|d| d.name == n))
            .unwrap_or(0);
        state.system = 0;
        state.output = output;
    }
}

impl DeviceCatalog for MockDeviceCatalog {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, GraphError> {
        Ok(self.state.lock().devices.clone())
    }

    fn system_device(&self) -> Result<AudioDevice, GraphError> {
        let state = self.state.lock();
        state
            .devices
            .get(state.system)
            .cloned()
            .ok_or(GraphError::NoOutputDevice)
    }

    fn output_device(&self) -> Result<AudioDevice, GraphError> {
        let state = self.state.lock();
        state
            .devices
            .get(state.output)
            .cloned()
            .ok_or(GraphError::NoOutputDevice)
    }

    fn set_output_device(&self, device: &AudioDevice) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        let index = state
            .devices
            .iter()
            .position(|d| d.matches(device))
            .ok_or_else(|| GraphError::DeviceNotFound {
                name: device.name.clone(),
            })?;
        state.output = index;
        Ok(())
    }

    fn output_buffer_size(&self) -> u32 {
        let state = self.state.lock();
        match state.max_frames_per_slice {
            Some(max) => state.buffer_size.min(max),
            None => state.buffer_size,
        }
    }

    fn set_output_buffer_size(&self, frames: u32) {
        self.state.lock().buffer_size = frames;
    }

    fn output_sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    fn set_max_frames_per_slice(&self, frames: u32) {
        self.state.lock().max_frames_per_slice = Some(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_device_rejected() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        let err = catalog
            .set_output_device(&AudioDevice::new("USB DAC", "USB DAC"))
            .unwrap_err();
        assert!(matches!(err, GraphError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_unplug_falls_back_to_default() {
        let catalog = MockDeviceCatalog::new(["Speakers", "USB DAC"]);
        catalog
            .set_output_device(&AudioDevice::new("USB DAC", "USB DAC"))
            .unwrap();
        catalog.unplug("USB DAC");
        assert_eq!(catalog.output_device().unwrap().name, "Speakers");
    }

    #[test]
    fn test_buffer_size_capped_by_slice_limit() {
        let catalog = MockDeviceCatalog::new(["Speakers"]);
        catalog.set_output_buffer_size(4096);
        catalog.set_max_frames_per_slice(2048);
        assert_eq!(catalog.output_buffer_size(), 2048);
        assert_eq!(catalog.max_frames_per_slice(), Some(2048));
    }
}
