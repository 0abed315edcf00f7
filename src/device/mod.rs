//! Output device catalog.
//!
//! A [`DeviceCatalog`] enumerates output devices and tracks which one the
//! graph renders to, together with its buffer size and sample rate. The
//! catalog only records the selection; the runtime picks it up the next time
//! the engine is (re)started.

mod host;
mod mock;

pub(crate) use host::{reconcile_selection, resolve_output_device};
pub use host::{CpalDeviceCatalog, OutputSelection};
pub use mock::MockDeviceCatalog;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::GraphError;

/// Identity of an output device.
///
/// `uid` is a stable identifier where the platform offers one; CPAL exposes
/// only names, so [`CpalDeviceCatalog`] uses the name for both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Stable device identifier.
    pub uid: String,
}

impl AudioDevice {
    /// Creates a device identity.
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// Returns `true` if both name and uid match.
    pub fn matches(&self, other: &AudioDevice) -> bool {
        self.name == other.name && self.uid == other.uid
    }
}

/// Enumeration and selection of output devices.
///
/// Methods take `&self` so a catalog can be shared between the graph and the
/// render observer bridge; implementations use interior mutability.
pub trait DeviceCatalog: Send + Sync {
    /// Lists all available output devices.
    fn list_devices(&self) -> Result<Vec<AudioDevice>, GraphError>;

    /// The system default output device.
    fn system_device(&self) -> Result<AudioDevice, GraphError>;

    /// The device the graph renders to.
    fn output_device(&self) -> Result<AudioDevice, GraphError>;

    /// Selects the device the graph renders to.
    ///
    /// Returns `DeviceNotFound` if the device is not currently available.
    fn set_output_device(&self, device: &AudioDevice) -> Result<(), GraphError>;

    /// Buffer size of the output device in frames.
    fn output_buffer_size(&self) -> u32;

    /// Requests a buffer size for the output device in frames.
    fn set_output_buffer_size(&self, frames: u32);

    /// Sample rate of the output device in Hz.
    fn output_sample_rate(&self) -> u32;

    /// Upper bound on frames rendered per callback.
    fn set_max_frames_per_slice(&self, frames: u32);
}

/// Lists the names of all available output devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_output_devices() -> Result<Vec<String>, GraphError> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(GraphError::backend)?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Gets the name of the default output device, if any.
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}
