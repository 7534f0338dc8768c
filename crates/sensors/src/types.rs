//! Common types and traits at the device driver boundary

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use eeg_types::{
    BatteryInfo, ChannelId, ConnectionStatus, DeviceInfo, GainMode, ImpedanceMeasurementMode,
    Polarity, SensorError,
};
use thiserror::Error;

/// Opaque identifier of one device connection, passed back as callback context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(usize);

static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

impl SessionHandle {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Hands out a process-unique, non-null handle.
    pub fn allocate() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Chunk-ready: (per-channel raw buffers, samples per channel, context).
pub type ChunkCallback = unsafe extern "C" fn(*const *const c_void, usize, *mut c_void);
/// Battery update: (battery info, context).
pub type BatteryCallback = unsafe extern "C" fn(*const BatteryInfo, *mut c_void);
/// Argument-less notification: (context).
pub type EventCallback = unsafe extern "C" fn(*mut c_void);
/// Firmware update progress: (context, progress, total).
pub type ProgressCallback = unsafe extern "C" fn(*mut c_void, usize, usize);

/// The entry points a driver invokes, always with its own handle as context.
#[derive(Clone, Copy)]
pub struct DriverCallbacks {
    pub chunk: ChunkCallback,
    pub battery: BatteryCallback,
    pub disconnect: EventCallback,
    pub config_loaded: EventCallback,
    pub stream_started: EventCallback,
    pub stream_stopped: EventCallback,
    pub ota_progress: ProgressCallback,
}

impl std::fmt::Debug for DriverCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCallbacks").finish_non_exhaustive()
    }
}

/// Errors raised while turning driver-owned memory into typed arrays.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown channel type tag {0}")]
    UnknownTypeTag(u8),
    #[error("channel {0} has a null data pointer")]
    NullChannelPointer(usize),
    #[error("raw buffer holds {actual} bytes, expected {expected}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("chunk has {actual} channel buffers, the stream declares {expected}")]
    ChannelCountMismatch { expected: usize, actual: usize },
}

/// Errors that can occur in device drivers
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// A sensor-specific error.
    #[error("Sensor error: {0}")]
    SensorError(#[from] SensorError),
    #[error("Device not connected")]
    NotConnected,
    #[error("Stream already running")]
    AlreadyStreaming,
    #[error("Stream not running")]
    NotStreaming,
    #[error("Stream is incompatible, update the device firmware")]
    IncompatibleStream,
    #[error("Channel {0} does not exist or is not currently streaming")]
    ChannelNotStreaming(ChannelId),
    #[error("Invalid channel number {0}")]
    InvalidChannel(ChannelId),
    /// The operation is not allowed in the current driver state.
    #[error("Device busy: {0}")]
    Busy(String),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Trait that all device drivers must implement.
///
/// Drivers deliver data by invoking the [`DriverCallbacks`] installed on them,
/// from threads they own, with [`DeviceDriver::handle`] as context.
pub trait DeviceDriver: Send + Sync + 'static {
    /// The handle this driver passes to every callback.
    fn handle(&self) -> SessionHandle;

    /// Installs the entry points the driver calls back into.
    fn install_callbacks(&self, callbacks: DriverCallbacks);

    fn connect(&self) -> ConnectionStatus;

    /// Stops streaming and drops the connection. No callbacks are delivered
    /// once this returns.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn device_info(&self) -> Result<DeviceInfo, DriverError>;

    /// Sample rate in Hz.
    fn sample_frequency(&self) -> u16;

    fn battery_info(&self) -> BatteryInfo;

    fn set_channel_enabled(&self, channel: ChannelId, enabled: bool) -> Result<(), DriverError>;

    fn set_channel_gain(&self, channel: ChannelId, gain: GainMode) -> Result<(), DriverError>;

    fn set_channel_bias(&self, channel: ChannelId, polarity: Polarity) -> Result<(), DriverError>;

    fn set_impedance_mode(&self, mode: ImpedanceMeasurementMode) -> Result<(), DriverError>;

    /// Pushes channel settings to the device; completion is signalled through
    /// the config-loaded callback.
    fn load_config(&self) -> Result<(), DriverError>;

    fn start_stream(&self) -> Result<(), DriverError>;

    fn stop_stream(&self) -> Result<(), DriverError>;

    fn is_streaming(&self) -> bool;

    /// Row of `channel` inside delivered chunks, while streaming.
    fn channel_index(&self, channel: ChannelId) -> Option<usize>;

    /// Type tag of every channel buffer in the current chunk layout.
    fn stream_channel_types(&self) -> Vec<u8>;

    /// Starts a firmware update; progress arrives through the ota callback.
    fn start_update(&self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_handles_are_unique_and_non_null() {
        let a = SessionHandle::allocate();
        let b = SessionHandle::allocate();
        assert_ne!(a, b);
        assert!(!a.as_ptr().is_null());
        assert_eq!(SessionHandle::from_ptr(b.as_ptr()), b);
    }
}
