use std::collections::{BTreeMap, BTreeSet};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eeg_types::{
    ids, BatteryInfo, ChannelId, ConnectionStatus, DeviceFeatures, DeviceInfo, DeviceModel,
    GainMode, ImpedanceMeasurementMode, Polarity,
};
use log::{debug, info, warn};

use super::mock_data_generator::{accelerometer_block, EegGenerator};
use crate::types::{DeviceDriver, DriverCallbacks, DriverError, SessionHandle};

/// The stream thread reports the battery every this many chunks.
const BATTERY_REPORT_CHUNKS: u64 = 40;

/// Behaviour of a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub sample_rate: u16,
    /// Samples per delivered chunk.
    pub chunk_size: usize,
    /// Delay between chunks on the stream thread. `None` disables the thread;
    /// chunks are then only produced by [`MockDevice::push_chunk`].
    pub chunk_period: Option<Duration>,
    pub model: DeviceModel,
    pub features: DeviceFeatures,
    /// What [`DeviceDriver::connect`] reports.
    pub connect_result: ConnectionStatus,
    pub battery: BatteryInfo,
    pub firmware_version: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            sample_rate: 250,
            chunk_size: 25,
            chunk_period: Some(Duration::from_millis(100)),
            model: DeviceModel::Midi,
            features: DeviceFeatures {
                has_accelerometer: true,
                has_gyroscope: false,
                is_bipolar: false,
                electrode_count: 16,
            },
            connect_result: ConnectionStatus::Connected,
            battery: BatteryInfo {
                level: 87,
                is_charger_connected: false,
                is_charging: false,
            },
            firmware_version: "1.2.0".to_string(),
        }
    }
}

impl MockConfig {
    /// A device that only produces chunks on demand.
    pub fn manual() -> Self {
        Self {
            chunk_period: None,
            ..Self::default()
        }
    }
}

/// Raw storage of one channel buffer handed to the chunk callback.
enum ChannelBuffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
    Size(Vec<usize>),
    F64(Vec<f64>),
}

impl ChannelBuffer {
    fn as_ptr(&self) -> *const c_void {
        match self {
            ChannelBuffer::F32(v) => v.as_ptr() as *const c_void,
            ChannelBuffer::U8(v) => v.as_ptr() as *const c_void,
            ChannelBuffer::Size(v) => v.as_ptr() as *const c_void,
            ChannelBuffer::F64(v) => v.as_ptr() as *const c_void,
        }
    }
}

/// Type tag the mock streams for `channel`.
fn type_tag(channel: ChannelId) -> u8 {
    match channel {
        ids::SAMPLE_NUMBER => 2,
        c if c < ids::ELECTRODE_CONTACT_P => 3,
        c if c >= ids::GYROSCOPE && c < ids::STREAMING => 0,
        _ => 1,
    }
}

struct MockInner {
    config: MockConfig,
    connected: bool,
    streaming: bool,
    enabled: BTreeSet<ChannelId>,
    /// Channel of every buffer in a chunk, in delivery order.
    layout: Vec<ChannelId>,
    gains: BTreeMap<ChannelId, GainMode>,
    bias: BTreeMap<ChannelId, Polarity>,
    impedance: ImpedanceMeasurementMode,
    callbacks: Option<DriverCallbacks>,
    tag_override: Option<Vec<u8>>,
    battery: BatteryInfo,
    sample_count: u64,
    generator: EegGenerator,
}

impl MockInner {
    fn supports(&self, channel: ChannelId) -> bool {
        let features = &self.config.features;
        let electrodes = ChannelId::from(features.electrode_count);
        let in_group = |base: ChannelId, len: ChannelId| channel >= base && channel < base + len;
        channel == ids::SAMPLE_NUMBER
            || channel == ids::DIGITAL_INPUT
            || channel == ids::STREAMING
            || in_group(ids::ELECTRODE_MEASUREMENT, electrodes)
            || in_group(ids::ELECTRODE_CONTACT, electrodes)
            || (features.is_bipolar && in_group(ids::ELECTRODE_CONTACT_P, electrodes))
            || (features.is_bipolar && in_group(ids::ELECTRODE_CONTACT_N, electrodes))
            || (features.has_accelerometer && in_group(ids::ACCELEROMETER, 3))
            || (features.has_gyroscope && in_group(ids::GYROSCOPE, 3))
    }

    fn channel_buffer(&mut self, channel: ChannelId, len: usize) -> ChannelBuffer {
        match channel {
            ids::SAMPLE_NUMBER => {
                let start = self.sample_count as usize;
                ChannelBuffer::Size((start..start + len).collect())
            }
            c if c < ids::ELECTRODE_CONTACT_P => {
                let electrode = usize::from(c - ids::ELECTRODE_MEASUREMENT);
                ChannelBuffer::F64(self.generator.next_block(electrode, len))
            }
            c if c >= ids::ACCELEROMETER && c < ids::STREAMING => {
                ChannelBuffer::F32(accelerometer_block(usize::from(c - ids::ACCELEROMETER), len))
            }
            c if c >= ids::GYROSCOPE && c < ids::ACCELEROMETER => ChannelBuffer::F32(vec![0.0; len]),
            ids::DIGITAL_INPUT => ChannelBuffer::U8(vec![0; len]),
            // Contact and streaming flags
            _ => ChannelBuffer::U8(vec![1; len]),
        }
    }

    fn require_connected(&self) -> Result<(), DriverError> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

/// A device driver that synthesizes a realistic stream without hardware.
///
/// Chunks carry the enabled channels in ascending id order, so the sample
/// number (id 0) is always the first buffer when enabled. Electrodes stream
/// `f64` microvolts, the sample number `usize`, motion sensors `f32` and the
/// remaining flags `u8`.
pub struct MockDevice {
    handle: SessionHandle,
    inner: Arc<Mutex<MockInner>>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock(inner: &Mutex<MockInner>) -> MutexGuard<'_, MockInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generates one chunk and hands it to the installed chunk callback.
///
/// The state lock is released before the callback runs: dispatch queries the
/// layout back through the driver.
fn produce_chunk(inner: &Mutex<MockInner>, handle: SessionHandle) -> bool {
    let (callbacks, buffers, len) = {
        let mut guard = lock(inner);
        if !guard.streaming {
            return false;
        }
        let Some(callbacks) = guard.callbacks else {
            return false;
        };
        let len = guard.config.chunk_size;
        let layout = guard.layout.clone();
        let buffers: Vec<ChannelBuffer> = layout
            .iter()
            .map(|&channel| guard.channel_buffer(channel, len))
            .collect();
        guard.sample_count += len as u64;
        (callbacks, buffers, len)
    };

    let pointers: Vec<*const c_void> = buffers.iter().map(ChannelBuffer::as_ptr).collect();
    // SAFETY: every pointer addresses `len` elements of the layout its tag
    // names and `buffers` outlives the call.
    unsafe { (callbacks.chunk)(pointers.as_ptr(), len, handle.as_ptr()) };
    true
}

/// Passes the current battery state to the battery callback.
fn report_battery(inner: &Mutex<MockInner>, handle: SessionHandle) {
    let (callbacks, info) = {
        let guard = lock(inner);
        (guard.callbacks, guard.battery)
    };
    if let Some(callbacks) = callbacks {
        // SAFETY: `info` lives on this frame for the duration of the call.
        unsafe { (callbacks.battery)(&info, handle.as_ptr()) };
    }
}

impl MockDevice {
    pub fn new(config: MockConfig) -> Self {
        let generator = EegGenerator::new(config.sample_rate, usize::from(config.features.electrode_count));
        let inner = MockInner {
            battery: config.battery,
            config,
            connected: false,
            streaming: false,
            enabled: BTreeSet::new(),
            layout: Vec::new(),
            gains: BTreeMap::new(),
            bias: BTreeMap::new(),
            impedance: ImpedanceMeasurementMode::default(),
            callbacks: None,
            tag_override: None,
            sample_count: 0,
            generator,
        };
        let handle = SessionHandle::allocate();
        info!("MockDevice created with handle {:?}", handle);
        Self {
            handle,
            inner: Arc::new(Mutex::new(inner)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Produces and delivers one chunk on the calling thread.
    ///
    /// Returns `false` when nothing was delivered because the stream is off.
    pub fn push_chunk(&self) -> bool {
        produce_chunk(&self.inner, self.handle)
    }

    /// Replaces the reported type tags, e.g. to simulate a newer firmware.
    pub fn set_type_tags_override(&self, tags: Option<Vec<u8>>) {
        lock(&self.inner).tag_override = tags;
    }

    /// Samples delivered since the stream started.
    pub fn sample_count(&self) -> u64 {
        lock(&self.inner).sample_count
    }

    pub fn gain(&self, channel: ChannelId) -> Option<GainMode> {
        lock(&self.inner).gains.get(&channel).copied()
    }

    pub fn bias(&self, channel: ChannelId) -> Option<Polarity> {
        lock(&self.inner).bias.get(&channel).copied()
    }

    pub fn impedance_mode(&self) -> ImpedanceMeasurementMode {
        lock(&self.inner).impedance
    }

    /// Updates the battery state and notifies the battery callback.
    pub fn emit_battery(&self, info: BatteryInfo) {
        lock(&self.inner).battery = info;
        report_battery(&self.inner, self.handle);
    }

    /// Drops the link as if the device went out of range.
    pub fn simulate_disconnect(&self) {
        self.halt_stream();
        let callbacks = {
            let mut guard = lock(&self.inner);
            guard.connected = false;
            guard.callbacks
        };
        warn!("MockDevice {:?} lost its connection", self.handle);
        if let Some(callbacks) = callbacks {
            unsafe { (callbacks.disconnect)(self.handle.as_ptr()) };
        }
    }

    fn callbacks(&self) -> Option<DriverCallbacks> {
        lock(&self.inner).callbacks
    }

    /// Stops the stream thread and resets the layout. Returns whether a
    /// stream was running.
    fn halt_stream(&self) -> bool {
        let was_streaming = std::mem::replace(&mut lock(&self.inner).streaming, false);
        self.stop_flag.store(true, Ordering::SeqCst);

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                debug!("Stream halted from its own thread, not joining");
            } else if worker.join().is_err() {
                warn!("Mock stream thread panicked");
            }
        }

        let mut guard = lock(&self.inner);
        guard.layout.clear();
        // Enabled channels reset on stream stop
        guard.enabled.clear();
        was_streaming
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl DeviceDriver for MockDevice {
    fn handle(&self) -> SessionHandle {
        self.handle
    }

    fn install_callbacks(&self, callbacks: DriverCallbacks) {
        lock(&self.inner).callbacks = Some(callbacks);
    }

    fn connect(&self) -> ConnectionStatus {
        let mut guard = lock(&self.inner);
        let status = guard.config.connect_result;
        guard.connected = status != ConnectionStatus::Failed;
        info!("MockDevice {:?} connect: {:?}", self.handle, status);
        status
    }

    fn disconnect(&self) {
        self.halt_stream();
        let mut guard = lock(&self.inner);
        if guard.connected {
            info!("MockDevice {:?} disconnected", self.handle);
        }
        guard.connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    fn device_info(&self) -> Result<DeviceInfo, DriverError> {
        let guard = lock(&self.inner);
        guard.require_connected()?;
        Ok(DeviceInfo {
            model: guard.config.model,
            hardware_version: "mock".to_string(),
            firmware_version: guard.config.firmware_version.clone(),
            sample_buffer_size: guard.config.chunk_size * 4,
            features: guard.config.features,
        })
    }

    fn sample_frequency(&self) -> u16 {
        lock(&self.inner).config.sample_rate
    }

    fn battery_info(&self) -> BatteryInfo {
        lock(&self.inner).battery
    }

    fn set_channel_enabled(&self, channel: ChannelId, enabled: bool) -> Result<(), DriverError> {
        let mut guard = lock(&self.inner);
        guard.require_connected()?;
        if !guard.supports(channel) {
            return Err(DriverError::InvalidChannel(channel));
        }
        if enabled {
            guard.enabled.insert(channel);
        } else {
            guard.enabled.remove(&channel);
        }
        Ok(())
    }

    fn set_channel_gain(&self, channel: ChannelId, gain: GainMode) -> Result<(), DriverError> {
        let mut guard = lock(&self.inner);
        guard.require_connected()?;
        guard.gains.insert(channel, gain);
        Ok(())
    }

    fn set_channel_bias(&self, channel: ChannelId, polarity: Polarity) -> Result<(), DriverError> {
        let mut guard = lock(&self.inner);
        guard.require_connected()?;
        guard.bias.insert(channel, polarity);
        Ok(())
    }

    fn set_impedance_mode(&self, mode: ImpedanceMeasurementMode) -> Result<(), DriverError> {
        let mut guard = lock(&self.inner);
        guard.require_connected()?;
        guard.impedance = mode;
        Ok(())
    }

    fn load_config(&self) -> Result<(), DriverError> {
        lock(&self.inner).require_connected()?;
        debug!("MockDevice {:?} configuration loaded", self.handle);
        if let Some(callbacks) = self.callbacks() {
            unsafe { (callbacks.config_loaded)(self.handle.as_ptr()) };
        }
        Ok(())
    }

    fn start_stream(&self) -> Result<(), DriverError> {
        let (period, callbacks) = {
            let mut guard = lock(&self.inner);
            guard.require_connected()?;
            if guard.streaming {
                return Err(DriverError::AlreadyStreaming);
            }
            if guard.enabled.is_empty() {
                return Err(DriverError::Other("No channels enabled".to_string()));
            }
            guard.layout = guard.enabled.iter().copied().collect();
            guard.sample_count = 0;
            guard.streaming = true;
            debug!("MockDevice {:?} streaming layout {:?}", self.handle, guard.layout);
            (guard.config.chunk_period, guard.callbacks)
        };

        if let Some(callbacks) = callbacks {
            unsafe { (callbacks.stream_started)(self.handle.as_ptr()) };
        }

        if let Some(period) = period {
            self.stop_flag.store(false, Ordering::SeqCst);
            let inner = Arc::clone(&self.inner);
            let stop_flag = Arc::clone(&self.stop_flag);
            let handle = self.handle;
            let worker = thread::Builder::new()
                .name("mock-eeg-stream".to_string())
                .spawn(move || {
                    let mut chunks = 0u64;
                    while !stop_flag.load(Ordering::SeqCst) {
                        if !produce_chunk(&inner, handle) {
                            break;
                        }
                        chunks += 1;
                        if chunks % BATTERY_REPORT_CHUNKS == 0 {
                            report_battery(&inner, handle);
                        }
                        thread::sleep(period);
                    }
                    debug!("Mock stream thread for {:?} exiting", handle);
                })
                .map_err(|e| DriverError::Other(format!("Failed to spawn stream thread: {}", e)))?;
            *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        }
        Ok(())
    }

    fn stop_stream(&self) -> Result<(), DriverError> {
        if !self.halt_stream() {
            return Err(DriverError::NotStreaming);
        }
        if let Some(callbacks) = self.callbacks() {
            unsafe { (callbacks.stream_stopped)(self.handle.as_ptr()) };
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        lock(&self.inner).streaming
    }

    fn channel_index(&self, channel: ChannelId) -> Option<usize> {
        let guard = lock(&self.inner);
        if !guard.streaming {
            return None;
        }
        guard.layout.iter().position(|&c| c == channel)
    }

    fn stream_channel_types(&self) -> Vec<u8> {
        let guard = lock(&self.inner);
        match &guard.tag_override {
            Some(tags) => tags.clone(),
            None => guard.layout.iter().map(|&c| type_tag(c)).collect(),
        }
    }

    fn start_update(&self) -> Result<(), DriverError> {
        let callbacks = {
            let guard = lock(&self.inner);
            guard.require_connected()?;
            if guard.streaming {
                return Err(DriverError::Busy("Cannot update firmware while streaming".to_string()));
            }
            guard.callbacks
        };
        info!("MockDevice {:?} firmware update started", self.handle);
        if let Some(callbacks) = callbacks {
            for step in 0..=4 {
                unsafe { (callbacks.ota_progress)(self.handle.as_ptr(), step * 25, 100) };
            }
        }
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if self.is_streaming() {
            warn!("MockDevice dropped while streaming");
        }
        self.halt_stream();
    }
}
