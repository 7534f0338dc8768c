//! The application-side owner of one device connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eeg_types::{
    BatteryInfo, ChannelId, ConnectionStatus, DeviceFeatures, DeviceInfo, GainMode,
    ImpedanceMeasurementMode, Polarity,
};
use log::{debug, info, warn};

use crate::dispatch::{
    driver_callbacks, replace_handler, BatteryHandler, ChunkHandler, EventHandler, Handlers,
    ProgressHandler, MANAGERS,
};
use crate::types::{DeviceDriver, DriverError, SessionHandle};

/// Highest channel id whose gain can be changed.
const MAX_GAIN_CHANNEL: ChannelId = 33;

/// State reachable from driver callbacks.
pub(crate) struct ManagerShared {
    pub(crate) driver: Arc<dyn DeviceDriver>,
    pub(crate) handlers: Handlers,
}

/// Owns the callback routing for one driver connection.
///
/// Creating a manager registers it for its driver's handle; dropping it (or
/// calling [`DeviceManager::destroy`]) disconnects the driver first and then
/// unregisters, so no callback reaches a released manager.
pub struct DeviceManager {
    shared: Arc<ManagerShared>,
    handle: SessionHandle,
    connection: Mutex<Option<ConnectionStatus>>,
    destroyed: AtomicBool,
}

impl DeviceManager {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        let handle = driver.handle();
        let shared = Arc::new(ManagerShared {
            driver,
            handlers: Handlers::default(),
        });
        MANAGERS.register(handle, &shared);
        shared.driver.install_callbacks(driver_callbacks());
        replace_handler(&shared.handlers.disconnect, Some(Box::new(|| {}) as EventHandler));

        Self {
            shared,
            handle,
            connection: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    fn driver(&self) -> &dyn DeviceDriver {
        self.shared.driver.as_ref()
    }

    fn ensure_not_streaming(&self, what: &str) -> Result<(), DriverError> {
        if self.driver().is_streaming() {
            return Err(DriverError::Busy(format!("Cannot change {} while streaming", what)));
        }
        Ok(())
    }

    /// Connects to the device.
    ///
    /// An `Incompatible` result leaves the device connected, but streaming is
    /// refused until the firmware is updated.
    pub fn connect(&self) -> ConnectionStatus {
        let status = self.driver().connect();
        if status == ConnectionStatus::Incompatible {
            warn!("Stream is incompatible. Update the firmware.");
        }
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        status
    }

    pub fn disconnect(&self) {
        self.driver().disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.driver().is_connected()
    }

    pub fn is_streaming(&self) -> bool {
        self.driver().is_streaming()
    }

    /// Device model, versions and buffer size. Requires a connection.
    pub fn device_info(&self) -> Result<DeviceInfo, DriverError> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected);
        }
        self.driver().device_info()
    }

    pub fn device_features(&self) -> Result<DeviceFeatures, DriverError> {
        Ok(self.device_info()?.features)
    }

    /// Sample rate in Hz.
    pub fn sample_frequency(&self) -> u16 {
        self.driver().sample_frequency()
    }

    pub fn battery_info(&self) -> BatteryInfo {
        self.driver().battery_info()
    }

    /// Row of `channel` inside delivered chunks.
    pub fn channel_index(&self, channel: ChannelId) -> Result<usize, DriverError> {
        self.driver()
            .channel_index(channel)
            .ok_or(DriverError::ChannelNotStreaming(channel))
    }

    /// Enables or disables a channel. Enabled channels reset on stream stop.
    pub fn set_channel_enabled(&self, channel: ChannelId, enabled: bool) -> Result<(), DriverError> {
        self.ensure_not_streaming("channel state")?;
        self.driver().set_channel_enabled(channel, enabled)
    }

    /// Changes the gain of an electrode channel; takes effect on stream start.
    pub fn set_channel_gain(&self, channel: ChannelId, gain: GainMode) -> Result<(), DriverError> {
        if channel > MAX_GAIN_CHANNEL {
            return Err(DriverError::InvalidChannel(channel));
        }
        self.ensure_not_streaming("channel gain")?;
        self.driver().set_channel_gain(channel, gain)
    }

    /// Feeds `channel` into the bias electrode with the given polarity.
    ///
    /// On devices that are not bipolar use [`Polarity::BothSides`].
    pub fn set_channel_bias(&self, channel: ChannelId, polarity: Polarity) -> Result<(), DriverError> {
        self.ensure_not_streaming("channel bias")?;
        self.driver().set_channel_bias(channel, polarity)
    }

    /// Boolean form of [`DeviceManager::set_channel_bias`]: `true` selects
    /// both sides, `false` none.
    #[deprecated(note = "use set_channel_bias with a Polarity")]
    pub fn set_channel_bias_flag(&self, channel: ChannelId, bias: bool) -> Result<(), DriverError> {
        warn!("set_channel_bias_flag is deprecated, use set_channel_bias with a Polarity");
        let polarity = if bias { Polarity::BothSides } else { Polarity::None };
        self.set_channel_bias(channel, polarity)
    }

    pub fn set_impedance_mode(&self, mode: ImpedanceMeasurementMode) -> Result<(), DriverError> {
        self.ensure_not_streaming("impedance mode")?;
        self.driver().set_impedance_mode(mode)
    }

    /// Pushes channel settings to the device. `on_loaded` runs when the
    /// device confirms.
    pub fn load_config(&self, on_loaded: Option<EventHandler>) -> Result<(), DriverError> {
        replace_handler(
            &self.shared.handlers.config_loaded,
            Some(on_loaded.unwrap_or_else(|| Box::new(|| {}))),
        );
        self.driver().load_config()
    }

    pub fn start_stream(&self, on_started: Option<EventHandler>) -> Result<(), DriverError> {
        let status = *self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if status == Some(ConnectionStatus::Incompatible) {
            return Err(DriverError::IncompatibleStream);
        }
        replace_handler(
            &self.shared.handlers.stream_started,
            Some(on_started.unwrap_or_else(|| Box::new(|| {}))),
        );
        if self.is_streaming() {
            return Err(DriverError::AlreadyStreaming);
        }
        self.driver().start_stream()?;
        info!("Stream started on {:?}", self.handle);
        Ok(())
    }

    pub fn stop_stream(&self, on_stopped: Option<EventHandler>) -> Result<(), DriverError> {
        replace_handler(
            &self.shared.handlers.stream_stopped,
            Some(on_stopped.unwrap_or_else(|| Box::new(|| {}))),
        );
        if !self.is_streaming() {
            return Err(DriverError::NotStreaming);
        }
        self.driver().stop_stream()?;
        info!("Stream stopped on {:?}", self.handle);
        Ok(())
    }

    /// Sets the chunk handler; `None` disables chunk delivery.
    ///
    /// The handler runs on a driver thread and must return quickly.
    pub fn set_chunk_handler(&self, handler: Option<ChunkHandler>) {
        replace_handler(&self.shared.handlers.chunk, handler);
    }

    pub fn set_battery_handler(&self, handler: BatteryHandler) {
        replace_handler(&self.shared.handlers.battery, Some(handler));
    }

    /// Sets the disconnect handler; `None` installs a no-op.
    pub fn set_disconnect_handler(&self, handler: Option<EventHandler>) {
        replace_handler(
            &self.shared.handlers.disconnect,
            Some(handler.unwrap_or_else(|| Box::new(|| {}))),
        );
    }

    /// Starts a firmware update, reporting progress to `on_progress`.
    pub fn start_update(&self, on_progress: Option<ProgressHandler>) -> Result<(), DriverError> {
        replace_handler(
            &self.shared.handlers.ota_progress,
            Some(on_progress.unwrap_or_else(|| Box::new(|_, _| {}))),
        );
        self.driver().start_update()
    }

    /// Disconnects, unregisters and drops every handler. Idempotent; also
    /// runs on drop.
    ///
    /// Waits for handlers that are still running, so it must not be called
    /// (nor the manager dropped) from one of this manager's own handlers.
    /// Handlers of other managers may destroy this one.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Disconnect first so the driver stops calling back.
        self.disconnect();
        MANAGERS.unregister(self.handle);
        self.shared.handlers.retire();
        debug!("Manager for {:?} destroyed", self.handle);
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
