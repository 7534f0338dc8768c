//! Orchestrates one recording against a [`DeviceManager`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eeg_sensor::{DeviceManager, DriverError};
use eeg_types::{
    ids, AcquisitionConfig, Annotation, ChannelKind, ChannelMap, ChannelSpec, ConnectionStatus,
    GainMode, Polarity,
};
use log::{debug, info, warn};

use crate::error::{AcquisitionError, Result};
use crate::session::Session;
use crate::snapshot::{Snapshot, SnapshotRequest};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const ACCELEROMETER_AXES: [&str; 3] = ["Accel_x", "Accel_y", "Accel_z"];

/// Drives a device through setup, streaming and teardown, feeding every
/// chunk into a [`Session`].
pub struct EegRecorder {
    manager: DeviceManager,
    config: AcquisitionConfig,
    session: Option<Arc<Session>>,
}

impl EegRecorder {
    /// Connects, builds the channel map from the cap and the device's
    /// features, and creates the session.
    ///
    /// An incompatible device is accepted here; [`EegRecorder::start`] then
    /// fails with [`DriverError::IncompatibleStream`].
    pub fn setup(manager: DeviceManager, config: AcquisitionConfig) -> Result<Self> {
        connect_with_retry(&manager, Duration::from_millis(config.connect_timeout_ms))?;

        let features = manager.device_features()?;
        let mut channels = ChannelMap::new();
        for (&electrode, name) in &config.cap {
            if electrode >= u16::from(features.electrode_count) {
                return Err(AcquisitionError::InvalidConfiguration(format!(
                    "electrode {} ({}) not available, device has {}",
                    electrode, name, features.electrode_count
                )));
            }
            insert(&mut channels, ids::ELECTRODE_MEASUREMENT + electrode, name, ChannelKind::Eeg)?;
        }
        if let Some(&electrode) = config
            .bias
            .iter()
            .find(|&&electrode| electrode >= u16::from(features.electrode_count))
        {
            return Err(AcquisitionError::InvalidConfiguration(format!(
                "bias electrode {} not available, device has {}",
                electrode, features.electrode_count
            )));
        }
        if features.has_accelerometer {
            for (axis, name) in (0u16..).zip(ACCELEROMETER_AXES) {
                insert(&mut channels, ids::ACCELEROMETER + axis, name, ChannelKind::Accelerometer)?;
            }
        }
        insert(&mut channels, ids::SAMPLE_NUMBER, "Sample", ChannelKind::SampleCounter)?;

        let sample_rate = f64::from(manager.sample_frequency());
        let session = Session::new(channels, config.buffer.clone(), sample_rate)?;
        info!(
            "Recorder set up: {} channels at {} Hz",
            session.channels().len(),
            sample_rate
        );

        Ok(Self {
            manager,
            config,
            session: Some(Arc::new(session)),
        })
    }

    fn active_session(&self) -> Result<&Arc<Session>> {
        self.session.as_ref().ok_or(AcquisitionError::Driver(DriverError::NotConnected))
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    /// Configures the mapped channels, installs the handlers and starts the
    /// stream. The driver's row order is resolved once the stream runs.
    pub fn start(&self) -> Result<()> {
        let session = Arc::clone(self.active_session()?);
        let channels = session.channels();

        for id in channels.ids() {
            self.manager.set_channel_enabled(id, true)?;
        }

        let gain = self.config.gain_mode().unwrap_or_else(|| {
            warn!("Gain {} not supported, using 8", self.config.gain);
            GainMode::X8
        });
        for id in channels.ids_of_kind(ChannelKind::Eeg) {
            self.manager.set_channel_gain(id, gain)?;
        }
        for &electrode in &self.config.bias {
            self.manager
                .set_channel_bias(ids::ELECTRODE_MEASUREMENT + electrode, Polarity::BothSides)?;
        }

        let ingest = Arc::clone(&session);
        self.manager.set_chunk_handler(Some(Box::new(move |chunk| {
            if let Err(e) = ingest.ingest(chunk) {
                warn!("Chunk dropped: {}", e);
            }
        })));
        let on_disconnect = Arc::clone(&session);
        self.manager.set_disconnect_handler(Some(Box::new(move || {
            warn!("Device disconnected, annotations cleared");
            on_disconnect.clear_annotations();
        })));

        self.manager.load_config(None)?;
        // Rows follow the driver's layout from the first chunk on
        session.await_channel_order();
        self.manager.start_stream(None)?;

        let order = channels
            .ids()
            .map(|id| self.manager.channel_index(id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        session.set_channel_order(order)?;
        info!("Recording started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.manager.stop_stream(None)?;
        info!("Recording stopped");
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.manager.is_streaming()
    }

    pub fn annotate(&self, text: &str) -> Result<()> {
        self.active_session()?.annotate(text)
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.session
            .as_ref()
            .map(|session| session.annotations())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, request: SnapshotRequest) -> Result<Option<Snapshot>> {
        self.active_session()?.snapshot(request)
    }

    pub fn battery_level(&self) -> u8 {
        self.manager.battery_info().level
    }

    /// Stops the stream, disconnects and unregisters the device, then drops
    /// the session. Safe to call more than once.
    pub fn teardown(&mut self) {
        if self.manager.is_streaming() {
            if let Err(e) = self.manager.stop_stream(None) {
                warn!("Failed to stop stream during teardown: {}", e);
            }
        }
        self.manager.destroy();
        self.manager.set_chunk_handler(None);
        self.manager.set_disconnect_handler(None);
        if let Some(session) = self.session.take() {
            session.clear_annotations();
            debug!("Session released");
        }
    }
}

impl Drop for EegRecorder {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn insert(channels: &mut ChannelMap, id: u16, name: &str, kind: ChannelKind) -> Result<()> {
    channels
        .insert(id, ChannelSpec::new(name, kind))
        .map_err(|e| AcquisitionError::InvalidConfiguration(e.to_string()))
}

/// Retries the connection until it succeeds or `timeout` elapses.
fn connect_with_retry(manager: &DeviceManager, timeout: Duration) -> Result<ConnectionStatus> {
    let started = Instant::now();
    loop {
        match manager.connect() {
            ConnectionStatus::Failed if started.elapsed() < timeout => {
                debug!("Connection failed, retrying");
                thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            ConnectionStatus::Failed => {
                warn!("Could not connect within {:?}", timeout);
                return Err(DriverError::NotConnected.into());
            }
            status => return Ok(status),
        }
    }
}
