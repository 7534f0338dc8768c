//! Loading of the acquisition configuration file.

use std::path::Path;

use eeg_types::AcquisitionConfig;
use log::{info, warn};

use crate::error::{AcquisitionError, Result};

/// Reads an [`AcquisitionConfig`] from a JSON file. Missing fields take their
/// defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<AcquisitionConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config: AcquisitionConfig = serde_json::from_str(&contents)?;

    if config.cap.is_empty() {
        return Err(AcquisitionError::InvalidConfiguration(format!(
            "{}: cap has no electrodes",
            path.display()
        )));
    }
    if config.gain_mode().is_none() {
        warn!("Gain {} in {} is not supported, 8 will be used", config.gain, path.display());
    }
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
