//! Descriptors reported by, or sent to, the acquisition device.

use serde::{Deserialize, Serialize};

/// Electrode amplifier gain.
///
/// Lower gains widen the measurable voltage range at the cost of amplitude
/// resolution.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GainMode {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X6 = 3,
    X8 = 4,
    X12 = 5,
    X24 = 6,
}

impl GainMode {
    pub fn from_multiplier(multiplier: u32) -> Option<Self> {
        match multiplier {
            1 => Some(GainMode::X1),
            2 => Some(GainMode::X2),
            4 => Some(GainMode::X4),
            6 => Some(GainMode::X6),
            8 => Some(GainMode::X8),
            12 => Some(GainMode::X12),
            24 => Some(GainMode::X24),
            _ => None,
        }
    }

    pub fn multiplier(&self) -> u32 {
        match self {
            GainMode::X1 => 1,
            GainMode::X2 => 2,
            GainMode::X4 => 4,
            GainMode::X6 => 6,
            GainMode::X8 => 8,
            GainMode::X12 => 12,
            GainMode::X24 => 24,
        }
    }
}

impl Default for GainMode {
    fn default() -> Self {
        GainMode::X8
    }
}

/// Which side of an electrode feeds the bias channel.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    None = 0,
    /// Both sides; the only meaningful value on non-bipolar devices.
    BothSides = 1,
    Positive = 2,
    Negative = 3,
}

/// Impedance measurement drive frequency.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImpedanceMeasurementMode {
    #[default]
    Off = 0,
    Hz7_8 = 1,
    Hz31_2 = 2,
    DrDiv4 = 3,
}

/// Standard battery information.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryInfo {
    /// Charge percentage, 0-100.
    pub level: u8,
    pub is_charger_connected: bool,
    pub is_charging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    Mini,
    Midi,
    Maxi,
    Emg,
    Halo1,
    Halo,
    Unknown,
}

/// Capabilities of a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFeatures {
    pub has_accelerometer: bool,
    pub has_gyroscope: bool,
    pub is_bipolar: bool,
    pub electrode_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: DeviceModel,
    pub hardware_version: String,
    pub firmware_version: String,
    /// Number of samples the device buffers internally.
    pub sample_buffer_size: usize,
    pub features: DeviceFeatures,
}

/// Outcome of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Failed,
    /// Connected, but the data stream layout is not supported.
    Incompatible,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_multipliers_round_trip() {
        for m in [1, 2, 4, 6, 8, 12, 24] {
            let gain = GainMode::from_multiplier(m).unwrap();
            assert_eq!(gain.multiplier(), m);
        }
        assert_eq!(GainMode::from_multiplier(5), None);
        assert_eq!(GainMode::default(), GainMode::X8);
    }

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(GainMode::X12 as u8, 5);
        assert_eq!(Polarity::BothSides as u8, 1);
        assert_eq!(ImpedanceMeasurementMode::Hz31_2 as u8, 2);
    }
}
