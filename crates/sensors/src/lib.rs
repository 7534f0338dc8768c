pub mod dispatch;
pub mod manager;
pub mod mock_eeg;
pub mod registry;
pub mod type_table;
pub mod types;

// Re-export the main types that users need
pub use dispatch::{BatteryHandler, ChunkHandler, EventHandler, ProgressHandler};
pub use manager::DeviceManager;
pub use mock_eeg::{MockConfig, MockDevice};
pub use types::{DecodeError, DeviceDriver, DriverCallbacks, DriverError, SessionHandle};

// Expose lower-level access through a raw module
pub mod raw {
    pub use crate::registry::Registry;
    pub use crate::type_table::*;
}
