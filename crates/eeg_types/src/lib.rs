//! Shared types for the EEG acquisition workspace
//!
//! This crate contains the data model used on both sides of the driver boundary:
//! logical channel ids and their semantic kinds, the decoded per-channel arrays a
//! chunk callback produces, annotations, device descriptors and the acquisition
//! configuration.

pub mod channel;
pub mod config;
pub mod data;
pub mod device;

// Re-export commonly used types
pub use channel::*;
pub use config::*;
pub use data::*;
pub use device::*;
