//! Synthetic device used by tests and the demo binary.

pub mod driver;
pub mod mock_data_generator;

pub use driver::{MockConfig, MockDevice};
