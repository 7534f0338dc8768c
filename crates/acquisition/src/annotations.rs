use std::sync::{Mutex, MutexGuard, PoisonError};

use eeg_types::Annotation;
use log::debug;

use crate::error::{AcquisitionError, Result};

/// Timestamped text markers in arrival order.
#[derive(Debug, Default)]
pub struct AnnotationLog {
    entries: Mutex<Vec<Annotation>>,
}

impl AnnotationLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Annotation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a marker. Empty text is rejected and leaves the log unchanged.
    pub fn append(&self, text: &str, timestamp: f64) -> Result<()> {
        if text.is_empty() {
            return Err(AcquisitionError::EmptyAnnotation);
        }
        debug!("Annotation '{}' at {}", text, timestamp);
        self.entries().push(Annotation {
            text: text.to_string(),
            timestamp,
        });
        Ok(())
    }

    pub fn all(&self) -> Vec<Annotation> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
