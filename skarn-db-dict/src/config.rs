//! Open-time dictionary configuration.
//!
//! Pure data structure — no I/O. Validation happens when the options are
//! handed to [`StringDictionary::open`](crate::StringDictionary::open).

use crate::error::{DictError, Result};

/// Default index capacity for a freshly created dictionary.
///
/// Small on purpose: the index doubles on demand and recovery sizes it from
/// the offsets file, so the initial value only matters for tiny columns.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1 << 14;

/// Options controlling how a dictionary is opened.
///
/// `initial_capacity` must be a non-zero power of two — bucket selection is
/// `hash & (capacity - 1)`.
#[derive(Debug, Clone)]
pub struct DictOptions {
    /// Heap-backed, never touches disk. Used for transient query execution.
    pub temp: bool,
    /// Preserve existing files and rebuild the index from them on open.
    /// When `false`, existing files are truncated.
    pub recover: bool,
    /// Keep a parallel array of per-id hashes so collision screening and
    /// resize never re-read the payload.
    pub materialize_hashes: bool,
    /// Initial index slot count. Power of two.
    pub initial_capacity: usize,
}

impl Default for DictOptions {
    fn default() -> Self {
        Self {
            temp: false,
            recover: false,
            materialize_hashes: false,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl DictOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp(mut self, temp: bool) -> Self {
        self.temp = temp;
        self
    }

    pub fn recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    pub fn materialize_hashes(mut self, materialize: bool) -> Self {
        self.materialize_hashes = materialize;
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Reject a zero or non-power-of-two capacity.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capacity == 0 || !self.initial_capacity.is_power_of_two() {
            return Err(DictError::InvalidCapacity(self.initial_capacity));
        }
        Ok(())
    }
}
