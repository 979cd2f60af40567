//! Fixed-capacity circular store of raw geophone samples.
//!
//! The store is the only piece of shared mutable state in the pipeline. The sampler is
//! its single writer; the detector and the transmit worker take windowed snapshots.
//!
//! # Memory Layout
//! ```text
//!                     head (next write slot, oldest sample once full)
//!                      v
//! [ s4 | s5 | s6 | s3 ]   capacity N = 4, after 7 writes s0..s6
//!             ^
//!        newest, offset -1; s3 is offset -4
//! ```
//!
//! Offsets are relative to `head`: `-1` is the most recent sample, `-N` the oldest one
//! once the store has wrapped. A read never wraps around into stale or unwritten
//! slots; such windows are rejected with [`NodeError::Range`].
//!
//! All storage is allocated in [`SampleStore::new`]. `write` and `read` only take the
//! internal mutex for the slot assignment or the copy itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{NodeError, NodeResult, RangeViolation};

/// One raw ADC reading.
pub type Sample = i16;

struct Slots {
    data: Box<[Sample]>,
    /// Next write slot, always `< data.len()`.
    head: usize,
    /// Total writes since construction.
    written: u64,
}

impl Slots {
    fn stored(&self) -> usize {
        // written can exceed usize only after the store is full
        usize::try_from(self.written).map_or(self.data.len(), |w| w.min(self.data.len()))
    }
}

/// Thread-safe circular sample store with overwrite-oldest policy.
pub struct SampleStore {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl SampleStore {
    /// Create a store holding at most `capacity` samples.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] for a zero capacity.
    pub fn new(capacity: usize) -> NodeResult<Self> {
        if capacity == 0 {
            return Err(NodeError::Configuration(
                "sample store capacity must be at least 1".into(),
            ));
        }

        Ok(Self {
            slots: Mutex::new(Slots {
                data: vec![0; capacity].into_boxed_slice(),
                head: 0,
                written: 0,
            }),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panic mid-copy cannot leave the i16 slots in an invalid state.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one sample, overwriting the oldest when full. O(1).
    pub fn write(&self, sample: Sample) {
        let mut slots = self.lock();
        let head = slots.head;
        slots.data[head] = sample;
        slots.head = (head + 1) % self.capacity;
        slots.written += 1;
    }

    /// Copy `size` contiguous samples into `dest`, starting `offset` positions from the
    /// current head.
    ///
    /// `offset` is negative: `-size` reads the most recent `size` samples, `-len()`
    /// starts at the oldest reachable sample. Samples land in `dest[..size]` in write
    /// order (oldest first).
    ///
    /// # Errors
    /// [`NodeError::Range`] if `size` exceeds the capacity, `dest` is too short, or the
    /// window touches samples that were never written, were overwritten, or lie past the
    /// newest sample. `dest` is left untouched on error.
    pub fn read(&self, dest: &mut [Sample], size: usize, offset: isize) -> NodeResult<()> {
        let slots = self.lock();
        let stored = slots.stored();

        let reject = |violation| NodeError::Range {
            violation,
            size,
            offset,
            capacity: self.capacity,
            stored,
        };

        if size > self.capacity {
            return Err(reject(RangeViolation::ExceedsCapacity));
        }
        if dest.len() < size {
            return Err(reject(RangeViolation::DestinationTooSmall));
        }
        if size == 0 && offset == 0 {
            return Ok(());
        }
        if offset >= 0 {
            return Err(reject(RangeViolation::PastNewest));
        }

        let back = offset.unsigned_abs();
        if back > stored {
            return Err(reject(RangeViolation::BeforeOldest));
        }
        if size > back {
            return Err(reject(RangeViolation::PastNewest));
        }

        let start = (slots.head + self.capacity - back) % self.capacity;
        let first = size.min(self.capacity - start);
        dest[..first].copy_from_slice(&slots.data[start..start + first]);
        if first < size {
            dest[first..size].copy_from_slice(&slots.data[..size - first]);
        }
        Ok(())
    }

    /// Copy the most recent `size` samples into `dest`, oldest first.
    ///
    /// # Errors
    /// Same as [`SampleStore::read`] with `offset = -size`.
    pub fn latest(&self, dest: &mut [Sample], size: usize) -> NodeResult<()> {
        let offset = isize::try_from(size).map_err(|_| NodeError::Range {
            violation: RangeViolation::ExceedsCapacity,
            size,
            offset: isize::MIN,
            capacity: self.capacity,
            stored: self.len(),
        })?;
        self.read(dest, size, -offset)
    }

    /// Maximum number of samples held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples currently reachable by a read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().stored()
    }

    /// True before the first write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().written == 0
    }

    /// Total number of writes since construction.
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.lock().written
    }

    /// Current write cursor.
    #[must_use]
    pub fn head(&self) -> usize {
        self.lock().head
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("SampleStore")
            .field("capacity", &self.capacity)
            .field("head", &slots.head)
            .field("written", &slots.written)
            .finish()
    }
}
