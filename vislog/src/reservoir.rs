//! Reservoir sampling for blob components.
//!
//! A [`ReservoirSampler`] keeps at most `k` samples per sampling period out
//! of an unbounded stream of candidates, giving every candidate the same
//! probability of being retained. The split [`index_of_sample_taken`] /
//! [`set_sample`] form lets callers skip encoding candidates that will be
//! discarded anyway.
//!
//! # Period lifecycle
//!
//! ```text
//! start_sampling(k) ──> index_of_sample_taken() ──Some(slot)──> set_sample(slot, ..)
//!                              │  ^                                   │
//!                              │  └───────────────────────────────────┘
//!                              └──None (candidate rejected)
//! finish_sampling() ──> occupied slots in slot order, state cleared
//! ```
//!
//! [`index_of_sample_taken`]: ReservoirSampler::index_of_sample_taken
//! [`set_sample`]: ReservoirSampler::set_sample

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, SamplingError};

/// Per-tag reservoir sampling state machine.
///
/// The sampler is generic over the retained sample type so that the image
/// and audio components can share it.
///
/// # Thread Safety
///
/// A sampler belongs to exactly one writer-side component. It is not
/// internally synchronized.
#[derive(Debug)]
pub struct ReservoirSampler<S> {
    /// Retained samples; `None` for slots not yet filled this period.
    slots: Vec<Option<S>>,
    /// Number of candidates offered this period.
    seen: u64,
    /// Whether a period is open.
    active: bool,
    /// Slot handed out by the last `index_of_sample_taken` call.
    pending: Option<usize>,
    rng: StdRng,
}

impl<S> ReservoirSampler<S> {
    /// Creates a sampler seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Creates a sampler with a deterministic seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            slots: Vec::new(),
            seen: 0,
            active: false,
            pending: None,
            rng,
        }
    }

    /// Opens a new sampling period retaining at most `capacity` samples.
    ///
    /// # Errors
    ///
    /// - [`SamplingError::AlreadyActive`] if a period is already open
    /// - [`SamplingError::InvalidCapacity`] if `capacity` is zero
    pub fn start_sampling(&mut self, capacity: usize) -> Result<()> {
        if self.active {
            return Err(SamplingError::AlreadyActive.into());
        }
        if capacity == 0 {
            return Err(SamplingError::InvalidCapacity.into());
        }

        self.slots.clear();
        self.slots.resize_with(capacity, || None);
        self.seen = 0;
        self.pending = None;
        self.active = true;
        Ok(())
    }

    /// Offers one candidate and returns the slot it should be stored in, or
    /// `None` if it is not sampled.
    ///
    /// The first `k` candidates of a period fill slots `0..k` in order. After
    /// that, candidate `n` draws `r` uniformly from `[0, n)` and replaces
    /// slot `r` if `r < k`.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::NoActivePeriod`] if no period is open.
    #[allow(clippy::cast_possible_truncation)] // r < capacity, which is a usize
    pub fn index_of_sample_taken(&mut self) -> Result<Option<usize>> {
        if !self.active {
            return Err(SamplingError::NoActivePeriod.into());
        }

        self.seen += 1;
        let capacity = self.slots.len() as u64;

        let slot = if self.seen <= capacity {
            Some((self.seen - 1) as usize)
        } else {
            let r = self.rng.random_range(0..self.seen);
            (r < capacity).then_some(r as usize)
        };

        self.pending = slot;
        Ok(slot)
    }

    /// Stores a sample in the slot returned by the preceding
    /// [`index_of_sample_taken`](Self::index_of_sample_taken) call.
    ///
    /// # Errors
    ///
    /// - [`SamplingError::NoActivePeriod`] if no period is open
    /// - [`SamplingError::UnexpectedSlot`] if `slot` is not the slot that
    ///   was just handed out
    pub fn set_sample(&mut self, slot: usize, sample: S) -> Result<()> {
        if !self.active {
            return Err(SamplingError::NoActivePeriod.into());
        }
        if self.pending != Some(slot) {
            return Err(SamplingError::UnexpectedSlot {
                slot,
                expected: self.pending,
            }
            .into());
        }

        self.slots[slot] = Some(sample);
        self.pending = None;
        Ok(())
    }

    /// Offers a candidate whose payload is already built.
    ///
    /// Equivalent to [`index_of_sample_taken`](Self::index_of_sample_taken)
    /// followed by [`set_sample`](Self::set_sample). Returns the slot the
    /// sample was stored in.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::NoActivePeriod`] if no period is open.
    pub fn add_sample(&mut self, sample: S) -> Result<Option<usize>> {
        self.add_sample_with(|| sample)
    }

    /// Offers a candidate whose payload is built only if it is sampled.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::NoActivePeriod`] if no period is open.
    pub fn add_sample_with<F>(&mut self, build: F) -> Result<Option<usize>>
    where
        F: FnOnce() -> S,
    {
        let slot = self.index_of_sample_taken()?;
        if let Some(slot) = slot {
            self.set_sample(slot, build())?;
        }
        Ok(slot)
    }

    /// Closes the period and returns the occupied slots in slot order.
    ///
    /// The sampler is cleared, releasing every retained sample.
    ///
    /// # Errors
    ///
    /// Returns [`SamplingError::NoActivePeriod`] if no period is open.
    pub fn finish_sampling(&mut self) -> Result<Vec<S>> {
        if !self.active {
            return Err(SamplingError::NoActivePeriod.into());
        }

        let samples = self.slots.drain(..).flatten().collect();
        self.slots.shrink_to_fit();
        self.seen = 0;
        self.pending = None;
        self.active = false;
        Ok(samples)
    }

    /// Whether a sampling period is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of candidates offered in the current period.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Capacity of the current period, or 0 if no period is open.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a sample.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<S> Default for ReservoirSampler<S> {
    fn default() -> Self {
        Self::new()
    }
}
