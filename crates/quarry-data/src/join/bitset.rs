//! Growable bitset for matched-row tracking.

use quarry_common::constants::INITIAL_BITSET_CAPACITY;

/// A bitset that doubles its capacity when a bit beyond it is set.
#[derive(Debug, Clone)]
pub struct GrowableBitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl Default for GrowableBitSet {
    fn default() -> Self {
        Self::with_capacity(INITIAL_BITSET_CAPACITY)
    }
}

impl GrowableBitSet {
    /// Creates a bitset with the default initial capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bitset holding at least `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        let capacity = bits.max(64).next_multiple_of(64);
        Self {
            words: vec![0; capacity / 64],
            capacity,
        }
    }

    /// Sets bit `index`, growing as needed.
    pub fn set(&mut self, index: usize) {
        if index >= self.capacity {
            let mut capacity = self.capacity;
            while index >= capacity {
                capacity *= 2;
            }
            self.words.resize(capacity / 64, 0);
            self.capacity = capacity;
        }
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Returns bit `index`; bits beyond the capacity are unset.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Number of set bits.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Current capacity in bits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unsets every bit, keeping the capacity.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}
