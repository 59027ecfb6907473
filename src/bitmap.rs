// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Fixed-Size Bitmap
//!
//! Storage is allocated once at construction. Setting and clearing bits
//! never allocates, so a bitmap can be updated from the fault handler.

/// Bitmap storage word
pub type BitmapStorage = u64;

const WORD_BITS: usize = BitmapStorage::BITS as usize;

/// Fixed-size bitmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Box<[BitmapStorage]>,
    size: usize,
}

impl Bitmap {
    /// Create a bitmap of `size` cleared bits
    pub fn new(size: usize) -> Self {
        let words = vec![0; size.div_ceil(WORD_BITS)].into_boxed_slice();
        Self { words, size }
    }

    /// Number of bits
    pub fn size(&self) -> usize {
        self.size
    }

    /// Test a bit; out-of-range bits read as clear
    pub fn get(&self, bit: usize) -> bool {
        bit < self.size && self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Set a bit, returning whether it was clear before
    pub fn set(&mut self, bit: usize) -> bool {
        assert!(bit < self.size, "bit {} out of range {}", bit, self.size);
        let mask = 1 << (bit % WORD_BITS);
        let word = &mut self.words[bit / WORD_BITS];
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate set bit indices in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |&bit| self.get(bit))
    }
}
