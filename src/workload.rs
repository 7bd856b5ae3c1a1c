//! Workload generation: the ordered key sequence for a trial and the pool of pseudo-random bytes
//! that value payloads are cut from.
//!
//! Generation is pure given `(nr_keys, seed)`: the same seed always produces the same key order
//! and the same pool, so a benchmark can be reproduced bit-for-bit. Both outputs are created once
//! per trial and shared read-only across worker threads.

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;

/// Default size of the random value pool. Large enough that cyclic payload slices repeat rarely,
/// small enough to stay resident in memory next to the store under test.
pub const DEFAULT_POOL_SIZE: usize = 1 << 20;

/// The order in which key indices are visited during a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyOrder {
    /// Identity order `0..nr_keys`.
    Sequential,
    /// A uniformly shuffled permutation of `0..nr_keys` (Fisher-Yates, seeded).
    Shuffled,
}

/// Produce the ordered sequence of key indices for one trial.
pub fn keys(nr_keys: usize, order: KeyOrder, seed: u64) -> Arc<[usize]> {
    let mut keys: Vec<usize> = (0..nr_keys).collect();
    if order == KeyOrder::Shuffled {
        let mut rng = StdRng::seed_from_u64(seed);
        keys.shuffle(&mut rng);
    }
    keys.into()
}

/// Produce the shared pool of pseudo-random value bytes.
pub fn pool(size: usize, seed: u64) -> Arc<[u8]> {
    let mut bytes = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
    bytes.into()
}

/// A per-thread source of value payloads.
///
/// Deterministic mode writes the key index as a 4-byte little-endian integer at the head of the
/// value. Random mode cuts a `vlen`-sized slice from the shared pool and advances the offset
/// cyclically, wrapping before `pool.len() - vlen` so a slice never reads past the pool bound.
///
/// Each worker owns its own source (the cursor is thread-local state); only the pool behind it is
/// shared.
pub struct PayloadSource {
    pool: Option<Arc<[u8]>>,
    vlen: usize,
    offset: usize,
}

impl PayloadSource {
    pub fn deterministic(vlen: usize) -> Result<Self> {
        if vlen < 4 {
            return Err(Error::Config(format!(
                "value_size should be at least 4 for deterministic payloads, got {}",
                vlen
            )));
        }
        Ok(Self {
            pool: None,
            vlen,
            offset: 0,
        })
    }

    pub fn random(pool: Arc<[u8]>, vlen: usize) -> Result<Self> {
        if vlen == 0 {
            return Err(Error::Config("value_size should be positive".to_string()));
        }
        if pool.len() <= vlen {
            return Err(Error::Config(format!(
                "random pool of {} bytes should be larger than value_size {}",
                pool.len(),
                vlen
            )));
        }
        Ok(Self {
            pool: Some(pool),
            vlen,
            offset: 0,
        })
    }

    /// Fill `dest` (exactly `vlen` bytes) with the payload for `index`.
    pub fn fill(&mut self, index: usize, dest: &mut [u8]) {
        debug_assert_eq!(dest.len(), self.vlen);
        match &self.pool {
            Some(pool) => {
                dest.copy_from_slice(&pool[self.offset..self.offset + self.vlen]);
                self.offset += self.vlen;
                if self.offset >= pool.len() - self.vlen {
                    self.offset = 0;
                }
            }
            None => {
                dest.fill(0);
                dest[..4].copy_from_slice(&(index as u32).to_le_bytes());
            }
        }
    }
}
