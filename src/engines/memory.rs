//! In-memory reference engines. Internally sharded.
//!
//! ## Configuration Format
//!
//! ### [`Mutex`]-based hash map:
//!
//! ``` toml
//! [engine]
//! name = "memory"
//! shards = ... # number of shards, default 512
//! ```
//!
//! ### [`RwLock`]-based B-tree map:
//!
//! ``` toml
//! [engine]
//! name = "btreemap"
//! ```
//!
//! Both open a fresh, empty store per session, so a reopening writer always measures cold
//! writes.

use crate::engines::Registry;
use crate::error::{Error, Result};
use crate::{Engine, EngineSession};
use ::hashbrown::HashMap;
use ahash::AHasher;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::hash::Hasher;

/// Pick the shard of a key using [`AHasher`].
fn shard(key: &[u8], nr_shards: usize) -> usize {
    let mut hasher = AHasher::default();
    hasher.write(key);
    (hasher.finish() % nr_shards as u64) as usize
}

/// A wrapper around raw [`HashMap`] with variable-sized keys and values, used as the building
/// block of a shard.
type BaseHashMap = HashMap<Box<[u8]>, Box<[u8]>>;

const DEFAULT_SHARDS: usize = 512;

#[derive(Deserialize)]
pub struct MemoryEngineOpt {
    pub shards: Option<usize>,
}

pub struct MemoryEngine {
    nr_shards: usize,
}

impl MemoryEngine {
    pub fn new(opt: &MemoryEngineOpt) -> Self {
        Self {
            nr_shards: opt.shards.unwrap_or(DEFAULT_SHARDS),
        }
    }

    pub fn new_engine(opt: &toml::Table) -> Result<Box<dyn Engine>> {
        let opt: MemoryEngineOpt = opt
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;
        Ok(Box::new(Self::new(&opt)))
    }
}

impl Engine for MemoryEngine {
    fn open(&self) -> Result<Box<dyn EngineSession>> {
        if self.nr_shards == 0 {
            return Err(Error::Open("shards should be positive".to_string()));
        }
        let shards = (0..self.nr_shards).map(|_| Mutex::new(BaseHashMap::new())).collect();
        Ok(Box::new(MemorySession {
            nr_shards: self.nr_shards,
            shards,
        }))
    }
}

pub struct MemorySession {
    nr_shards: usize,
    shards: Vec<Mutex<BaseHashMap>>,
}

impl EngineSession for MemorySession {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let sid = shard(key, self.nr_shards);
        self.shards[sid].lock().insert(key.into(), value.into());
        Ok(())
    }

    fn get_into(&self, key: &[u8], dest: &mut [u8]) -> Result<bool> {
        let sid = shard(key, self.nr_shards);
        match self.shards[sid].lock().get(key) {
            Some(v) => {
                let n = v.len().min(dest.len());
                dest[..n].copy_from_slice(&v[..n]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn space_used(&self) -> Option<u64> {
        let mut bytes = 0u64;
        for s in self.shards.iter() {
            for (k, v) in s.lock().iter() {
                bytes += (k.len() + v.len()) as u64;
            }
        }
        Some(bytes)
    }
}

inventory::submit! {
    Registry::new("memory", MemoryEngine::new_engine)
}

// {{{ btreemap

pub struct BTreeMapEngine;

impl BTreeMapEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn new_engine(_opt: &toml::Table) -> Result<Box<dyn Engine>> {
        Ok(Box::new(Self::new()))
    }
}

impl Default for BTreeMapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for BTreeMapEngine {
    fn open(&self) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(BTreeMapSession {
            map: RwLock::new(BTreeMap::new()),
        }))
    }
}

pub struct BTreeMapSession {
    map: RwLock<BTreeMap<Box<[u8]>, Box<[u8]>>>,
}

impl EngineSession for BTreeMapSession {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.into(), value.into());
        Ok(())
    }

    fn get_into(&self, key: &[u8], dest: &mut [u8]) -> Result<bool> {
        match self.map.read().get(key) {
            Some(v) => {
                let n = v.len().min(dest.len());
                dest[..n].copy_from_slice(&v[..n]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn space_used(&self) -> Option<u64> {
        let map = self.map.read();
        Some(map.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
    }
}

inventory::submit! {
    Registry::new("btreemap", BTreeMapEngine::new_engine)
}

// }}} btreemap
