//! An engine that does nothing, for measuring harness overhead.
//!
//! ## Configuration Format
//!
//! ``` toml
//! [engine]
//! name = "null"
//! ```
//!
//! `get_into` reports a hit without writing any bytes, so read benchmarks against it still pass
//! the post-run miss check. Pair it with deterministic payloads; there is no stored data for the
//! zero-prefix check to inspect.

use crate::engines::Registry;
use crate::error::Result;
use crate::{Engine, EngineSession};

pub struct NullEngine;

impl NullEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn new_engine(_opt: &toml::Table) -> Result<Box<dyn Engine>> {
        Ok(Box::new(Self::new()))
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for NullEngine {
    fn open(&self) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(NullSession))
    }
}

pub struct NullSession;

impl EngineSession for NullSession {
    fn put(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }

    fn get_into(&self, _key: &[u8], _dest: &mut [u8]) -> Result<bool> {
        Ok(true)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

inventory::submit! {
    Registry::new("null", NullEngine::new_engine)
}
