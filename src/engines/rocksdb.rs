//! Adapter implementation of [`rocksdb`].
//!
//! ## Configuration Format
//!
//! ``` toml
//! [engine]
//! name = "rocksdb"
//! path = "..." # path to the rocksdb data directory
//! ```
//!
//! A session holds the database open; reopening on the same path resumes the on-disk state, so a
//! per-invocation writer should point `path` at a fresh temp directory per run if it wants fully
//! cold writes.

use crate::engines::Registry;
use crate::error::{Error, Result};
use crate::{Engine, EngineSession};
use rocksdb::DB;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct RocksDbOpt {
    pub path: String,
}

pub struct RocksDbEngine {
    path: String,
}

impl RocksDbEngine {
    pub fn new(opt: &RocksDbOpt) -> Self {
        Self {
            path: opt.path.clone(),
        }
    }

    pub fn new_engine(opt: &toml::Table) -> Result<Box<dyn Engine>> {
        let opt: RocksDbOpt = opt
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;
        Ok(Box::new(Self::new(&opt)))
    }
}

impl Engine for RocksDbEngine {
    fn open(&self) -> Result<Box<dyn EngineSession>> {
        let db = DB::open_default(&self.path).map_err(|e| Error::Open(e.to_string()))?;
        Ok(Box::new(RocksDbSession { db }))
    }
}

pub struct RocksDbSession {
    db: DB,
}

impl EngineSession for RocksDbSession {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .put(key, value)
            .map_err(|e| Error::Write(e.to_string()))
    }

    fn get_into(&self, key: &[u8], dest: &mut [u8]) -> Result<bool> {
        match self.db.get_pinned(key) {
            Ok(Some(v)) => {
                let n = v.len().min(dest.len());
                dest[..n].copy_from_slice(&v[..n]);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(Error::Read(e.to_string())),
        }
    }

    fn close(&self) -> Result<()> {
        self.db.flush().map_err(|e| Error::Close(e.to_string()))
    }

    fn space_used(&self) -> Option<u64> {
        self.db
            .property_int_value("rocksdb.estimate-live-data-size")
            .ok()
            .flatten()
    }
}

inventory::submit! {
    Registry::new("rocksdb", RocksDbEngine::new_engine)
}
