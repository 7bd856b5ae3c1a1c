//! Built-in engine adapters and the registry that constructs them by name.
//!
//! ## Configuration Format
//!
//! The configuration of an engine is stored in a dictionary named `engine`:
//!
//! ```toml
//! [engine]
//! name = "..."
//! # option1 = ...
//! # option2 = ...
//! ```
//!
//! The field `name` must be given and it should be equal to the name registered by the engine.
//! Other than `name`, all the fields are parsed as a table and handed over to the engine's
//! constructor function. For available options other than `name`, refer to the module-level
//! documentation of a specific engine.
//!
//! ## Registering New Engines
//!
//! To benchmark a store from another crate, implement [`Engine`]/[`crate::EngineSession`] for it,
//! write a constructor function with a signature of `fn(&toml::Table) -> Result<Box<dyn Engine>>`,
//! and register it with [`inventory`]: `inventory::submit! { Registry::new("name", constructor_fn) };`.
//! The source of the built-in engines provides good examples on this process.

use crate::error::{Error, Result};
use crate::Engine;
use hashbrown::HashMap;
use log::debug;
use serde::Deserialize;
use toml::Table;

/// The centralized registry that maps the name of an engine to its constructor function.
pub struct Registry {
    pub(crate) name: &'static str,
    constructor: fn(&Table) -> Result<Box<dyn Engine>>,
}

impl Registry {
    pub const fn new(name: &'static str, constructor: fn(&Table) -> Result<Box<dyn Engine>>) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(Registry);

/// The `[engine]` section parsed from a TOML string: a name plus engine-specific options.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineOpt {
    pub(crate) name: String,
    #[serde(flatten)]
    pub(crate) opt: Table,
}

/// Construct the named engine from its options.
pub fn create(opt: &EngineOpt) -> Result<Box<dyn Engine>> {
    let mut registered: HashMap<&'static str, fn(&Table) -> Result<Box<dyn Engine>>> =
        HashMap::new();
    for r in inventory::iter::<Registry> {
        debug!("Adding registered engine: {}", r.name);
        assert!(registered.insert(r.name, r.constructor).is_none()); // no duplicate names
    }
    let f = registered.get(opt.name.as_str()).ok_or_else(|| {
        Error::Config(format!("engine {} not found in registry", opt.name))
    })?;
    f(&opt.opt)
}

/// Names of all registered engines, sorted.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = inventory::iter::<Registry>.into_iter().map(|r| r.name).collect();
    names.sort_unstable();
    names
}

pub mod memory;
pub mod null;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;

#[cfg(test)]
mod tests {
    use super::*;

    fn session_test(engine: &dyn Engine) {
        let session = engine.open().unwrap();
        let mut buf = vec![0u8; 3];

        // insert + get
        session.put(b"foo", b"bar").unwrap();
        assert!(session.get_into(b"foo", &mut buf).unwrap());
        assert_eq!(&buf, b"bar");
        assert!(!session.get_into(b"f00", &mut buf).unwrap());

        // update
        session.put(b"foo", b"0ar").unwrap();
        assert!(session.get_into(b"foo", &mut buf).unwrap());
        assert_eq!(&buf, b"0ar");

        session.close().unwrap();
    }

    #[test]
    fn memory() {
        let engine = memory::MemoryEngine::new(&memory::MemoryEngineOpt { shards: Some(8) });
        session_test(&engine);
    }

    #[test]
    fn btreemap() {
        let engine = memory::BTreeMapEngine::new();
        session_test(&engine);
    }

    #[test]
    fn null_reports_hits_without_bytes() {
        let engine = null::NullEngine::new();
        let session = engine.open().unwrap();
        session.put(b"foo", b"bar").unwrap();
        let mut buf = vec![7u8; 3];
        assert!(session.get_into(b"foo", &mut buf).unwrap());
        assert_eq!(&buf, &[7, 7, 7]); // untouched
        session.close().unwrap();
    }

    #[test]
    fn create_by_name() {
        let opt = EngineOpt {
            name: "memory".to_string(),
            opt: Table::new(),
        };
        assert!(create(&opt).is_ok());
    }

    #[test]
    fn create_unknown_name() {
        let opt = EngineOpt {
            name: "no-such-engine".to_string(),
            opt: Table::new(),
        };
        let err = create(&opt).err().unwrap();
        assert!(err.to_string().contains("not found in registry"));
    }

    #[test]
    fn names_contains_builtins() {
        let names = names();
        assert!(names.contains(&"memory"));
        assert!(names.contains(&"btreemap"));
        assert!(names.contains(&"null"));
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn rocksdb() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let engine = rocksdb::RocksDbEngine::new(&rocksdb::RocksDbOpt {
            path: tmp_dir.path().to_str().unwrap().to_string(),
        });
        session_test(&engine);
    }
}
