#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! A micro-benchmark harness for key-value storage engines.
//!
//! `kvshootout` generates a reproducible workload (a key sequence plus, optionally, a pool of
//! pseudo-random value bytes), drives an engine under test through sequential and parallel
//! read/write passes, and validates the outcome after each run. The details of a benchmark are
//! defined in the TOML format: the operation to measure, the key count and encoding, the value
//! size and payload mode, and the trial granularity, just to name a few.
//!
//! You can also run the harness against your own key-value store. All you need is implementing
//! the [`Engine`] and [`EngineSession`] traits for it. After registering the engine, simply reuse
//! the exported [`cmdline()`] in your `main` function and it will work seamlessly with your own
//! store.
//!
//! A few key design choices include:
//!
//! - Keys are integer indices encoded to fixed-width byte strings; values are fixed-size byte
//! slices. The encoding width is chosen once per trial and never changes mid-run.
//! - The engine under test is a black box behind a narrow put/get contract. Engines are created
//! dynamically from a TOML file and dynamically dispatched.
//! - Parallel passes fan a fixed key sequence out across hardware threads in contiguous,
//! non-overlapping batches, so no two workers ever touch the same key concurrently.
//! - Every run ends with a composable pass/fail validation that fails loudly, never silently.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the config format of a benchmark.
//! - [`mod@engines`] for the config format of a built-in engine.
//! - [`cmdline()`] for the usage of the default command line interface.

/// A factory for sessions against one storage engine.
///
/// Opening is separated from the session so that a trial can decide its open/close granularity:
/// write benchmarks reopen per invocation to include cold-write cost, read benchmarks open once
/// per trial and pre-populate before measuring.
pub trait Engine: Send + Sync + 'static {
    /// Open a fresh session against the store.
    fn open(&self) -> Result<Box<dyn EngineSession>>;
}

/// An open handle to a storage engine.
///
/// A session is shared by reference across worker threads during a parallel pass, so the
/// implementation is assumed to support concurrent `put`/`get_into` calls. If the underlying
/// store needs external synchronization, that responsibility belongs to the adapter.
pub trait EngineSession: Send + Sync {
    /// Add a new key-value pair or blindly update an existing key's value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Retrieve the value of a key into `dest`, returning whether the key exists.
    ///
    /// At most `dest.len()` bytes are copied. The destination buffer is caller-owned scratch
    /// space, reused across operations to avoid per-operation allocation.
    fn get_into(&self, key: &[u8], dest: &mut [u8]) -> Result<bool>;

    /// Close the session. Called exactly once, during teardown.
    fn close(&self) -> Result<()>;

    /// Space consumed by the store, if the engine can report it. Logged before close.
    fn space_used(&self) -> Option<u64> {
        None
    }
}

pub mod bench;
mod cmdline;
pub mod engines;
pub mod error;
pub mod executor;
pub mod keys;
pub mod result;
pub mod state;
pub mod workload;

pub use cmdline::cmdline;
pub use error::{Error, Result, ValidationError};

pub extern crate inventory;
pub extern crate toml;
