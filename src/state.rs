//! Benchmark lifecycle: session ownership, scratch buffers, and the measured read/write passes.
//!
//! One [`BenchmarkState`] owns everything a trial needs: the open session, the shared key
//! sequence, the optional random pool, and scratch buffers sized exactly to the configured key
//! and value widths. The [`Role`] decides the open/close granularity; everything else is common.

use crate::error::{Error, Result};
use crate::executor::ParallelExecutor;
use crate::keys::KeyCodec;
use crate::workload::PayloadSource;
use crate::{Engine, EngineSession};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The lifecycle role of a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Opens once per trial and pre-populates the store with a full synchronous write pass before
    /// any measured read.
    Reader,

    /// Opens fresh per invocation so measured writes include cold-write cost.
    Writer,
}

/// Consumes retrieved values so an optimizing compiler cannot elide measured reads.
///
/// Every retrieved value is folded into an atomic checksum, which makes the memory read
/// observable. The sink also counts hits, misses and zero-prefixed values; the post-run
/// validation reads these counters.
#[derive(Default)]
pub struct ReadSink {
    checksum: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    zeroes: AtomicU64,
}

impl ReadSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&self, found: bool, value: &[u8]) {
        if !found {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        let mut word = [0u8; 8];
        let n = value.len().min(8);
        word[..n].copy_from_slice(&value[..n]);
        self.checksum.fetch_xor(u64::from_le_bytes(word), Ordering::Relaxed);
        if value[..value.len().min(4)].iter().all(|b| *b == 0) {
            self.zeroes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn checksum(&self) -> u64 {
        self.checksum.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn zeroes(&self) -> u64 {
        self.zeroes.load(Ordering::Relaxed)
    }
}

/// The state behind one benchmark trial.
pub struct BenchmarkState {
    role: Role,
    engine: Arc<dyn Engine>,
    session: Option<Arc<dyn EngineSession>>,
    keys: Arc<[usize]>,
    pool: Option<Arc<[u8]>>,
    codec: KeyCodec,
    vlen: usize,
    kbuf: Vec<u8>,
    vbuf: Vec<u8>,
    executor: ParallelExecutor,
    sink: Arc<ReadSink>,
    puts: Arc<AtomicU64>,
}

impl BenchmarkState {
    /// Validates the key/value configuration eagerly; a bad combination aborts here, before any
    /// session is opened.
    pub fn new(
        role: Role,
        engine: Arc<dyn Engine>,
        keys: Arc<[usize]>,
        pool: Option<Arc<[u8]>>,
        codec: KeyCodec,
        vlen: usize,
        executor: ParallelExecutor,
    ) -> Result<Self> {
        match &pool {
            Some(pool) => {
                PayloadSource::random(pool.clone(), vlen)?;
            }
            None => {
                PayloadSource::deterministic(vlen)?;
            }
        }
        Ok(Self {
            role,
            engine,
            session: None,
            keys,
            pool,
            codec,
            vlen,
            kbuf: Vec::new(),
            vbuf: Vec::new(),
            executor,
            sink: Arc::new(ReadSink::new()),
            puts: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sink(&self) -> &ReadSink {
        &self.sink
    }

    /// Keys written by all write passes so far, pre-population included.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Keys one pass touches: the full sequence sequentially, or the executor's batch coverage in
    /// parallel (the partition drops the trailing `len mod parallelism` keys).
    pub fn covered_keys(&self, parallel: bool) -> usize {
        if parallel {
            self.executor.covered(self.keys.len())
        } else {
            self.keys.len()
        }
    }

    /// Open the session and size the scratch buffers. A [`Role::Reader`] additionally runs a full
    /// write pass so every key is present before the first measured read.
    pub fn setup(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::Open("setup called on an open session".to_string()));
        }
        self.session = Some(Arc::from(self.engine.open()?));
        self.kbuf = vec![0u8; self.codec.width()];
        self.vbuf = vec![0u8; self.vlen];
        if self.role == Role::Reader {
            self.write()?;
        }
        Ok(())
    }

    /// Close the session. Runs at most once per setup; a second call is a no-op so teardown can
    /// sit on every exit path.
    pub fn teardown(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if let Some(bytes) = session.space_used() {
            info!("store size before close: {} bytes", bytes);
        }
        session.close()
    }

    /// Sequential write pass over the whole key sequence, in sequence order.
    pub fn write(&mut self) -> Result<()> {
        let session = self.session()?;
        let keys = self.keys.clone();
        let mut payload = self.payload_source()?;
        for &key in keys.iter() {
            self.codec.encode_into(key, &mut self.kbuf);
            payload.fill(key, &mut self.vbuf);
            session.put(&self.kbuf, &self.vbuf)?;
        }
        self.puts.fetch_add(keys.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Parallel write pass. Batches never overlap, so every covered key is written exactly once
    /// and, with deterministic payloads, the store ends up observably equivalent to a sequential
    /// [`write`](Self::write). Random payloads depend on the per-worker pool cursor, which starts
    /// at the pool head in every worker.
    pub fn par_write(&mut self) -> Result<()> {
        let session = self.session()?;
        let keys = self.keys.clone();
        let pool = self.pool.clone();
        let codec = self.codec;
        let vlen = self.vlen;
        let puts = self.puts.clone();
        self.executor.run(keys.len(), move |_, range| {
            let mut kbuf = vec![0u8; codec.width()];
            let mut vbuf = vec![0u8; vlen];
            let mut payload = match &pool {
                Some(pool) => PayloadSource::random(pool.clone(), vlen)?,
                None => PayloadSource::deterministic(vlen)?,
            };
            let batch = range.len() as u64;
            for i in range {
                let key = keys[i];
                codec.encode_into(key, &mut kbuf);
                payload.fill(key, &mut vbuf);
                session.put(&kbuf, &vbuf)?;
            }
            puts.fetch_add(batch, Ordering::Relaxed);
            Ok(())
        })
    }

    /// Sequential read pass. Every retrieved value goes through the sink.
    pub fn read(&mut self) -> Result<()> {
        let session = self.session()?;
        let keys = self.keys.clone();
        let sink = self.sink.clone();
        for &key in keys.iter() {
            self.codec.encode_into(key, &mut self.kbuf);
            let found = session.get_into(&self.kbuf, &mut self.vbuf)?;
            sink.consume(found, &self.vbuf);
        }
        Ok(())
    }

    /// Parallel read pass with per-worker scratch buffers.
    pub fn par_read(&mut self) -> Result<()> {
        let session = self.session()?;
        let keys = self.keys.clone();
        let codec = self.codec;
        let vlen = self.vlen;
        let sink = self.sink.clone();
        self.executor.run(keys.len(), move |_, range| {
            let mut kbuf = vec![0u8; codec.width()];
            let mut vbuf = vec![0u8; vlen];
            for i in range {
                codec.encode_into(keys[i], &mut kbuf);
                let found = session.get_into(&kbuf, &mut vbuf)?;
                sink.consume(found, &vbuf);
            }
            Ok(())
        })
    }

    fn session(&self) -> Result<Arc<dyn EngineSession>> {
        self.session
            .clone()
            .ok_or_else(|| Error::Open("session is not open".to_string()))
    }

    fn payload_source(&self) -> Result<PayloadSource> {
        match &self.pool {
            Some(pool) => PayloadSource::random(pool.clone(), self.vlen),
            None => PayloadSource::deterministic(self.vlen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::memory::{MemoryEngine, MemoryEngineOpt};
    use crate::workload::{self, KeyOrder};

    fn state(role: Role, nr_keys: usize, random_values: bool, parallelism: usize) -> BenchmarkState {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(&MemoryEngineOpt {
            shards: Some(16),
        }));
        let keys = workload::keys(nr_keys, KeyOrder::Sequential, 42);
        let pool = random_values.then(|| workload::pool(1 << 16, 42));
        let codec = KeyCodec::numeric(4, nr_keys).unwrap();
        BenchmarkState::new(
            role,
            engine,
            keys,
            pool,
            codec,
            16,
            ParallelExecutor::with_parallelism(parallelism),
        )
        .unwrap()
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut s = state(Role::Writer, 1000, false, 4);
        s.setup().unwrap();
        s.write().unwrap();
        s.read().unwrap();
        assert_eq!(s.puts(), 1000);
        assert_eq!(s.sink().hits(), 1000);
        assert_eq!(s.sink().misses(), 0);
        s.teardown().unwrap();
    }

    #[test]
    fn par_write_matches_sequential_write() {
        // deterministic payloads: the value is a function of the key alone, so the parallel pass
        // must land on the exact same key-value mapping as the sequential one
        let mut seq = state(Role::Writer, 1000, false, 4);
        seq.setup().unwrap();
        seq.write().unwrap();

        let mut par = state(Role::Writer, 1000, false, 4);
        par.setup().unwrap();
        par.par_write().unwrap();
        assert_eq!(par.puts(), 1000);

        // batches partition the whole sequence here (1000 % 4 == 0); every key, boundary keys
        // included, must carry the same bytes as the sequential pass
        let codec = KeyCodec::numeric(4, 1000).unwrap();
        let mut kbuf = vec![0u8; 4];
        let mut sv = vec![0u8; 16];
        let mut pv = vec![0u8; 16];
        let ssess = seq.session().unwrap();
        let psess = par.session().unwrap();
        for key in 0..1000 {
            codec.encode_into(key, &mut kbuf);
            assert!(ssess.get_into(&kbuf, &mut sv).unwrap());
            assert!(psess.get_into(&kbuf, &mut pv).unwrap(), "key {} missing", key);
            assert_eq!(sv, pv, "key {} differs", key);
        }
        seq.teardown().unwrap();
        par.teardown().unwrap();
    }

    #[test]
    fn par_write_skips_trailing_remainder() {
        let mut s = state(Role::Writer, 1003, false, 4);
        s.setup().unwrap();
        s.par_write().unwrap();
        assert_eq!(s.covered_keys(true), 1000);
        assert_eq!(s.puts(), 1000);

        let codec = KeyCodec::numeric(4, 1003).unwrap();
        let mut kbuf = vec![0u8; 4];
        let mut vbuf = vec![0u8; 16];
        let session = s.session().unwrap();
        for key in 1000..1003 {
            codec.encode_into(key, &mut kbuf);
            assert!(!session.get_into(&kbuf, &mut vbuf).unwrap(), "key {} written", key);
        }
        s.teardown().unwrap();
    }

    #[test]
    fn reader_setup_prepopulates() {
        let mut s = state(Role::Reader, 500, false, 2);
        s.setup().unwrap();
        assert_eq!(s.puts(), 500);
        s.read().unwrap();
        assert_eq!(s.sink().misses(), 0);
        s.teardown().unwrap();
    }

    #[test]
    fn par_read_sees_every_prepopulated_key() {
        let mut s = state(Role::Reader, 10000, true, 4);
        s.setup().unwrap();
        s.par_read().unwrap();
        assert_eq!(s.sink().hits(), 10000);
        assert_eq!(s.sink().misses(), 0);
        assert_eq!(s.sink().zeroes(), 0);
        assert_ne!(s.sink().checksum(), 0);
        s.teardown().unwrap();
    }

    #[test]
    fn teardown_runs_once() {
        let mut s = state(Role::Writer, 10, false, 1);
        s.setup().unwrap();
        s.teardown().unwrap();
        s.teardown().unwrap();
        assert!(s.write().is_err());
    }

    #[test]
    fn setup_twice_is_rejected() {
        let mut s = state(Role::Writer, 10, false, 1);
        s.setup().unwrap();
        assert!(s.setup().is_err());
        s.teardown().unwrap();
    }

    #[test]
    fn writer_reopen_starts_cold() {
        let mut s = state(Role::Writer, 100, false, 1);
        s.setup().unwrap();
        s.write().unwrap();
        s.teardown().unwrap();
        s.setup().unwrap();
        s.read().unwrap();
        // a fresh session means an empty store, so every key misses
        assert_eq!(s.sink().misses(), 100);
        s.teardown().unwrap();
    }

    #[test]
    fn operations_require_an_open_session() {
        let mut s = state(Role::Writer, 10, false, 1);
        assert!(s.write().is_err());
        assert!(s.read().is_err());
        assert!(s.par_write().is_err());
        assert!(s.par_read().is_err());
    }

    #[test]
    fn bad_value_size_rejected_before_open() {
        let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(&MemoryEngineOpt {
            shards: Some(4),
        }));
        let keys = workload::keys(10, KeyOrder::Sequential, 1);
        let codec = KeyCodec::numeric(4, 10).unwrap();
        // deterministic payloads need room for the 4-byte index
        let result = BenchmarkState::new(
            Role::Writer,
            engine.clone(),
            keys.clone(),
            None,
            codec,
            2,
            ParallelExecutor::with_parallelism(1),
        );
        assert!(result.is_err());
        // random payloads must fit inside the pool
        let pool = workload::pool(16, 1);
        let result = BenchmarkState::new(
            Role::Writer,
            engine,
            keys,
            Some(pool),
            codec,
            16,
            ParallelExecutor::with_parallelism(1),
        );
        assert!(result.is_err());
    }
}
