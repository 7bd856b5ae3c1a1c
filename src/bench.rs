//! The core benchmark driver.
//!
//! A benchmark in this crate refers to a group of **trials** that run sequentially, each with its
//! own configuration. A trial generates its workload once (key sequence and, in random-payload
//! mode, the value pool), then runs `repeat` measured invocations of one operation against the
//! engine, and finally validates the outcome.
//!
//! ## Configuration Format
//!
//! A benchmark configuration file is formatted in TOML. It consists of the definition of
//! multiple trials, each defined in a dictionary named `benchmark` and organized in an array, so
//! the configuration of each trial starts with `[[benchmark]]`. A `[global]` section can fill in
//! fields missing from individual trials, which reduces repeated options. Options in `[global]`
//! can also be overridden via environment variables without changing the TOML file.
//!
//! ```toml
//! [global]
//! nr_keys = 1000000
//! value_size = 100
//!
//! [[benchmark]]
//! op = "par_write"
//!
//! [[benchmark]]
//! op = "par_read"
//! value_random = true
//! ```
//!
//! Available options and their usage can be found in [`BenchmarkOpt`] and [`GlobalOpt`].
//!
//! ## Trial granularity
//!
//! Write trials (`write`, `par_write`) reopen the engine session around every invocation, so the
//! measured time includes cold-write cost. Read trials (`read`, `par_read`) open once, perform a
//! full pre-population write pass, and then run all measured invocations against the warm store.
//!
//! ## Output Format
//!
//! All output is plain text, one line per invocation plus one aggregated `finish` line:
//!
//! ```txt
//! trial 0 invocation 0 duration 1.00 elapsed 1.00 total 1000000 mops 1.00
//! trial 0 finish . duration 2.00 elapsed 3.00 total 2000000 mops 1.00
//! ```
//!
//! - `duration`: seconds spent in the invocation (or the whole trial on the `finish` line).
//! - `elapsed`: seconds since the program started.
//! - `total`: keys touched by the invocation (or the whole trial).
//! - `mops`: million operations per second.
//!
//! With `latency = true`, the `finish` line additionally carries invocation-time percentiles:
//! `min_us`, `max_us`, `avg_us`, `p50_us`, `p95_us`, `p99_us`.

use crate::engines::{self, EngineOpt};
use crate::error::{Error, Result};
use crate::executor::ParallelExecutor;
use crate::keys::KeyCodec;
use crate::result::BenchResult;
use crate::state::{BenchmarkState, Role};
use crate::workload::{self, KeyOrder, DEFAULT_POOL_SIZE};
use crate::Engine;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use hdrhistogram::Histogram;
use log::debug;
use quanta::Instant;
use serde::Deserialize;
use std::sync::Arc;

// {{{ options

/// The measured operation of a trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpKind {
    Write,
    ParWrite,
    Read,
    ParRead,
}

impl OpKind {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "write" => Ok(Self::Write),
            "par_write" => Ok(Self::ParWrite),
            "read" => Ok(Self::Read),
            "par_read" => Ok(Self::ParRead),
            _ => Err(Error::Config(format!(
                "op should be one of: write, par_write, read, par_read, got {}",
                s
            ))),
        }
    }

    fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ParRead)
    }

    fn is_parallel(self) -> bool {
        matches!(self, Self::ParWrite | Self::ParRead)
    }
}

/// How the results are printed out.
/// "hidden": no results
/// "repeat": only each invocation's own metrics
/// "finish": only the finish metrics
/// "all": equals to repeat + finish
#[derive(Debug, PartialEq)]
enum ReportMode {
    Hidden,
    Repeat,
    Finish,
    All,
}

/// The configuration of a single trial deserialized from a TOML string.
///
/// The fields are optional to ease parsing from TOML, as there can be global parameters that are
/// set for them.
#[derive(Deserialize, Clone, Debug)]
pub struct BenchmarkOpt {
    /// The operation to measure: `write`, `par_write`, `read` or `par_read`.
    pub op: String,

    /// Number of keys in the key space. Must be given here or in `[global]`.
    pub nr_keys: Option<usize>,

    /// Key encoding: `numeric` (fixed-width little-endian integer) or `decimal` (fixed-width
    /// zero-padded decimal string).
    ///
    /// Default: `numeric`.
    pub key_format: Option<String>,

    /// Encoded key width in bytes. Numeric keys accept 4 or 8 (default 4); decimal keys default
    /// to the width of the largest key.
    pub key_size: Option<usize>,

    /// Value size in bytes. Must be given here or in `[global]`.
    pub value_size: Option<usize>,

    /// Whether values are slices of a shared pseudo-random pool instead of the deterministic
    /// 4-byte encoding of the key index.
    ///
    /// Default: false.
    pub value_random: Option<bool>,

    /// Whether the key sequence is a shuffled permutation instead of identity order.
    ///
    /// Default: false.
    pub shuffle: Option<bool>,

    /// Seed for the shuffle and the random pool. The same seed reproduces the same workload.
    ///
    /// Default: 42.
    pub seed: Option<u64>,

    /// How many measured invocations this trial runs.
    ///
    /// Default: 1.
    pub repeat: Option<usize>,

    /// Number of worker threads for parallel operations. Defaults to the hardware parallelism
    /// detected when the trial starts; fixed for the whole trial either way.
    pub threads: Option<usize>,

    /// Whether to print invocation-time percentiles on the finish line.
    ///
    /// Default: false.
    pub latency: Option<bool>,

    /// Report mode:
    ///
    /// - "hidden": not reported.
    /// - "repeat": after each invocation, the metrics for that invocation are printed.
    /// - "finish": after all invocations, the metrics of the whole trial are printed.
    /// - "all": equals to "repeat" + "finish".
    ///
    /// Default: "all".
    pub report: Option<String>,
}

/// The global options that go to the `[global]` section.
///
/// They fill in missing fields in each `[[benchmark]]` section. For the usage of each option,
/// please refer to [`BenchmarkOpt`].
#[derive(Deserialize, Clone, Debug, Default)]
pub struct GlobalOpt {
    pub nr_keys: Option<usize>,
    pub key_format: Option<String>,
    pub key_size: Option<usize>,
    pub value_size: Option<usize>,
    pub value_random: Option<bool>,
    pub shuffle: Option<bool>,
    pub seed: Option<u64>,
    pub repeat: Option<usize>,
    pub threads: Option<usize>,
    pub latency: Option<bool>,
    pub report: Option<String>,
}

impl GlobalOpt {
    fn apply(&self, opt: &mut BenchmarkOpt) {
        opt.nr_keys = opt.nr_keys.or(self.nr_keys);
        opt.key_format = opt.key_format.clone().or_else(|| self.key_format.clone());
        opt.key_size = opt.key_size.or(self.key_size);
        opt.value_size = opt.value_size.or(self.value_size);
        opt.value_random = opt.value_random.or(self.value_random);
        opt.shuffle = opt.shuffle.or(self.shuffle);
        opt.seed = opt.seed.or(self.seed);
        opt.repeat = opt.repeat.or(self.repeat);
        opt.threads = opt.threads.or(self.threads);
        opt.latency = opt.latency.or(self.latency);
        opt.report = opt.report.clone().or_else(|| self.report.clone());
    }
}

/// A fully resolved trial, parsed and validated from user input.
#[derive(Debug, PartialEq)]
pub struct Trial {
    op: OpKind,
    nr_keys: usize,
    codec: KeyCodec,
    vlen: usize,
    value_random: bool,
    order: KeyOrder,
    seed: u64,
    repeat: usize,
    threads: Option<usize>,
    latency: bool,
    report: ReportMode,
}

impl Trial {
    fn new(opt: &BenchmarkOpt) -> Result<Self> {
        let op = OpKind::parse(&opt.op)?;
        let nr_keys = opt
            .nr_keys
            .ok_or_else(|| Error::Config("nr_keys should be given".to_string()))?;
        let vlen = opt
            .value_size
            .ok_or_else(|| Error::Config("value_size should be given".to_string()))?;
        let value_random = opt.value_random.unwrap_or(false);
        let codec = match opt.key_format.as_deref().unwrap_or("numeric") {
            "numeric" => KeyCodec::numeric(opt.key_size.unwrap_or(4), nr_keys)?,
            "decimal" => KeyCodec::decimal(opt.key_size, nr_keys)?,
            other => {
                return Err(Error::Config(format!(
                    "key_format should be numeric or decimal, got {}",
                    other
                )));
            }
        };
        let order = if opt.shuffle.unwrap_or(false) {
            KeyOrder::Shuffled
        } else {
            KeyOrder::Sequential
        };
        let repeat = opt.repeat.unwrap_or(1);
        if repeat == 0 {
            return Err(Error::Config("repeat should be positive".to_string()));
        }
        if opt.threads == Some(0) {
            return Err(Error::Config("threads should be positive".to_string()));
        }
        let report = match opt.report.as_deref().unwrap_or("all") {
            "hidden" => ReportMode::Hidden,
            "repeat" => ReportMode::Repeat,
            "finish" => ReportMode::Finish,
            "all" => ReportMode::All,
            _ => {
                return Err(Error::Config(
                    "report mode should be one of: hidden, repeat, finish, all".to_string(),
                ));
            }
        };
        Ok(Self {
            op,
            nr_keys,
            codec,
            vlen,
            value_random,
            order,
            seed: opt.seed.unwrap_or(42),
            repeat,
            threads: opt.threads,
            latency: opt.latency.unwrap_or(false),
            report,
        })
    }
}

// }}} options

// {{{ driver

/// Parse a full configuration text (engine + trials) into a ready-to-run pair.
pub fn init(text: &str) -> Result<(Box<dyn Engine>, Vec<Arc<Trial>>)> {
    #[derive(Deserialize)]
    struct BenchmarkGroupOpt {
        global: Option<GlobalOpt>,
        engine: EngineOpt,
        benchmark: Vec<BenchmarkOpt>,
    }

    let opt: BenchmarkGroupOpt = Figment::new()
        .merge(Toml::string(text))
        .merge(Env::raw())
        .extract()?;
    debug!("Benchmark group configuration: {:?}", opt.benchmark);
    let global = opt.global.unwrap_or_default();
    let mut bopts = opt.benchmark;
    for bopt in bopts.iter_mut() {
        global.apply(bopt);
    }
    debug!("Global options applied to trials: {:?}", bopts);
    let engine = engines::create(&opt.engine)?;
    let trials = bopts
        .iter()
        .map(Trial::new)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .map(Arc::new)
        .collect();
    Ok((engine, trials))
}

/// Run all trials in order against the engine.
pub fn run(engine: Box<dyn Engine>, trials: &[Arc<Trial>]) -> Result<()> {
    let engine: Arc<dyn Engine> = Arc::from(engine);
    let since = Instant::now();
    for (t, trial) in trials.iter().enumerate() {
        run_trial(engine.clone(), trial, t, since)?;
    }
    Ok(())
}

fn run_trial(engine: Arc<dyn Engine>, trial: &Trial, t: usize, since: Instant) -> Result<()> {
    let keys = workload::keys(trial.nr_keys, trial.order, trial.seed);
    let pool = trial
        .value_random
        .then(|| workload::pool(DEFAULT_POOL_SIZE, trial.seed));
    let executor = match trial.threads {
        Some(p) => ParallelExecutor::with_parallelism(p),
        None => ParallelExecutor::new(),
    };
    let role = if trial.op.is_read() {
        Role::Reader
    } else {
        Role::Writer
    };
    let mut state = BenchmarkState::new(
        role,
        engine,
        keys,
        pool,
        trial.codec,
        trial.vlen,
        executor,
    )?;

    let per_invocation = state.covered_keys(trial.op.is_parallel()) as u64;
    let mut hdr = Histogram::<u64>::new(3).unwrap();
    let mut total = 0u64;

    if role == Role::Reader {
        state.setup()?;
    }
    let start = Instant::now();
    for i in 0..trial.repeat {
        if role == Role::Writer {
            state.setup()?;
        }
        let inv_start = Instant::now();
        match trial.op {
            OpKind::Write => state.write()?,
            OpKind::ParWrite => state.par_write()?,
            OpKind::Read => state.read()?,
            OpKind::ParRead => state.par_read()?,
        }
        let inv_end = Instant::now();
        if role == Role::Writer {
            state.teardown()?;
        }
        let duration = inv_end.duration_since(inv_start);
        assert!(hdr.record(duration.as_micros() as u64).is_ok());
        total += per_invocation;
        if trial.report == ReportMode::Repeat || trial.report == ReportMode::All {
            println!(
                "trial {} invocation {} duration {:.2} elapsed {:.2} total {} mops {:.2}",
                t,
                i,
                duration.as_secs_f64(),
                inv_end.duration_since(since).as_secs_f64(),
                per_invocation,
                per_invocation as f64 / duration.as_secs_f64() / 1_000_000.0,
            );
        }
    }
    let end = Instant::now();
    if role == Role::Reader {
        state.teardown()?;
    }

    if trial.report == ReportMode::Finish || trial.report == ReportMode::All {
        let duration = end.duration_since(start).as_secs_f64();
        print!(
            "trial {} finish . duration {:.2} elapsed {:.2} total {} mops {:.2}",
            t,
            duration,
            end.duration_since(since).as_secs_f64(),
            total,
            total as f64 / duration / 1_000_000.0,
        );
        if trial.latency {
            print!(
                " min_us {:.2} max_us {:.2} avg_us {:.2} p50_us {:.2} p95_us {:.2} p99_us {:.2}",
                hdr.min() as f64,
                hdr.max() as f64,
                hdr.mean(),
                hdr.value_at_quantile(0.50) as f64,
                hdr.value_at_quantile(0.95) as f64,
                hdr.value_at_quantile(0.99) as f64,
            );
        }
        println!();
    }

    validator(trial, &state, total).validate()?;
    Ok(())
}

/// The post-run checks of one trial. Writes are validated against the operation counters; reads
/// additionally against the sink.
fn validator(trial: &Trial, state: &BenchmarkState, total: u64) -> BenchResult {
    let mut checks = Vec::new();
    if trial.op.is_read() {
        // pre-population wrote the full sequence exactly once
        checks.push(BenchResult::int(
            "keys pre-populated",
            trial.nr_keys as i64,
            state.puts() as i64,
        ));
        let sink = state.sink();
        checks.push(BenchResult::int(
            "keys retrieved",
            total as i64,
            (sink.hits() + sink.misses()) as i64,
        ));
        checks.push(BenchResult::int("missing keys", 0, sink.misses() as i64));
        if trial.value_random {
            checks.push(BenchResult::int(
                "zero-prefixed values",
                0,
                sink.zeroes() as i64,
            ));
        }
    } else {
        checks.push(BenchResult::int(
            "keys written",
            total as i64,
            state.puts() as i64,
        ));
    }
    BenchResult::compound(checks)
}

// }}} driver

// {{{ tests


// }}} tests
