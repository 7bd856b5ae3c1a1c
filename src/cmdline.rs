use crate::engines;
use crate::error::{Error, Result};
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use log::debug;
use std::fs::read_to_string;

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(short = 's')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the engine's TOML config file")]
    engine_config: String,

    #[arg(short = 'b')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    benchmark_config: String,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark")]
    Bench(BenchArgs),
    #[command(about = "List all registered engines")]
    List,
}

fn read_config(path: &str) -> Result<String> {
    read_to_string(path).map_err(|e| Error::Config(format!("cannot read {}: {}", path, e)))
}

fn bench_cli(args: &BenchArgs) -> Result<()> {
    let opt =
        read_config(&args.engine_config)? + "\n" + read_config(&args.benchmark_config)?.as_str();
    let (engine, trials) = crate::bench::init(&opt)?;
    crate::bench::run(engine, &trials)
}

/// The default command-line interface.
///
/// This function is public and can be called in a `main` function of a crate that benchmarks its
/// own engine, once the engine is registered:
///
/// ```ignore
/// fn main() -> kvshootout::Result<()> {
///     kvshootout::cmdline()
/// }
/// ```
pub fn cmdline() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting with command {:?}", cli);
    match cli.command {
        Commands::Bench(args) => bench_cli(&args),
        Commands::List => {
            for name in engines::names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}
