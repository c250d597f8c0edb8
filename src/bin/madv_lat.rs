//! Measure `madvise(MADV_WILLNEED)` latency for memory regions of various sizes. Region sizes
//! double from the minimum up to the maximum; each is advised `nr_iters` times and the mean is
//! printed.
//!
//! NOTE: all measurements are done with `rdtsc`, which reports cycle counts.

use std::io;

use anyhow::{Context, Result};
use clap::{clap_app, ArgMatches};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use madvlat::{
    config::{DEFAULT_ITERATIONS, DEFAULT_MAX_SIZE, DEFAULT_MIN_SIZE},
    measure_with, set_cpu, Config, RegionSet, Report, SizeSpec, TimestampMode, WillNeed,
};

fn is_int(arg: String) -> Result<(), String> {
    arg.to_string()
        .parse::<usize>()
        .map_err(|_| "Not a valid usize".to_owned())
        .map(|_| ())
}

fn is_size_list(arg: String) -> Result<(), String> {
    parse_size_list(&arg)
        .map_err(|_| "Not a comma-separated list of sizes".to_owned())
        .map(|_| ())
}

fn parse_size_list(arg: &str) -> Result<Vec<usize>, std::num::ParseIntError> {
    arg.split(',').map(|s| s.trim().parse::<usize>()).collect()
}

fn parse_usize(matches: &ArgMatches, name: &str, default: usize) -> Result<usize> {
    match matches.value_of(name) {
        Some(v) => v.parse().with_context(|| format!("invalid value for {}: {}", name, v)),
        None => Ok(default),
    }
}

fn config_from(matches: &ArgMatches) -> Result<Config> {
    let iterations = match matches.value_of("NR_ITERS") {
        Some(v) => v
            .parse::<u32>()
            .with_context(|| format!("invalid number of iterations: {}", v))?,
        None => DEFAULT_ITERATIONS,
    };

    let sizes = if matches.is_present("REFERENCE") {
        SizeSpec::reference()
    } else if let Some(list) = matches.value_of("SIZES") {
        SizeSpec::Explicit(
            parse_size_list(list).with_context(|| format!("invalid size list: {}", list))?,
        )
    } else {
        SizeSpec::Geometric {
            min: parse_usize(matches, "SZ_MIN_REGION", DEFAULT_MIN_SIZE)?,
            max: parse_usize(matches, "SZ_MAX_REGION", DEFAULT_MAX_SIZE)?,
        }
    };

    let timestamp = if matches.is_present("FENCED") {
        TimestampMode::Fenced
    } else {
        TimestampMode::Unfenced
    };

    let cpu = match matches.value_of("CPU") {
        Some(v) => Some(v.parse().with_context(|| format!("invalid cpu: {}", v))?),
        None => None,
    };

    Ok(Config {
        iterations,
        sizes,
        timestamp,
        cpu,
        populate: matches.is_present("POPULATE"),
    }
    .validate()?)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let matches = clap_app! { madv_lat =>
        (about: "Measure madvise() latency for various size memory regions")
        (@arg NR_ITERS: --nr_iters +takes_value {is_int} "number of iterations for measurement (default 1000)")
        (@arg SZ_MIN_REGION: --sz_min_region +takes_value {is_int} "size of minimal region to measure (default 1024)")
        (@arg SZ_MAX_REGION: --sz_max_region +takes_value {is_int} "size of maximum region to measure (default 4096)")
        (@group TABLE =>
            (@arg SIZES: --sizes +takes_value {is_size_list} "measure exactly these comma-separated sizes")
            (@arg REFERENCE: --reference "measure the reference size table (64 to 32768 bytes)")
        )
        (@arg FENCED: --fenced "serialize around each timestamp with lfence")
        (@arg CPU: --cpu +takes_value {is_int} "pin to this core while measuring")
        (@arg POPULATE: --populate "fault in region pages before measuring")
        (@arg VERBOSE: -v --verbose "log each region and the run parameters to stderr")
    }
    .get_matches();

    init_logging(matches.is_present("VERBOSE"));

    let config = config_from(&matches)?;
    info!(?config, "starting");

    if let Some(core) = config.cpu {
        set_cpu(core)?;
    }

    ///////////////////////////////////////////////////////////////////////////
    // Start the experiment
    ///////////////////////////////////////////////////////////////////////////

    let regions = RegionSet::build(&config.sizes, config.populate)?;
    if regions.is_empty() {
        warn!("no regions to measure");
    }

    let stdout = io::stdout();
    let mut report = Report::new(stdout.lock());
    report.header()?;

    for m in measure_with(&regions, config.iterations, config.timestamp, WillNeed)? {
        report.record(&m)?;
    }

    drop(regions);

    Ok(())
}
