//! Errors that abort a run.
//!
//! A failing `madvise` is not one of them: it is reported per region (see
//! [`crate::measure::Latency::Unavailable`]).

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad iteration count or region bounds.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not map memory for a region.
    #[error("unable to allocate region of {size} bytes: {source}")]
    Allocation { size: usize, source: io::Error },

    #[error("unable to query the page size: {0}")]
    PageSize(io::Error),

    /// `sched_setaffinity` refused the requested core.
    #[error("unable to pin to cpu {core}: {source}")]
    Affinity { core: usize, source: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;
