//! The timing loop.
//!
//! NOTE: all measurements are done with `rdtsc`, which reports cycle counts.

use std::io;

use libc::{c_void, madvise, MADV_WILLNEED};
use tracing::warn;

use crate::error::{Error, Result};
use crate::region::{Region, RegionSet};
use crate::tsc::{elapsed, TimestampMode};

/// The system call being timed. Implementations should do nothing but make the call.
pub trait Advisor {
    fn advise(&mut self, addr: usize, len: usize) -> io::Result<()>;
}

/// `madvise(addr, len, MADV_WILLNEED)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WillNeed;

impl Advisor for WillNeed {
    #[inline(always)]
    fn advise(&mut self, addr: usize, len: usize) -> io::Result<()> {
        let res = unsafe { madvise(addr as *mut c_void, len, MADV_WILLNEED) };

        if res != 0 {
            let err = errno::errno();
            return Err(io::Error::from_raw_os_error(err.0));
        }

        Ok(())
    }
}

/// Result for one region.
#[derive(Debug)]
pub enum Latency {
    /// Mean cycles per call, truncated.
    Cycles(u64),

    /// The call failed outright, so there is no meaningful number.
    Unavailable(io::Error),
}

impl Latency {
    pub fn cycles(&self) -> Option<u64> {
        match self {
            Latency::Cycles(c) => Some(*c),
            Latency::Unavailable(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Measurement {
    pub size: usize,
    pub latency: Latency,
}

/// Lazily measures each region of a [`RegionSet`] in order. A region is measured when the
/// iterator reaches it; nothing is measured ahead of time.
pub struct Measurements<'a, A> {
    regions: std::slice::Iter<'a, Region>,
    iterations: u32,
    mode: TimestampMode,
    advisor: A,
}

/// Time `madvise(MADV_WILLNEED)` over every region, `iterations` times each.
pub fn measure(regions: &RegionSet, iterations: u32) -> Result<Measurements<'_, WillNeed>> {
    measure_with(regions, iterations, TimestampMode::default(), WillNeed)
}

/// Like [`measure`], but with a choice of timestamp read and of the call being timed.
pub fn measure_with<A: Advisor>(
    regions: &RegionSet,
    iterations: u32,
    mode: TimestampMode,
    advisor: A,
) -> Result<Measurements<'_, A>> {
    if iterations == 0 {
        return Err(Error::Config("number of iterations must be at least 1".into()));
    }

    Ok(Measurements {
        regions: regions.iter(),
        iterations,
        mode,
        advisor,
    })
}

impl<'a, A: Advisor> Measurements<'a, A> {
    fn measure_one(&mut self, region: &Region) -> Latency {
        let mut sum: u64 = 0;

        for _ in 0..self.iterations {
            let start = self.mode.read();
            let res = self.advisor.advise(region.aligned_address, region.size);
            let end = self.mode.read();

            // A failed call is not retried: anything after it would not be measuring the same
            // thing anymore.
            if let Err(err) = res {
                warn!(size = region.size, error = %err, "madvise failed");
                return Latency::Unavailable(err);
            }

            sum = sum.wrapping_add(elapsed(start, end));
        }

        Latency::Cycles(sum / u64::from(self.iterations))
    }
}

impl<'a, A: Advisor> Iterator for Measurements<'a, A> {
    type Item = Measurement;

    fn next(&mut self) -> Option<Measurement> {
        let region = self.regions.next()?;
        let latency = self.measure_one(region);

        Some(Measurement {
            size: region.size,
            latency,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.regions.size_hint()
    }
}

impl<'a, A: Advisor> ExactSizeIterator for Measurements<'a, A> {}
