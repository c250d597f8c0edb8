//! Measure the latency of `madvise(MADV_WILLNEED)` over memory regions of growing size.
//!
//! The pipeline is: build a [`RegionSet`] once, [`measure`] it lazily region by region, and
//! stream each [`Measurement`] to a [`Report`]. Everything else is a wrapper around libc.

use std::io;

pub mod config;
pub mod error;
pub mod measure;
pub mod region;
pub mod report;
pub mod tsc;

pub use config::Config;
pub use error::{Error, Result};
pub use measure::{measure, measure_with, Advisor, Latency, Measurement, Measurements, WillNeed};
pub use region::{build_regions, Region, RegionSet, SizeSpec, REFERENCE_SIZES};
pub use report::Report;
pub use tsc::{rdtsc, rdtsc_fenced, TimestampMode};

/// The size of a page, as reported by `sysconf`.
pub fn page_size() -> Result<usize> {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if sz <= 0 {
        let err = errno::errno();
        return Err(Error::PageSize(io::Error::from_raw_os_error(err.0)));
    }

    Ok(sz as usize)
}

/// Pin the calling thread to the given logical core.
pub fn set_cpu(core: usize) -> Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(Error::Affinity {
            core,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        });
    }

    unsafe {
        let mut cpuset = std::mem::zeroed::<libc::cpu_set_t>();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core, &mut cpuset);

        let res = libc::sched_setaffinity(
            /* self */ 0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );

        if res != 0 {
            let err = errno::errno();
            return Err(Error::Affinity {
                core,
                source: io::Error::from_raw_os_error(err.0),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let sz = page_size().unwrap();
        assert!(sz.is_power_of_two());
        assert!(sz >= 4096);
    }

    #[test]
    fn pin_to_current_cpu() {
        let core = unsafe { libc::sched_getcpu() };
        assert!(core >= 0);
        set_cpu(core as usize).unwrap();
    }

    #[test]
    fn pin_to_missing_cpu() {
        let res = set_cpu(libc::CPU_SETSIZE as usize + 1);
        assert!(matches!(res, Err(Error::Affinity { .. })));
    }
}
