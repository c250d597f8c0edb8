//! The set of memory regions to measure.
//!
//! Every region is backed by its own anonymous private mapping. A [`RegionSet`] owns all of the
//! mappings and unmaps them together when dropped, so regions themselves only carry addresses.

use std::io;
use std::ptr;

use libc::{
    mmap as libc_mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_POPULATE, MAP_PRIVATE, PROT_READ,
    PROT_WRITE,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::page_size;

/// The fixed size table older runs were reported against.
pub const REFERENCE_SIZES: [usize; 10] = [64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];

/// Which region sizes to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    /// `min, 2*min, 4*min, ...` up to and including `max`.
    Geometric { min: usize, max: usize },

    /// Exactly these sizes, in this order.
    Explicit(Vec<usize>),
}

impl SizeSpec {
    pub fn reference() -> Self {
        SizeSpec::Explicit(REFERENCE_SIZES.to_vec())
    }

    /// The sizes to map, in ascending order. An empty list is valid (nothing to
    /// measure); a zero size or an unordered list is not.
    pub fn sizes(&self) -> Result<Vec<usize>> {
        match self {
            SizeSpec::Geometric { min, max } => geometric_sizes(*min, *max),
            SizeSpec::Explicit(sizes) => {
                if sizes.iter().any(|&sz| sz == 0) {
                    return Err(Error::Config("region sizes must be non-zero".into()));
                }
                if sizes.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(Error::Config(format!(
                        "region sizes must be strictly increasing: {:?}",
                        sizes
                    )));
                }
                Ok(sizes.clone())
            }
        }
    }
}

fn geometric_sizes(min: usize, max: usize) -> Result<Vec<usize>> {
    if min == 0 {
        return Err(Error::Config("minimum region size must be non-zero".into()));
    }

    let mut sizes = Vec::new();
    let mut sz = Some(min);
    while let Some(s) = sz.filter(|&s| s <= max) {
        sizes.push(s);
        sz = s.checked_mul(2);
    }

    Ok(sizes)
}

/// Round `addr` down to a multiple of `page_size`, which must be a power of two.
#[inline]
pub fn align_down(addr: usize, page_size: usize) -> usize {
    addr - (addr % page_size)
}

/// One unit of measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start of the backing buffer.
    pub raw_address: usize,

    /// `raw_address` rounded down to a page boundary. This is what gets passed to `madvise`.
    pub aligned_address: usize,

    /// Number of bytes to advise about.
    pub size: usize,
}

/// An owned anonymous mapping, unmapped on drop.
struct Mapping {
    addr: *mut u8,
    len: usize,
}

impl Mapping {
    fn new(len: usize, populate: bool) -> io::Result<Self> {
        let mut flags = MAP_PRIVATE | MAP_ANONYMOUS;
        if populate {
            flags |= MAP_POPULATE;
        }

        let addr = unsafe { libc_mmap(ptr::null_mut(), len, PROT_READ | PROT_WRITE, flags, -1, 0) };

        if addr == MAP_FAILED {
            let err = errno::errno();
            return Err(io::Error::from_raw_os_error(err.0));
        }

        Ok(Mapping {
            addr: addr as *mut u8,
            len,
        })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            munmap(self.addr as *mut libc::c_void, self.len);
        }
    }
}

/// Regions in ascending size order together with the memory backing them.
pub struct RegionSet {
    page_size: usize,
    regions: Vec<Region>,
    buffers: Vec<Mapping>,
}

impl RegionSet {
    /// Map one buffer per size in `spec`. If any mapping fails, everything mapped so far is
    /// released and the error names the size that failed.
    pub fn build(spec: &SizeSpec, populate: bool) -> Result<Self> {
        let sizes = spec.sizes()?;
        let page_size = page_size()?;

        let mut set = RegionSet {
            page_size,
            regions: Vec::with_capacity(sizes.len()),
            buffers: Vec::with_capacity(sizes.len()),
        };

        for size in sizes {
            let buffer =
                Mapping::new(size, populate).map_err(|source| Error::Allocation { size, source })?;

            let raw_address = buffer.addr as usize;
            let aligned_address = align_down(raw_address, page_size);
            // mmap hands back whole pages, so aligning never leaves the buffer.
            debug_assert_eq!(aligned_address, raw_address);

            let region = Region {
                raw_address,
                aligned_address,
                size,
            };
            debug!(
                addr = format_args!("{:#x}", region.raw_address),
                aligned = format_args!("{:#x}", region.aligned_address),
                size = region.size,
                "mapped region"
            );

            set.buffers.push(buffer);
            set.regions.push(region);
        }

        Ok(set)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Length in bytes of the mapping backing the `index`-th region.
    pub fn buffer_len(&self, index: usize) -> Option<usize> {
        self.buffers.get(index).map(|b| b.len)
    }
}

impl<'a> IntoIterator for &'a RegionSet {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build the doubling set of regions from `min_size` to at most `max_size`.
///
/// If `min_size > max_size`, the set is empty.
pub fn build_regions(min_size: usize, max_size: usize) -> Result<RegionSet> {
    RegionSet::build(
        &SizeSpec::Geometric {
            min: min_size,
            max: max_size,
        },
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn sizes_of(set: &RegionSet) -> Vec<usize> {
        set.iter().map(|r| r.size).collect()
    }

    #[test]
    fn default_bounds() {
        let set = build_regions(1024, 4096).unwrap();
        assert_eq!(sizes_of(&set), vec![1024, 2048, 4096]);
    }

    #[test]
    fn reference_range() {
        let set = build_regions(64, 32768).unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(sizes_of(&set), REFERENCE_SIZES.to_vec());
    }

    #[test]
    fn reference_table_matches_range() {
        let set = RegionSet::build(&SizeSpec::reference(), false).unwrap();
        assert_eq!(sizes_of(&set), sizes_of(&build_regions(64, 32768).unwrap()));
    }

    #[test]
    fn min_above_max_is_empty() {
        let set = build_regions(4096, 1024).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn max_not_power_of_two_multiple() {
        let set = build_regions(1000, 5000).unwrap();
        assert_eq!(sizes_of(&set), vec![1000, 2000, 4000]);
    }

    #[test]
    fn zero_min_is_rejected() {
        assert!(matches!(build_regions(0, 4096), Err(Error::Config(_))));
    }

    #[test]
    fn doubling_stops_before_overflow() {
        let min = usize::MAX / 2 + 1;
        let sizes = SizeSpec::Geometric {
            min,
            max: usize::MAX,
        }
        .sizes()
        .unwrap();
        assert_eq!(sizes, vec![min]);
    }

    #[test]
    fn explicit_sizes_keep_their_order() {
        let set = RegionSet::build(&SizeSpec::Explicit(vec![100, 3000, 70000]), false).unwrap();
        assert_eq!(sizes_of(&set), vec![100, 3000, 70000]);
    }

    #[test]
    fn explicit_sizes_must_increase() {
        let spec = SizeSpec::Explicit(vec![4096, 1024]);
        assert!(matches!(RegionSet::build(&spec, false), Err(Error::Config(_))));

        let spec = SizeSpec::Explicit(vec![1024, 1024]);
        assert!(matches!(spec.sizes(), Err(Error::Config(_))));

        let spec = SizeSpec::Explicit(vec![0, 1024]);
        assert!(matches!(spec.sizes(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_explicit_list_is_empty_set() {
        let set = RegionSet::build(&SizeSpec::Explicit(vec![]), false).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn populated_regions() {
        let set = RegionSet::build(&SizeSpec::Geometric { min: 4096, max: 16384 }, true).unwrap();
        assert_eq!(sizes_of(&set), vec![4096, 8192, 16384]);
    }

    #[test]
    fn huge_allocation_fails_with_size() {
        let size = usize::MAX / 2;
        match RegionSet::build(&SizeSpec::Explicit(vec![4096, size]), false) {
            Err(Error::Allocation { size: failed, .. }) => assert_eq!(failed, size),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("mapping {} bytes should fail", size),
        }
    }

    #[test]
    fn align_down_rounds_to_page() {
        assert_eq!(align_down(0x1000, 0x1000), 0x1000);
        assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
        assert_eq!(align_down(0x2001, 0x1000), 0x2000);
        assert_eq!(align_down(0, 0x1000), 0);
    }

    #[test]
    fn buffers_cover_regions() {
        let set = build_regions(512, 8192).unwrap();
        for (i, r) in set.iter().enumerate() {
            assert_eq!(set.buffer_len(i), Some(r.size));
            assert_eq!(set.get(i), Some(r));
        }
        assert_eq!(set.buffer_len(set.len()), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn geometric_sizes_double(min in 1usize..=8192, shift in 0u32..8, slack in 0usize..1024) {
            let max = (min << shift) + slack.min(min - 1);
            let set = build_regions(min, max).unwrap();
            let sizes = sizes_of(&set);

            prop_assert_eq!(sizes.len(), shift as usize + 1);
            for (i, &sz) in sizes.iter().enumerate() {
                prop_assert_eq!(sz, min << i);
                prop_assert!(sz <= max);
            }
            prop_assert!(sizes.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn aligned_addresses_stay_in_first_page(min in 1usize..=16384, shift in 0u32..5) {
            let set = build_regions(min, min << shift).unwrap();
            let page = set.page_size();

            for r in &set {
                prop_assert_eq!(r.aligned_address % page, 0);
                prop_assert!(r.aligned_address <= r.raw_address);
                prop_assert!(r.aligned_address >= r.raw_address);
                prop_assert!(r.aligned_address < r.raw_address + page);
            }
        }
    }
}
