//! Reading the time-stamp counter.
//!
//! NOTE: [`rdtsc`] does not serialize the instruction stream. The CPU may start the read before
//! earlier instructions retire or let later ones begin before it, so a little adjacent work can
//! leak into (or out of) a measured window. This matches how historical numbers were collected.
//! Use [`rdtsc_fenced`] when accuracy matters more than comparability.

use std::sync::atomic::{compiler_fence, Ordering};

/// Read the time-stamp counter with no serializing instruction around it.
///
/// The compiler fences only stop the compiler from moving memory operations across the read;
/// they emit no instructions.
#[inline(always)]
pub fn rdtsc() -> u64 {
    compiler_fence(Ordering::SeqCst);
    let ts = read_counter();
    compiler_fence(Ordering::SeqCst);
    ts
}

/// Read the time-stamp counter between two `lfence`s, so that the read happens after all
/// earlier instructions complete and before later ones start.
#[inline(always)]
pub fn rdtsc_fenced() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
        let ts = core::arch::x86_64::_rdtsc();
        core::arch::x86_64::_mm_lfence();
        ts
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        rdtsc()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn read_counter() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Elsewhere there is no cycle counter we can read from user space portably. Report elapsed
/// nanoseconds since first use instead so the harness still builds; these are not cycles.
#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn read_counter() -> u64 {
    use std::time::Instant;

    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Cycles between two reads. Wraps rather than underflowing if the counter appears to go
/// backwards (e.g. after migrating to a core whose counter is behind).
#[inline(always)]
pub fn elapsed(start: u64, end: u64) -> u64 {
    end.wrapping_sub(start)
}

/// How timestamps around the measured call are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// Plain `rdtsc`.
    Unfenced,
    /// `lfence; rdtsc; lfence`.
    Fenced,
}

impl Default for TimestampMode {
    fn default() -> Self {
        TimestampMode::Unfenced
    }
}

impl TimestampMode {
    #[inline(always)]
    pub fn read(self) -> u64 {
        match self {
            TimestampMode::Unfenced => rdtsc(),
            TimestampMode::Fenced => rdtsc_fenced(),
        }
    }
}
