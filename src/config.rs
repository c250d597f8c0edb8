//! Run parameters, fixed once parsed.

use crate::error::{Error, Result};
use crate::region::SizeSpec;
use crate::tsc::TimestampMode;

pub const DEFAULT_ITERATIONS: u32 = 1000;
pub const DEFAULT_MIN_SIZE: usize = 1024;
pub const DEFAULT_MAX_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Calls per region. Always at least 1.
    pub iterations: u32,

    pub sizes: SizeSpec,

    pub timestamp: TimestampMode,

    /// Core to pin the measuring thread to, if any.
    pub cpu: Option<usize>,

    /// Fault in region pages before measuring.
    pub populate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            iterations: DEFAULT_ITERATIONS,
            sizes: SizeSpec::Geometric {
                min: DEFAULT_MIN_SIZE,
                max: DEFAULT_MAX_SIZE,
            },
            timestamp: TimestampMode::default(),
            cpu: None,
            populate: false,
        }
    }
}

impl Config {
    /// Check everything that can be checked without touching the system. `min > max` is
    /// allowed and means there is nothing to measure.
    pub fn validate(self) -> Result<Self> {
        if self.iterations == 0 {
            return Err(Error::Config("number of iterations must be at least 1".into()));
        }
        self.sizes.sizes()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default().validate().unwrap();
        assert_eq!(cfg.iterations, 1000);
        assert_eq!(cfg.sizes.sizes().unwrap(), vec![1024, 2048, 4096]);
    }

    #[test]
    fn zero_iterations() {
        let cfg = Config {
            iterations: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn inverted_bounds_are_allowed() {
        let cfg = Config {
            sizes: SizeSpec::Geometric { min: 4096, max: 1024 },
            ..Config::default()
        };
        assert!(cfg.validate().unwrap().sizes.sizes().unwrap().is_empty());
    }

    #[test]
    fn zero_min_size() {
        let cfg = Config {
            sizes: SizeSpec::Geometric { min: 0, max: 1024 },
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
