//! Allocator configuration: the four integers read at construction.

use serde::{Deserialize, Serialize};

use crate::error::AllocError;

/// Immutable configuration for an [`crate::Allocator`].
///
/// All four fields are powers of two; see [`Config::validate`] for the
/// full set of ordering constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Smallest allocation unit in bytes.
    pub min_alloc_bytes: usize,
    /// Largest allocation unit in bytes.
    pub max_alloc_bytes: usize,
    /// Per-arena region size in bytes.
    pub arena_size_bytes: usize,
    /// Budget ceiling in bytes; `max_arenas = max_total_bytes / arena_size_bytes`.
    pub max_total_bytes: usize,
}

impl Config {
    /// Validate the configuration, returning the derived `(min_log2, max_log2, max_arenas)`
    /// on success.
    pub fn validate(&self) -> Result<ValidatedConfig, AllocError> {
        let fields = [
            ("MinAllocBytes", self.min_alloc_bytes),
            ("MaxAllocBytes", self.max_alloc_bytes),
            ("ArenaSizeBytes", self.arena_size_bytes),
            ("MaxTotalBytes", self.max_total_bytes),
        ];
        for (name, value) in fields {
            if value == 0 || !value.is_power_of_two() {
                return Err(AllocError::InvalidConfig(format!(
                    "{name} must be a power of two, got {value}"
                )));
            }
        }

        if self.min_alloc_bytes < 8 {
            return Err(AllocError::InvalidConfig(format!(
                "MinAllocBytes must be at least 8, got {}",
                self.min_alloc_bytes
            )));
        }

        if self.max_alloc_bytes < self.min_alloc_bytes {
            return Err(AllocError::InvalidConfig(format!(
                "MaxAllocBytes ({}) must be >= MinAllocBytes ({})",
                self.max_alloc_bytes, self.min_alloc_bytes
            )));
        }

        if self.arena_size_bytes < self.max_alloc_bytes
            || self.arena_size_bytes % self.max_alloc_bytes != 0
        {
            return Err(AllocError::InvalidConfig(format!(
                "ArenaSizeBytes ({}) must be a multiple of MaxAllocBytes ({})",
                self.arena_size_bytes, self.max_alloc_bytes
            )));
        }

        if self.max_total_bytes < self.arena_size_bytes {
            return Err(AllocError::InvalidConfig(format!(
                "MaxTotalBytes ({}) must cover at least one arena ({} bytes)",
                self.max_total_bytes, self.arena_size_bytes
            )));
        }

        let min_log2 = self.min_alloc_bytes.trailing_zeros();
        let max_log2 = self.max_alloc_bytes.trailing_zeros();
        let max_arenas = self.max_total_bytes / self.arena_size_bytes;

        Ok(ValidatedConfig {
            config: *self,
            min_log2,
            max_log2,
            max_arenas,
        })
    }
}

/// A [`Config`] that has passed [`Config::validate`], with the derived
/// exponents and arena count cached.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedConfig {
    pub config: Config,
    pub min_log2: u32,
    pub max_log2: u32,
    pub max_arenas: usize,
}

impl ValidatedConfig {
    /// Number of size classes, `maxLog2 - minLog2 + 1`.
    #[inline]
    pub fn classes(&self) -> usize {
        (self.max_log2 - self.min_log2 + 1) as usize
    }

    /// Map a size class exponent to a free-list index in `0..classes()`.
    #[inline]
    pub fn class_index(&self, log2: u32) -> usize {
        (log2 - self.min_log2) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: usize, max: usize, arena: usize, total: usize) -> Config {
        Config {
            min_alloc_bytes: min,
            max_alloc_bytes: max,
            arena_size_bytes: arena,
            max_total_bytes: total,
        }
    }

    #[test]
    fn valid_config_derives_classes() {
        let v = cfg(8, 256, 256, 1280).validate().unwrap();
        assert_eq!(v.min_log2, 3);
        assert_eq!(v.max_log2, 8);
        assert_eq!(v.classes(), 6);
        assert_eq!(v.max_arenas, 5);
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(cfg(9, 256, 256, 1280).validate().is_err());
    }

    #[test]
    fn rejects_min_below_eight() {
        assert!(cfg(4, 256, 256, 1280).validate().is_err());
    }

    #[test]
    fn rejects_max_below_min() {
        assert!(cfg(256, 8, 256, 1280).validate().is_err());
    }

    #[test]
    fn rejects_arena_not_multiple_of_max() {
        assert!(cfg(8, 256, 300, 1280).validate().is_err());
    }

    #[test]
    fn rejects_total_below_one_arena() {
        assert!(cfg(8, 256, 256, 128).validate().is_err());
    }
}
