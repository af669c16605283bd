//! Capability flags a driver advertises to the library.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DriverFeatures: u32 {
        const AGGREGATE_METADATA = 1 << 0;
        const ACCUMULATE_METADATA = 1 << 1;
        const DATA_SIEVE = 1 << 2;
        const POSIX_COMPAT_HANDLE = 1 << 3;
        const SUPPORTS_SWMR_IO = 1 << 4;
        const DEFAULT_VFD_COMPATIBLE = 1 << 5;
        /// Raw data storage must be allocated when a dataset is created.
        const ALLOCATE_EARLY = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_names() {
        let f = DriverFeatures::DATA_SIEVE | DriverFeatures::ALLOCATE_EARLY;
        assert!(f.contains(DriverFeatures::ALLOCATE_EARLY));
        assert!(!f.contains(DriverFeatures::AGGREGATE_METADATA));
        assert!(f.contains(DriverFeatures::empty()));
        let names: Vec<_> = f.iter_names().map(|(name, _)| name).collect();
        assert_eq!(names, ["DATA_SIEVE", "ALLOCATE_EARLY"]);
    }
}
