//! Process-wide runtime switches.
//!
//! Only cosmetic state lives here; every algorithmic parameter travels in an
//! explicit context struct. The verbosity flag is set once at startup and
//! read from progress-reporting sites, so an atomic is adequate.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable or disable progress reporting on stdout.
#[inline]
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Release);
}

/// Whether progress reporting is enabled.
#[inline]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
