//! A compliance kit for the eight testable properties of §8: each
//! property gets its own suite module, built from the same fixtures and
//! APIs a real client or broker uses, not a mock of them. A downstream
//! crate (or this crate's own test binary) runs [`all_suites`] to check
//! that its build of the engine still satisfies every property, the way
//! a protocol conformance kit is run against each new implementation.

pub mod support;

mod cache_policy_inheritance;
mod external_file_integrity;
mod fixtures;
mod monitor_compression;
mod notification_ordering;
mod pipeline_bound;
mod revision_propagation;
mod tag_monotonicity;
mod transaction_atomicity;

pub use support::{run_suite, TckCase, TckSuite};

/// Every suite, in the order properties are numbered in §8.
pub fn all_suites() -> Vec<&'static TckSuite> {
    vec![
        tag_monotonicity::suite(),
        pipeline_bound::suite(),
        transaction_atomicity::suite(),
        notification_ordering::suite(),
        external_file_integrity::suite(),
        cache_policy_inheritance::suite(),
        monitor_compression::suite(),
        revision_propagation::suite(),
    ]
}

/// Runs every suite, panicking with `[suite::case]`-prefixed context on
/// the first failure.
pub fn run_all() {
    for suite in all_suites() {
        run_suite(suite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_monotonicity() {
        run_suite(tag_monotonicity::suite());
    }

    #[test]
    fn pipeline_bound() {
        run_suite(pipeline_bound::suite());
    }

    #[test]
    fn transaction_atomicity() {
        run_suite(transaction_atomicity::suite());
    }

    #[test]
    fn notification_ordering() {
        run_suite(notification_ordering::suite());
    }

    #[test]
    fn external_file_integrity() {
        run_suite(external_file_integrity::suite());
    }

    #[test]
    fn cache_policy_inheritance() {
        run_suite(cache_policy_inheritance::suite());
    }

    #[test]
    fn monitor_compression() {
        run_suite(monitor_compression::suite());
    }

    #[test]
    fn revision_propagation() {
        run_suite(revision_propagation::suite());
    }

    #[test]
    fn all_suites_cover_every_testable_property_exactly_once() {
        let names: Vec<&str> = all_suites().iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 8);
        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 8, "suite names must be unique, got {names:?}");
    }
}
