//! Process-wide tracing setup for florist binaries and test suites.

pub mod tracing;

pub use crate::tracing::{init, init_for_tests, init_with_default};
