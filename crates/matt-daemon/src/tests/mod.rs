//! Behavioural suites for the daemon lifecycle.

mod support;
