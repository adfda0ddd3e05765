//! Behavioural suites for the connectivity core.
