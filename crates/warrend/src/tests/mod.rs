//! Test suites for the warren service.

mod behaviour;
mod support;
mod unit;
