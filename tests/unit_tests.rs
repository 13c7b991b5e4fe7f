//! Unit tests for individual components, run against the public API.

mod unit;
