//! Helpers shared by the tests of the forked-state crates.

pub mod env;
