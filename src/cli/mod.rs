//! Command-line front ends.

pub mod headless;
pub mod tui;
