//! Subforge - subscription aggregator and sing-box config generator.
//!
//! The binary lives in `main.rs`; this crate root holds the path layout it
//! shares with tests.

pub mod paths;

pub use paths::AppPaths;
