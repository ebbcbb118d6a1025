#![forbid(unsafe_code)]
//! e2read public API facade.
//!
//! Re-exports the image session from `e2r-core` through a stable external
//! interface. The CLI and any downstream consumer depend on this crate.

pub use e2r_core::*;
