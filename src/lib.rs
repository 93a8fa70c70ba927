//! valuebet: sports data fusion and value-bet decision engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod features;
pub mod fusion;
pub mod market;
pub mod prediction;
pub mod sources;
pub mod storage;
pub mod strategy;
pub mod types;
