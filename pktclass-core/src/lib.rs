//! Core of a multi-dimensional packet classification evaluation framework:
//! two engines — a recursive space-decomposition classifier (HyperSplit)
//! and a Tuple-Space-Search classifier (TSS) — that each build an index
//! from a rule set and answer "which highest-priority rule matches this
//! packet?" queries over the five-tuple key space.
//!
//! Engine selection is a tagged variant (see [`driver::Engine`]) rather
//! than a trait object: the two engines build from different rule shapes
//! (range vs. prefix), and a trait object would otherwise need a shared
//! supertype for that difference.

pub mod config;
pub mod dimension;
pub mod driver;
pub mod error;
pub mod hypersplit;
pub mod ingest;
pub mod logging;
pub mod rule;
pub mod tss;

pub use error::{Error, Result};
