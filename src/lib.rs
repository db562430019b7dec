//! Memory-access coalescing for SIMD kernel IR.
//!
//! Narrow per-lane loads and stores inside one basic block are merged into
//! wide vector (or packed record) accesses when their addresses provably
//! differ by constant byte offsets and no intervening memory operation may
//! alias them. See [`coalesce::Coalescer`] for the entry point.

#[macro_use]
pub mod error;
pub mod analyze;
pub mod coalesce;
pub mod config;
pub mod ir;
pub mod utils;

pub use coalesce::{CoalesceStats, Coalescer};
pub use config::{CoalesceConfig, ProfitTable, Strategy, TargetConfig};
pub use error::{MC, MCException};
