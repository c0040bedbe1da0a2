//! Currency conversion rates
//!
//! [`RateCache`] owns the current [`RateTable`] and swaps it out whole on each
//! refresh. Readers take an `Arc` snapshot and never see a half-updated table.

pub mod cache;
pub mod table;

pub use cache::{RateCache, RateCacheStats};
pub use table::RateTable;
