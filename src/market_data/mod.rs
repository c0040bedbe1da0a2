//! Market data model and tick normalization
//!
//! Raw upstream prices become canonical [`Tick`]s here. Every tick, whether it
//! came from the startup snapshot or the live stream, goes through
//! [`TickNormalizer`] before reaching the broadcaster.

pub mod normalizer;
pub mod symbols;
pub mod tick;

pub use normalizer::{normalize, TickNormalizer};
pub use symbols::SymbolSet;
pub use tick::{RawPrice, Tick};
