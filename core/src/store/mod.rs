//! Persistence of reading positions.

pub mod position;

pub use position::{JsonPositionStore, MemoryPositionStore, PositionStore};

pub type Result<T> = crate::Result<T>;
