//! Durable tracking state.

pub mod format;
pub mod store;

pub use store::{FileTrackingStore, MemoryTrackingStore, TrackingStore};
