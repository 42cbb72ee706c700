pub mod store;
pub mod tracker;

pub use store::{JsonFileTickStore, MemoryTickStore, TickStore};
pub use tracker::{TickChange, TickTracker};
