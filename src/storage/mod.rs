//! Run-scoped shared state: graph object persistence and trackers.

pub mod data_store;
pub mod duplicate_key_tracker;
pub mod graph_object_store;
pub mod type_tracker;

pub use data_store::MemoryDataStore;
pub use duplicate_key_tracker::DuplicateKeyTracker;
pub use graph_object_store::{
    FileSystemGraphObjectStore, FlushedGraphObjectData, IterationControl,
};
pub use type_tracker::TypeTracker;
