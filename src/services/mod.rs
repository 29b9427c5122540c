pub mod analyzer;
pub mod control_plane;
pub mod executor;
pub mod job_store;
pub mod memory_store;
pub mod progress;
pub mod registry;
pub mod sink;
pub mod worker;
