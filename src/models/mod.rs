pub mod analysis;
pub mod analyze;
pub mod job;
