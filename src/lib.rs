//! AURA analysis job queue
//!
//! This library provides the queue and worker orchestration layer for AURA
//! track analysis: a Postgres-backed job store with a `SKIP LOCKED` dequeue,
//! the job lifecycle state machine, progress propagation, a polling worker,
//! and an HTTP ingestion gateway that reports back to a remote control plane.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
