//! Mirror pipeline
//!
//! Moves mirror jobs through download, optional compression, optional
//! decompression and upload, bounding how many jobs are active in each stage.
//! Status changes travel through an asynchronous self-addressed transport
//! and are applied by a single orchestrator; backends plug into each stage
//! through the [`services::backend::StageBackend`] trait.

pub mod app_state;
pub mod backends;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
