// Library root: re-exports all modules so integration tests and the CLI can
// reach the engine's public API.

pub mod autobuild;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod grid;
pub mod import;
pub mod model;
pub mod pairing;
pub mod placement;
pub mod qa;

#[cfg(test)]
pub(crate) mod testutil;

pub use engine::ScheduleEngine;
pub use error::{ScheduleError, ScheduleResult};
