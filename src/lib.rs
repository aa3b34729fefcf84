//! Incremental equivalent stress analyses run as parallel sub-analyses on
//! external fatigue engines.
//!
//! A request is split into one job per sweep angle or per loadcase
//! contribution. The [`orchestrator::Orchestrator`] renders the shared material
//! file, runs every job on a bounded [`pool::WorkerPool`] and aggregates the
//! results by job index.

pub mod analysis;
pub mod backend;
pub mod cancel;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod job;
pub mod material;
pub mod orchestrator;
pub mod pool;
pub mod runner;
pub mod template;

#[cfg(feature = "cli")]
pub mod app_logic;
