//! # cbct-compute
//!
//! The FDK reconstruction pipeline: device backend, streaming runtime and
//! the numerical stages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Engine                                │
//! │                                                                  │
//! │  plan: volume grid ── slabs ── tasks (one per slab x device)     │
//! │                                                                  │
//! │  per device:                                                     │
//! │  source ► preloader ► weighting ► filter ► reconstruction ─┐     │
//! │     ▲         │                                            │     │
//! │  task queue   └─ device pool (bounded, recycling)          ▼     │
//! │                                                      shared sink │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stages run on their own worker threads connected by bounded channels;
//! termination travels in-band as a poison pill. Kernels execute with
//! rayon data parallelism on pooled pitched buffers, with per-projection
//! streams carrying deferred errors to their synchronization points.

#![warn(missing_docs)]

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod stages;

pub use engine::{Engine, EngineConfig, ReconstructionPlan, PARALLEL_PROJECTIONS};
pub use error::{ComputeError, ComputeResult};
