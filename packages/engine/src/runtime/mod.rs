// packages/engine/src/runtime/mod.rs
//! Simulation runtime
//!
//! This module provides the moving parts of a running simulation:
//!
//! - **Worker**: producer and consumer tasks with explicit state machines
//! - **Session**: one configured run owning the buffer, workers and broadcaster
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationSession                      │
//! │  ┌──────────┐  ┌──────────┐        ┌──────────┐        │
//! │  │Producer 1│  │Producer 2│  ...   │Consumer n│        │
//! │  └────┬─────┘  └────┬─────┘        └────▲─────┘        │
//! │       │ put         │ put               │ take          │
//! │       ▼             ▼                   │               │
//! │  ┌──────────────────────────────────────┴──────┐        │
//! │  │          Arc<BoundedBuffer<Item>>           │        │
//! │  └─────────────────────┬───────────────────────┘        │
//! │                        │ journal (under lock)           │
//! │                        ▼                                │
//! │                 StateBroadcaster ──▶ snapshots          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod session;
pub mod worker;

/// Opaque item passed from producers to consumers
pub type Item = u64;

// Re-export commonly used types
pub use session::{SessionReport, SessionSettings, SimulationConfig, SimulationSession};
pub use worker::{Role, Worker, WorkerCell, WorkerContext, WorkerState, WorkerSummary};
