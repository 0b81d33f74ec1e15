// packages/engine/src/control/mod.rs
//! Control channel: commands in, snapshots out
//!
//! # Architecture
//!
//! ```text
//!   viewer ◀──── TCP, one JSON object per line ────▶ ControlServer
//!                                                        │ accept
//!                                                        ▼
//!                                              connection task (per viewer)
//!                                              ┌──────────────────────────┐
//!        {"action":"start",...} ─────────────▶ │ Command::parse           │
//!                                              │        │                 │
//!                                              │        ▼                 │
//!                                              │ SessionController        │
//!                                              │   └─ SimulationSession   │
//!                                              │            │ snapshots   │
//!        {"type":"snapshot",...} ◀──────────── │ ◀──────────┘             │
//!                                              └──────────────────────────┘
//! ```

pub mod connection;
pub mod controller;
pub mod protocol;
pub mod server;

pub use connection::serve_connection;
pub use controller::SessionController;
pub use protocol::{Command, ServerMessage};
pub use server::{ConnectionEntry, ConnectionRegistry, ControlServer};
