// packages/engine/src/observability/metrics.rs
//! Metric names and recording helpers
//!
//! Call sites go through these helpers so names and labels stay consistent.

use crate::runtime::worker::Role;
use ::metrics::{counter, describe_counter, describe_gauge, gauge};

pub const ITEMS_PRODUCED: &str = "prodcon_items_produced_total";
pub const ITEMS_CONSUMED: &str = "prodcon_items_consumed_total";
pub const WORKER_BLOCKED: &str = "prodcon_worker_blocked_total";
pub const SESSIONS_STARTED: &str = "prodcon_sessions_started_total";
pub const SESSIONS_STOPPED: &str = "prodcon_sessions_stopped_total";
pub const SESSIONS_ACTIVE: &str = "prodcon_sessions_active";
pub const COMMANDS_REJECTED: &str = "prodcon_commands_rejected_total";
pub const SNAPSHOTS_SENT: &str = "prodcon_snapshots_sent_total";
pub const CONNECTIONS_ACTIVE: &str = "prodcon_connections_active";
pub const CONNECTIONS_LOST: &str = "prodcon_connections_lost_total";

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit `stop` command
    Command,
    /// The control connection went away
    ConnectionLost,
    /// Server shutdown
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Command => "command",
            StopReason::ConnectionLost => "connection_lost",
            StopReason::Shutdown => "shutdown",
        }
    }
}

/// Register metric descriptions with the installed recorder
pub fn describe_all() {
    describe_counter!(ITEMS_PRODUCED, "Items inserted into a buffer");
    describe_counter!(ITEMS_CONSUMED, "Items removed from a buffer");
    describe_counter!(WORKER_BLOCKED, "Times a worker blocked on a full or empty buffer");
    describe_counter!(SESSIONS_STARTED, "Simulation sessions started");
    describe_counter!(SESSIONS_STOPPED, "Simulation sessions stopped, by reason");
    describe_gauge!(SESSIONS_ACTIVE, "Simulation sessions currently running");
    describe_counter!(COMMANDS_REJECTED, "Inbound commands rejected, by error code");
    describe_counter!(SNAPSHOTS_SENT, "Snapshots written to viewers");
    describe_gauge!(CONNECTIONS_ACTIVE, "Open control connections");
    describe_counter!(CONNECTIONS_LOST, "Connections that dropped with a session running");
}

pub fn item_produced() {
    counter!(ITEMS_PRODUCED).increment(1);
}

pub fn item_consumed() {
    counter!(ITEMS_CONSUMED).increment(1);
}

pub fn worker_blocked(role: Role) {
    counter!(WORKER_BLOCKED, "role" => role.as_str()).increment(1);
}

pub fn session_started() {
    counter!(SESSIONS_STARTED).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

pub fn session_stopped(reason: StopReason) {
    counter!(SESSIONS_STOPPED, "reason" => reason.as_str()).increment(1);
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

pub fn command_rejected(code: &'static str) {
    counter!(COMMANDS_REJECTED, "code" => code).increment(1);
}

pub fn snapshot_sent() {
    counter!(SNAPSHOTS_SENT).increment(1);
}

pub fn connection_opened() {
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn connection_lost() {
    counter!(CONNECTIONS_LOST).increment(1);
}
