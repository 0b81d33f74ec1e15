// packages/engine/src/control/protocol.rs
//! Wire messages of the control channel
//!
//! One JSON object per line in both directions.
//!
//! ```text
//! → {"action":"start","config":{"producerCount":2,"consumerCount":2,"bufferCapacity":5}}
//! → {"action":"stop"}
//! ← {"type":"snapshot","seq":3,"capacity":5,"buffer":[1,2],"producers":[...],"consumers":[...],"running":true}
//! ← {"type":"error","code":"already_running","message":"A simulation is already running"}
//! ```

use crate::broadcast::snapshot::StateSnapshot;
use crate::runtime::session::SimulationConfig;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Accepted names for each start field, canonical name first
const PRODUCER_FIELDS: &[&str] = &["producerCount", "numProducers"];
const CONSUMER_FIELDS: &[&str] = &["consumerCount", "numConsumers"];
const CAPACITY_FIELDS: &[&str] = &["bufferCapacity", "bufferSize"];

/// Inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(SimulationConfig),
    Stop,
}

impl Command {
    /// Parse one inbound line
    ///
    /// Unparsable JSON and unknown actions are `MalformedCommand`; a `start`
    /// with missing, non-integer or non-positive counts is `Configuration`.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| EngineError::MalformedCommand(format!("Invalid JSON: {}", e)))?;

        let message = value
            .as_object()
            .ok_or_else(|| EngineError::MalformedCommand("Expected a JSON object".to_string()))?;

        let action = message
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::MalformedCommand("Missing \"action\"".to_string()))?;

        match action {
            "start" => {
                // Counts live under "config" or at the top level
                let fields = match message.get("config") {
                    Some(Value::Object(config)) => config,
                    Some(_) => {
                        return Err(EngineError::Configuration(
                            "\"config\" must be an object".to_string(),
                        ))
                    }
                    None => message,
                };

                Ok(Command::Start(SimulationConfig::new(
                    count(fields, PRODUCER_FIELDS)?,
                    count(fields, CONSUMER_FIELDS)?,
                    count(fields, CAPACITY_FIELDS)?,
                )))
            }
            "stop" => Ok(Command::Stop),
            other => Err(EngineError::MalformedCommand(format!(
                "Unknown action \"{}\"",
                other
            ))),
        }
    }
}

fn count(fields: &Map<String, Value>, names: &[&str]) -> Result<usize> {
    let name = names[0];
    let value = names
        .iter()
        .find_map(|name| fields.get(*name))
        .ok_or_else(|| EngineError::Configuration(format!("{} is required", name)))?;

    if let Some(n) = value.as_u64() {
        if n == 0 {
            return Err(EngineError::Configuration(format!("{} must be at least 1", name)));
        }
        return usize::try_from(n)
            .map_err(|_| EngineError::Configuration(format!("{} is too large", name)));
    }

    let reason = if value.as_i64().is_some() {
        "must be at least 1"
    } else if value.is_number() {
        "must be an integer"
    } else {
        "must be a number"
    };
    Err(EngineError::Configuration(format!("{} {}", name, reason)))
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(StateSnapshot),
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(err: &EngineError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Serialize as one line, without the trailing newline
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<StateSnapshot> for ServerMessage {
    fn from(snapshot: StateSnapshot) -> Self {
        ServerMessage::Snapshot(snapshot)
    }
}
