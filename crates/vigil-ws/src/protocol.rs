//! JSON frames exchanged with the camera server.
//!
//! Client frames carry a `command_id` the server echoes back on the result
//! and on every event produced by a subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_core::{Camera, EventKind, RecorderComplete, SyncEvent};

/// Command name used for the snapshot fetch.
pub const GET_CAMERAS: &str = "get_cameras";
/// Command name used for event subscriptions.
pub const SUBSCRIBE_EVENT: &str = "subscribe_event";

/// A command sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Fetch every registered camera.
    GetCameras,
    /// Start receiving events named `event`.
    SubscribeEvent {
        /// Server event name, may start with a `*` wildcard.
        event: String,
    },
}

impl ClientCommand {
    /// Command name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetCameras => GET_CAMERAS,
            Self::SubscribeEvent { .. } => SUBSCRIBE_EVENT,
        }
    }
}

/// A command with its id, as written to the socket.
#[derive(Debug, Serialize)]
pub struct ClientFrame<'a> {
    /// Id the server echoes back.
    pub command_id: u64,
    /// The command itself, flattened next to the id.
    #[serde(flatten)]
    pub command: &'a ClientCommand,
}

impl ClientFrame<'_> {
    /// Serialize to the text payload of a WebSocket message.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error body of a failed result.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ErrorBody {
    /// Machine readable code.
    #[serde(default)]
    pub code: String,
    /// Human readable message.
    #[serde(default)]
    pub message: String,
}

/// Event body of an event frame.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EventBody {
    /// Server event name.
    pub name: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// A frame received from the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Answer to a command.
    Result {
        /// Id of the command being answered.
        command_id: u64,
        /// Whether the command succeeded.
        #[serde(default)]
        success: bool,
        /// Result payload on success.
        #[serde(default)]
        result: Value,
        /// Error on failure.
        #[serde(default)]
        error: Option<ErrorBody>,
    },
    /// An event produced by a subscription.
    Event {
        /// Id of the subscribe command, when the server sends it.
        #[serde(default)]
        command_id: Option<u64>,
        /// The event.
        event: EventBody,
    },
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse a text payload.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Whether `name` matches a subscription pattern. A leading `*` matches any
/// prefix, so `*/recorder/complete` matches `front/recorder/complete`.
pub fn event_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => pattern == name,
    }
}

/// Decode a `get_cameras` result. The server answers with an object keyed
/// by identifier; a plain array is accepted too. Objects whose entries lack
/// an `identifier` take it from the key.
pub fn decode_cameras(result: Value) -> Result<Vec<Camera>, serde_json::Error> {
    match result {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, mut value)| {
                if let Value::Object(fields) = &mut value {
                    let _ = fields
                        .entry("identifier")
                        .or_insert_with(|| Value::String(key));
                }
                serde_json::from_value(value)
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other),
    }
}

/// Decode the payload of an event of `kind`.
pub fn decode_event(kind: EventKind, data: Value) -> Result<SyncEvent, serde_json::Error> {
    Ok(match kind {
        EventKind::CameraRegistered => {
            SyncEvent::CameraRegistered(serde_json::from_value::<Camera>(data)?)
        }
        EventKind::RecordingComplete => {
            SyncEvent::RecordingComplete(serde_json::from_value::<RecorderComplete>(data)?)
        }
    })
}
