//! Wire format between the gateway and its clients.
//!
//! Inbound text frames are JSON objects with an optional `role` and an
//! optional `text`. Two literal `text` values are control tokens: `ok`
//! acknowledges (opens the send gate) and `exit` aborts the current reply.
//! Inbound binary frames carry recorded speech when recognition is enabled.
//! Outbound audio goes out as raw binary frames; recoverable errors go out as
//! `{"type":"error","kind":..,"message":..}` text frames and recognized speech
//! is echoed back as `{"type":"transcript","text":..}`.

use serde::{Deserialize, Serialize};

use crate::{
    auth::Credentials,
    error::{NoticeKind, ProtocolError, TransportError},
    validation::{validate_role, validate_utterance},
};

pub const ACK_TOKEN: &str = "ok";
pub const ABORT_TOKEN: &str = "exit";

/// Frame received from the transport.
#[derive(Debug)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Closed(TransportError),
}

/// One unit of audio released by the flow controller. `epoch` is the abort
/// generation it was buffered under; a unit from an earlier epoch is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUnit {
    pub epoch: u64,
    pub bytes: Vec<u8>,
}

/// Frame queued for the transport writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(AudioUnit),
    Event(ServerEvent),
    Close { code: u16, reason: String },
}

/// Structured text frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Error { kind: NoticeKind, message: String },
    Transcript { text: String },
}

impl ServerEvent {
    pub fn error<E>(err: &E) -> Self
    where
        E: std::fmt::Display,
        for<'a> NoticeKind: From<&'a E>,
    {
        ServerEvent::Error {
            kind: NoticeKind::from(err),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"type\":\"error\"}"))
    }
}

/// One action requested by a client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SwitchRole(String),
    Utterance(String),
    Ack,
    Abort,
}

#[derive(Deserialize)]
struct ClientFrame {
    role: Option<String>,
    text: Option<String>,
}

/// Parse a text frame into the actions it requests, in the order they apply:
/// a role switch always precedes the text carried by the same frame.
pub fn parse_frame(raw: &str) -> Result<Vec<ClientMessage>, ProtocolError> {
    let frame: ClientFrame =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if frame.role.is_none() && frame.text.is_none() {
        return Err(ProtocolError::Empty);
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(role) = frame.role {
        let role = role.trim().to_string();
        validate_role(&role)?;
        messages.push(ClientMessage::SwitchRole(role));
    }
    if let Some(text) = frame.text {
        messages.push(match text.trim() {
            ACK_TOKEN => ClientMessage::Ack,
            ABORT_TOKEN => ClientMessage::Abort,
            _ => {
                validate_utterance(&text)?;
                ClientMessage::Utterance(text)
            }
        });
    }
    Ok(messages)
}

/// Extract credentials from the first frame of a session: either a JSON
/// object carrying `device_id` (and optionally `api_key`), a JSON string, or
/// the bare frame text.
pub fn parse_identity_frame(raw: &str) -> Option<Credentials> {
    let (device_id, api_key) = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => (
            map.get("device_id")?.as_str()?.to_string(),
            map.get("api_key").and_then(|k| k.as_str()).map(str::to_string),
        ),
        Ok(serde_json::Value::String(s)) => (s, None),
        _ => (raw.to_string(), None),
    };
    let device_id = device_id.trim();
    (!device_id.is_empty()).then(|| Credentials {
        device_id: device_id.to_string(),
        api_key,
    })
}
