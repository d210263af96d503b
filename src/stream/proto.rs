//! Wire messages exchanged with the VASP simulator and the Socket.IO framing
//! that carries them.
//!
//! Every named event travels as an Engine.IO message wrapping a Socket.IO
//! event packet, eg `42["vasp_context","{\"vasp_id\":...}"]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Client-to-server handshake event name.
pub const VASP_CONTEXT_EVENT: &str = "vasp_context";
/// Client-to-server transfer request event name.
pub const TRANSACTION_REQUEST_EVENT: &str = "transaction_request";
/// Server-to-client log line event name.
pub const VASP_LOG_MESSAGE_EVENT: &str = "vasp_log_message";
/// Server-to-client settled transaction event name.
pub const TRANSACTION_EVENT: &str = "transaction";

/// Handshake payload identifying one endpoint of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaspContextMsg {
    pub vasp_id: String,
    pub context_id: String,
    pub originator: bool,
}

/// Log line produced by a remote institution simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogMessage {
    pub vasp_id: String,
    pub timestamp: String,
    pub message: String,
    pub message_unencrypted: String,
    pub color_code: String,
}

/// Settled transfer as reported by the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub timestamp: String,
    pub transaction_id: String,
    pub originating_wallet: String,
    pub originating_vasp_id: String,
    pub originating_vasp_display_name: String,
    pub beneficiary_wallet: String,
    pub beneficiary_vasp_id: String,
    pub beneficiary_vasp_display_name: String,
    /// Opaque IVMS101 JSON document, kept verbatim.
    #[serde(rename = "ivms101Data")]
    pub ivms101_payload: String,
}

/// Outbound transfer request sent over the originator's connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRequest {
    pub context_id: String,
    pub originator_vasp_id: String,
    pub originator_wallet_id: String,
    pub beneficiary_vasp_id: String,
    pub beneficiary_wallet_id: String,
    pub crypto_type: String,
    pub amount: f64,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    VaspContext(VaspContextMsg),
    TransactionRequest(TransactionRequest),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::VaspContext(_) => VASP_CONTEXT_EVENT,
            Self::TransactionRequest(_) => TRANSACTION_REQUEST_EVENT,
        }
    }

    /// Encodes the event as a Socket.IO event packet.
    ///
    /// The payload is sent as a JSON string holding the serialized message,
    /// which is what the simulator's handlers decode.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            Self::VaspContext(context) => serde_json::to_string(context)?,
            Self::TransactionRequest(request) => serde_json::to_string(request)?,
        };
        Packet::Event {
            name: self.name().to_string(),
            payload: Value::String(payload),
        }
        .to_text()
    }
}

/// Events the server emits that the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    VaspLogMessage(LogMessage),
    Transaction(Transaction),
    /// Event name this client does not handle.
    Unknown(String),
}

impl ServerEvent {
    /// Decodes a named event payload.
    ///
    /// Payloads may be a JSON string holding JSON text or an inline JSON
    /// value.
    pub fn from_event(name: &str, payload: Value) -> Result<Self, serde_json::Error> {
        match name {
            VASP_LOG_MESSAGE_EVENT => decode_payload(payload).map(Self::VaspLogMessage),
            TRANSACTION_EVENT => decode_payload(payload).map(Self::Transaction),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

fn decode_payload<T>(payload: Value) -> Result<T, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match payload {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    }
}

/// One text frame of the Engine.IO / Socket.IO stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO open with the server's handshake document.
    Open(Value),
    /// Engine.IO close.
    Close,
    Ping(String),
    Pong(String),
    Noop,
    /// Socket.IO namespace connect (request when sent, acknowledgement when received).
    Connect,
    /// Socket.IO namespace disconnect.
    Disconnect,
    /// Socket.IO connect refused by the server.
    ConnectError(String),
    Event {
        name: String,
        payload: Value,
    },
}

/// Framing failure for a single text frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PacketError(pub String);

impl Packet {
    pub fn from_text(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let engine_type = chars
            .next()
            .ok_or_else(|| PacketError("empty frame".to_string()))?;
        let rest = chars.as_str();

        match engine_type {
            '0' => {
                let handshake = if rest.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(rest)
                        .map_err(|err| PacketError(format!("invalid open packet: {err}")))?
                };
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => parse_socket_packet(rest),
            '6' => Ok(Self::Noop),
            other => Err(PacketError(format!("unknown engine packet type {other:?}"))),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping(payload) => format!("2{payload}"),
            Self::Pong(payload) => format!("3{payload}"),
            Self::Noop => "6".to_string(),
            Self::Connect => "40".to_string(),
            Self::Disconnect => "41".to_string(),
            Self::ConnectError(reason) => {
                format!("44{}", serde_json::to_string(&serde_json::json!({ "message": reason }))?)
            }
            Self::Event { name, payload } => {
                format!("42{}", serde_json::to_string(&serde_json::json!([name, payload]))?)
            }
        })
    }
}

fn parse_socket_packet(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let socket_type = chars
        .next()
        .ok_or_else(|| PacketError("message frame without socket packet".to_string()))?;
    let body = strip_namespace(chars.as_str());

    match socket_type {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => parse_event(body.trim_start_matches(|c: char| c.is_ascii_digit())),
        '4' => {
            let reason = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string());
            Ok(Packet::ConnectError(reason))
        }
        other => Err(PacketError(format!("unsupported socket packet type {other:?}"))),
    }
}

fn strip_namespace(body: &str) -> &str {
    if !body.starts_with('/') {
        return body;
    }
    match body.find(',') {
        Some(index) => &body[index + 1..],
        None => "",
    }
}

fn parse_event(body: &str) -> Result<Packet, PacketError> {
    let values: Vec<Value> = serde_json::from_str(body)
        .map_err(|err| PacketError(format!("invalid event packet: {err}")))?;
    let mut values = values.into_iter();
    let name = match values.next() {
        Some(Value::String(name)) => name,
        _ => return Err(PacketError("event packet without a name".to_string())),
    };
    Ok(Packet::Event {
        name,
        payload: values.next().unwrap_or(Value::Null),
    })
}
