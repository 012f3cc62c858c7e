// JSON envelope and inbound command parsing.
//
// Every frame in either direction is `{header, body, timestamp}` with an
// uppercase header tag. Inbound frames are parsed exactly once, at the
// dispatch boundary, into a `ClientCommand`; everything past that boundary
// works with validated types.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ScrimRecord, SessionId};

/// The uniform wire frame: uppercase tag, opaque body, send time in ms epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub header: String,
    pub body: Value,
    pub timestamp: i64,
}

impl Envelope {
    /// Construct an outbound envelope stamped with the current time.
    pub fn new(header: Header, body: Value) -> Self {
        Self {
            header: header.as_str().to_string(),
            body,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Known envelope header tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Server -> client: assigned or confirmed session identity.
    /// Client -> server: request to adopt a previous session identity.
    Ident,
    /// Server -> client: the full presence set, sent on every change.
    Update,
    /// Server -> client: heartbeat probe.
    Ping,
    /// Client -> server: heartbeat acknowledgement.
    Pong,
    /// Client -> server: publish or overwrite a scrim record.
    Set,
    /// Client -> server: retract the scrim record.
    Clear,
    /// Client -> server: diagnostic, logs live sessions server-side.
    Sessions,
    /// Server -> client: protocol violation report.
    Error,
}

impl Header {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ident => "IDENT",
            Self::Update => "UPDATE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Set => "SET",
            Self::Clear => "CLEAR",
            Self::Sessions => "SESSIONS",
            Self::Error => "ERROR",
        }
    }
}

/// A protocol violation by the client, answered with an `ERROR` envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// Frame lacked `header`/`body`, or a body failed validation.
    #[error("Message malformed.")]
    Malformed,
    /// Header tag is not part of the protocol.
    #[error("unknown header: {0}")]
    UnknownHeader(String),
}

/// An inbound frame parsed into its per-header body variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Adopt (merge into) the named session identity. `None` when the body
    /// was empty, which the relay treats as a no-op.
    Ident(Option<SessionId>),
    /// Publish or overwrite the sender's scrim record.
    Set(ScrimRecord),
    /// Retract the sender's scrim record.
    Clear,
    /// Heartbeat acknowledgement.
    Pong,
    /// Diagnostic: log the live session identities.
    Sessions,
}

impl ClientCommand {
    /// Parse a decoded JSON frame.
    ///
    /// Both `header` (a string) and `body` must be present. Header matching
    /// is case-insensitive; the reply for an unknown header echoes the tag
    /// as the client sent it.
    pub fn parse(frame: &Value) -> Result<Self, ProtocolViolation> {
        let Some(object) = frame.as_object() else {
            return Err(ProtocolViolation::Malformed);
        };
        let header = object
            .get("header")
            .and_then(Value::as_str)
            .ok_or(ProtocolViolation::Malformed)?;
        let body = object.get("body").ok_or(ProtocolViolation::Malformed)?;

        match header.to_uppercase().as_str() {
            "IDENT" => parse_ident(body),
            "SET" => parse_set(body),
            "CLEAR" => Ok(Self::Clear),
            "PONG" => Ok(Self::Pong),
            "SESSIONS" => Ok(Self::Sessions),
            _ => Err(ProtocolViolation::UnknownHeader(header.to_string())),
        }
    }
}

fn parse_ident(body: &Value) -> Result<ClientCommand, ProtocolViolation> {
    match body {
        Value::Null => Ok(ClientCommand::Ident(None)),
        Value::String(raw) if raw.is_empty() => Ok(ClientCommand::Ident(None)),
        Value::String(raw) => raw
            .parse::<SessionId>()
            .map(|target| ClientCommand::Ident(Some(target)))
            .map_err(|_| ProtocolViolation::Malformed),
        _ => Err(ProtocolViolation::Malformed),
    }
}

fn parse_set(body: &Value) -> Result<ClientCommand, ProtocolViolation> {
    let record = serde_json::from_value::<ScrimRecord>(body.clone())
        .map_err(|_| ProtocolViolation::Malformed)?;
    if !record.is_valid() {
        return Err(ProtocolViolation::Malformed);
    }
    Ok(ClientCommand::Set(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Region, Tier};
    use serde_json::json;

    #[test]
    fn envelope_serializes_with_uppercase_header_and_integer_timestamp() {
        let envelope = Envelope::new(Header::Ping, Value::Null);
        let value = serde_json::to_value(&envelope).expect("envelope should serialize");

        assert_eq!(value["header"], "PING");
        assert!(value["body"].is_null());
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope::new(Header::Update, json!([{"contact": "x"}]));
        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope, parsed);
    }

    #[test]
    fn parse_requires_header_and_body() {
        assert_eq!(
            ClientCommand::parse(&json!({"body": null})),
            Err(ProtocolViolation::Malformed),
        );
        assert_eq!(
            ClientCommand::parse(&json!({"header": "PONG"})),
            Err(ProtocolViolation::Malformed),
        );
        assert_eq!(ClientCommand::parse(&json!("PONG")), Err(ProtocolViolation::Malformed));
    }

    #[test]
    fn parse_requires_string_header() {
        assert_eq!(
            ClientCommand::parse(&json!({"header": 7, "body": null})),
            Err(ProtocolViolation::Malformed),
        );
    }

    #[test]
    fn header_match_is_case_insensitive() {
        assert_eq!(
            ClientCommand::parse(&json!({"header": "clear", "body": null})),
            Ok(ClientCommand::Clear),
        );
        assert_eq!(
            ClientCommand::parse(&json!({"header": "PoNg", "body": null})),
            Ok(ClientCommand::Pong),
        );
    }

    #[test]
    fn unknown_header_echoes_the_original_tag() {
        assert_eq!(
            ClientCommand::parse(&json!({"header": "frob", "body": null})),
            Err(ProtocolViolation::UnknownHeader("frob".to_string())),
        );
    }

    #[test]
    fn ident_with_empty_body_is_a_noop() {
        assert_eq!(
            ClientCommand::parse(&json!({"header": "IDENT", "body": ""})),
            Ok(ClientCommand::Ident(None)),
        );
        assert_eq!(
            ClientCommand::parse(&json!({"header": "IDENT", "body": null})),
            Ok(ClientCommand::Ident(None)),
        );
    }

    #[test]
    fn ident_parses_a_session_identity() {
        let target = SessionId::generate();
        let parsed =
            ClientCommand::parse(&json!({"header": "IDENT", "body": target.to_string()}));
        assert_eq!(parsed, Ok(ClientCommand::Ident(Some(target))));
    }

    #[test]
    fn ident_with_garbage_identity_is_malformed() {
        assert_eq!(
            ClientCommand::parse(&json!({"header": "IDENT", "body": "yesterday"})),
            Err(ProtocolViolation::Malformed),
        );
        assert_eq!(
            ClientCommand::parse(&json!({"header": "IDENT", "body": 42})),
            Err(ProtocolViolation::Malformed),
        );
    }

    #[test]
    fn set_parses_a_valid_record() {
        let parsed = ClientCommand::parse(&json!({
            "header": "SET",
            "body": {"contact": "discord#1234", "tier": "High+", "region": "NA"},
        }));
        assert_eq!(
            parsed,
            Ok(ClientCommand::Set(ScrimRecord {
                contact: "discord#1234".to_string(),
                tier: Tier::HighPlus,
                region: Region::Na,
            })),
        );
    }

    #[test]
    fn set_rejects_unknown_tier() {
        let parsed = ClientCommand::parse(&json!({
            "header": "SET",
            "body": {"contact": "abc", "tier": "Ultra", "region": "NA"},
        }));
        assert_eq!(parsed, Err(ProtocolViolation::Malformed));
    }

    #[test]
    fn set_rejects_missing_fields_and_non_objects() {
        assert_eq!(
            ClientCommand::parse(&json!({
                "header": "SET",
                "body": {"tier": "Low", "region": "EU"},
            })),
            Err(ProtocolViolation::Malformed),
        );
        assert_eq!(
            ClientCommand::parse(&json!({"header": "SET", "body": "ready"})),
            Err(ProtocolViolation::Malformed),
        );
    }

    #[test]
    fn set_rejects_oversized_contact() {
        let parsed = ClientCommand::parse(&json!({
            "header": "SET",
            "body": {"contact": "x".repeat(21), "tier": "Mid", "region": "SEA"},
        }));
        assert_eq!(parsed, Err(ProtocolViolation::Malformed));
    }

    #[test]
    fn violations_render_the_wire_error_strings() {
        assert_eq!(ProtocolViolation::Malformed.to_string(), "Message malformed.");
        assert_eq!(
            ProtocolViolation::UnknownHeader("FROB".to_string()).to_string(),
            "unknown header: FROB",
        );
    }
}
