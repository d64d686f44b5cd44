// ── Bus-facing domain model ──
//
// Everything here is serialized onto the bus as JSON. Field names are part
// of the wire contract with bus consumers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use z21gw_api::{CAN_NETWORK_ALL, Message, Request};

/// RFC 3339 timestamp in UTC with second precision, e.g. `2026-10-19T08:15:00Z`.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Reachability ─────────────────────────────────────────────────────

/// Edge reported by the reachability monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Transition {
    Online,
    Offline,
}

impl Transition {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Self::Online } else { Self::Offline }
    }
}

/// Result of the most recent probe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReachabilityState {
    pub online: bool,
    /// Device serial number, present only while online.
    pub serial: Option<String>,
    /// `None` until the first probe completes.
    pub observed_at: Option<DateTime<Utc>>,
}

impl ReachabilityState {
    pub fn online(serial: String, at: DateTime<Utc>) -> Self {
        Self {
            online: true,
            serial: Some(serial),
            observed_at: Some(at),
        }
    }

    pub fn offline(at: DateTime<Utc>) -> Self {
        Self {
            online: false,
            serial: None,
            observed_at: Some(at),
        }
    }

    pub fn to_status(&self) -> StatusMessage {
        StatusMessage {
            reachable: self.online,
            serial: self.serial.clone().unwrap_or_default(),
            ts: self.observed_at.map(timestamp).unwrap_or_default(),
        }
    }
}

/// Published on `<ns>.status` after every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub reachable: bool,
    /// Empty when unreachable.
    #[serde(default)]
    pub serial: String,
    pub ts: String,
}

// ── Commands ─────────────────────────────────────────────────────────

/// Inbound command envelope: `{"type": ..., "request": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
}

impl CommandRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request: None,
        }
    }

    /// Parse an inbound payload. An empty payload is an envelope with only
    /// `type` set to `default_kind`.
    pub fn parse(payload: &[u8], default_kind: &str) -> Result<Self, serde_json::Error> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(default_kind));
        }
        serde_json::from_slice(payload)
    }
}

/// Reply to a command, sent to the caller's reply address or `<ns>.reply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: String,
}

impl CommandReply {
    pub fn success(kind: impl Into<String>, reply: Option<Message>) -> Self {
        Self {
            kind: kind.into(),
            ok: true,
            reply,
            error: None,
            ts: timestamp(Utc::now()),
        }
    }

    pub fn failure(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ok: false,
            reply: None,
            error: Some(error.into()),
            ts: timestamp(Utc::now()),
        }
    }
}

/// Commands recognized under `<ns>.cmd.`, keyed by subject suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
pub enum CommandKind {
    #[strum(serialize = "can.discover")]
    CanDiscover,
    #[strum(serialize = "system.state")]
    SystemState,
    #[strum(serialize = "serial")]
    SerialNumber,
    #[strum(serialize = "hwinfo")]
    HardwareInfo,
}

/// Optional body of `can.discover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanDiscoverQuery {
    #[serde(default = "all_networks")]
    pub network_id: u16,
}

impl Default for CanDiscoverQuery {
    fn default() -> Self {
        Self {
            network_id: CAN_NETWORK_ALL,
        }
    }
}

fn all_networks() -> u16 {
    CAN_NETWORK_ALL
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

impl CommandKind {
    /// Build the device request for this command from the envelope body.
    pub fn to_request(self, body: Option<serde_json::Value>) -> Result<Request, serde_json::Error> {
        let body = body.filter(|v| !v.is_null());
        match self {
            Self::CanDiscover => {
                let query = match body {
                    Some(v) => serde_json::from_value::<CanDiscoverQuery>(v)?,
                    None => CanDiscoverQuery::default(),
                };
                Ok(Request::CanDetector {
                    network_id: query.network_id,
                })
            }
            Self::SystemState => no_args(body).map(|()| Request::SystemState),
            Self::SerialNumber => no_args(body).map(|()| Request::SerialNumber),
            Self::HardwareInfo => no_args(body).map(|()| Request::HardwareInfo),
        }
    }
}

fn no_args(body: Option<serde_json::Value>) -> Result<(), serde_json::Error> {
    if let Some(v) = body {
        serde_json::from_value::<NoArgs>(v)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn timestamp_is_utc_seconds() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 0).unwrap();
        assert_eq!(timestamp(at), "2026-10-19T08:15:00Z");
    }

    #[test]
    fn offline_status_has_empty_serial() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 0).unwrap();
        let json = serde_json::to_value(ReachabilityState::offline(at).to_status()).unwrap();
        assert_eq!(
            json,
            json!({ "reachable": false, "serial": "", "ts": "2026-10-19T08:15:00Z" })
        );
    }

    #[test]
    fn reply_omits_absent_fields() {
        let reply = CommandReply::failure("discover", "invalid message: eof");
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "discover");
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "invalid message: eof");
        assert!(json.get("reply").is_none());
    }

    #[test]
    fn reply_embeds_device_message() {
        let reply = CommandReply::success(
            "serial",
            Some(Message::SerialNumber { serial_number: 12345 }),
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["reply"], json!({ "kind": "serial_number", "serial_number": 12345 }));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn command_kinds_parse_from_subject_suffix() {
        assert_eq!("can.discover".parse::<CommandKind>().unwrap(), CommandKind::CanDiscover);
        assert_eq!("hwinfo".parse::<CommandKind>().unwrap(), CommandKind::HardwareInfo);
        assert!("can.rediscover".parse::<CommandKind>().is_err());
    }

    #[test]
    fn can_discover_defaults_to_all_networks() {
        let request = CommandKind::CanDiscover.to_request(None).unwrap();
        assert_eq!(request, Request::CanDetector { network_id: 0xD000 });

        let request = CommandKind::CanDiscover
            .to_request(Some(json!({ "network_id": 4660 })))
            .unwrap();
        assert_eq!(request, Request::CanDetector { network_id: 0x1234 });
    }

    #[test]
    fn mismatched_body_is_rejected() {
        assert!(CommandKind::CanDiscover.to_request(Some(json!("all"))).is_err());
        assert!(CommandKind::SerialNumber.to_request(Some(json!({ "x": 1 }))).is_err());
        assert!(CommandKind::SerialNumber.to_request(Some(json!({}))).is_ok());
    }

    #[test]
    fn empty_payload_defaults_type() {
        let request = CommandRequest::parse(b"", "serial").unwrap();
        assert_eq!(request, CommandRequest::new("serial"));
        assert!(CommandRequest::parse(b"{\"type\":", "serial").is_err());
    }
}
