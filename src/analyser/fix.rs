//! Tag/value (FIX-style) payload decoding.
//!
//! Decoding is opportunistic: any payload carrying at least one SOH-delimited
//! `tag=value` field is decoded, whether or not it leads with a BeginString. Use
//! [FixMessage::is_fix] to keep only messages that announce themselves as FIX.
use rayon::prelude::*;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;
use super::containers::PacketRecord;

/// Field delimiter.
pub const SOH: char = '\x01';
pub const BEGIN_STRING_TAG: &str = "8";
pub const MSG_TYPE_TAG: &str = "35";

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("field {position} has an empty tag")]
    EmptyTag { position: usize },
}

/// Ordered tag/value mapping. Re-inserting a tag replaces the value in place,
/// so the last occurrence of a duplicated tag wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FixMessage {
    fields: Vec<(String, String)>,
}

impl FixMessage {
    pub fn insert(&mut self, tag: &str, value: &str) {
        match self.fields.iter_mut().find(|(t, _)| t == tag) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((tag.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.iter().find(|(t, _)| t == tag).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    pub fn begin_string(&self) -> Option<&str> {
        self.get(BEGIN_STRING_TAG)
    }

    /// True when the first field is a `FIX.`/`FIXT.` BeginString.
    pub fn is_fix(&self) -> bool {
        matches!(self.fields.first(), Some((tag, value)) if tag == BEGIN_STRING_TAG && value.starts_with("FIX"))
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(MSG_TYPE_TAG)
    }

    pub fn msg_type_name(&self) -> Option<&'static str> {
        self.msg_type().and_then(msg_type_name)
    }
}

impl Serialize for FixMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (tag, value) in &self.fields {
            map.serialize_entry(tag, value)?;
        }
        map.end()
    }
}

/// Common MsgType (35) values.
pub fn msg_type_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "0" => "Heartbeat",
        "1" => "TestRequest",
        "2" => "ResendRequest",
        "3" => "Reject",
        "4" => "SequenceReset",
        "5" => "Logout",
        "8" => "ExecutionReport",
        "9" => "OrderCancelReject",
        "A" => "Logon",
        "D" => "NewOrderSingle",
        "F" => "OrderCancelRequest",
        "G" => "OrderCancelReplaceRequest",
        "H" => "OrderStatusRequest",
        "V" => "MarketDataRequest",
        "W" => "MarketDataSnapshotFullRefresh",
        "X" => "MarketDataIncrementalRefresh",
        "j" => "BusinessMessageReject",
        _ => return None,
    };
    Some(name)
}

/// Decodes one payload.
///
/// Undecodable bytes are replaced rather than failing the payload. Fields without
/// `=` are ignored; the value keeps everything after the first `=`. Returns
/// `Ok(None)` when the payload has no SOH at all or no field carries a tag/value pair.
pub fn decode(payload: &[u8]) -> Result<Option<FixMessage>, DecodeError> {
    if !payload.contains(&(SOH as u8)) {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(payload);
    let mut message = FixMessage::default();

    for (position, field) in text.split(SOH).enumerate() {
        let Some((tag, value)) = field.split_once('=') else {
            continue;
        };
        if tag.is_empty() {
            return Err(DecodeError::EmptyTag { position });
        }
        message.insert(tag, value);
    }

    Ok(if message.is_empty() { None } else { Some(message) })
}

/// Report form of a decode attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedPayload {
    Message(FixMessage),
    Error { error: String },
    NotTagValue,
}

impl DecodedPayload {
    pub fn message(&self) -> Option<&FixMessage> {
        match self {
            DecodedPayload::Message(message) => Some(message),
            _ => None,
        }
    }
}

pub fn decode_payload(payload: &[u8]) -> DecodedPayload {
    match decode(payload) {
        Ok(Some(message)) => DecodedPayload::Message(message),
        Ok(None) => DecodedPayload::NotTagValue,
        Err(e) => {
            log::debug!("Payload decode failed: {e}");
            DecodedPayload::Error { error: e.to_string() }
        }
    }
}

/// Decodes every non-empty payload in parallel. The result follows packet order.
pub fn decode_all(packets: &[PacketRecord]) -> Vec<DecodedPayload> {
    log::info!("Decoding tag/value payloads.");
    packets
        .par_iter()
        .filter(|packet| !packet.raw_payload.is_empty())
        .map(|packet| decode_payload(&packet.raw_payload))
        .collect()
}
