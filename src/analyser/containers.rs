use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

/// Active TCP control flags of a segment.
///
/// Renders and parses the single-letter notation used by most capture tooling,
/// e.g. `"FA"` for FIN+ACK. Unknown letters are ignored when parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);
    pub const ECE: TcpFlags = TcpFlags(0x40);
    pub const CWR: TcpFlags = TcpFlags(0x80);

    const LETTERS: [(char, TcpFlags); 8] = [
        ('F', TcpFlags::FIN),
        ('S', TcpFlags::SYN),
        ('R', TcpFlags::RST),
        ('P', TcpFlags::PSH),
        ('A', TcpFlags::ACK),
        ('U', TcpFlags::URG),
        ('E', TcpFlags::ECE),
        ('C', TcpFlags::CWR),
    ];

    pub fn empty() -> Self {
        TcpFlags(0)
    }

    pub fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TcpFlags) {
        self.0 |= other.0;
    }

    pub fn from_letters(letters: &str) -> Self {
        let mut flags = TcpFlags::empty();
        for c in letters.chars() {
            if let Some((_, flag)) = Self::LETTERS.iter().find(|(l, _)| *l == c.to_ascii_uppercase()) {
                flags.insert(*flag);
            }
        }
        flags
    }

    pub fn letters(self) -> String {
        Self::LETTERS
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(l, _)| *l)
            .collect()
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl From<String> for TcpFlags {
    fn from(letters: String) -> Self {
        TcpFlags::from_letters(&letters)
    }
}

impl From<TcpFlags> for String {
    fn from(flags: TcpFlags) -> Self {
        flags.letters()
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.letters())
    }
}

/// Byte buffers travel as hex text wherever records are serialized.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record {index}: missing mandatory field `{field}`")]
    MissingField { index: usize, field: &'static str },
}

/// One observed TCP segment, as handed over by the capture layer.
///
/// Never mutated once produced; every analysis pass borrows it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
    pub payload_len: usize,
    /// Data offset in 32-bit words.
    pub header_len: Option<u8>,
    pub checksum: Option<u16>,
    #[serde(with = "hex_bytes")]
    pub raw_payload: Vec<u8>,
    /// Capture time in seconds since the epoch.
    pub timestamp: Option<f64>,
}

impl PacketRecord {
    /// Checks the fields every analysis pass relies on. `index` is the
    /// record's position in the run, used for the diagnostic.
    pub fn validate(&self, index: usize) -> Result<(), RecordError> {
        if self.src_ip.trim().is_empty() {
            return Err(RecordError::MissingField { index, field: "src_ip" });
        }
        if self.dst_ip.trim().is_empty() {
            return Err(RecordError::MissingField { index, field: "dst_ip" });
        }
        Ok(())
    }
}

/// A packet record as it may appear on disk, before mandatory fields are checked.
#[derive(Debug, Default, Deserialize)]
pub struct RecordDraft {
    pub src_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dst_ip: Option<String>,
    pub dst_port: Option<u16>,
    #[serde(default)]
    pub flags: TcpFlags,
    pub seq: Option<u32>,
    #[serde(default)]
    pub ack: u32,
    pub payload_len: Option<usize>,
    pub header_len: Option<u8>,
    pub checksum: Option<u16>,
    #[serde(default, with = "hex_bytes")]
    pub raw_payload: Vec<u8>,
    pub timestamp: Option<f64>,
}

impl RecordDraft {
    pub fn into_record(self, index: usize) -> Result<PacketRecord, RecordError> {
        let missing = |field| RecordError::MissingField { index, field };

        let record = PacketRecord {
            src_ip: self.src_ip.ok_or_else(|| missing("src_ip"))?,
            src_port: self.src_port.ok_or_else(|| missing("src_port"))?,
            dst_ip: self.dst_ip.ok_or_else(|| missing("dst_ip"))?,
            dst_port: self.dst_port.ok_or_else(|| missing("dst_port"))?,
            flags: self.flags,
            seq: self.seq.ok_or_else(|| missing("seq"))?,
            ack: self.ack,
            payload_len: self.payload_len.unwrap_or(self.raw_payload.len()),
            header_len: self.header_len,
            checksum: self.checksum,
            raw_payload: self.raw_payload,
            timestamp: self.timestamp,
        };
        record.validate(index)?;
        Ok(record)
    }
}

/// Exact (source address, source port, destination address, destination port).
///
/// Direction is significant: the reply side of a connection is a different key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey(pub String, pub u16, pub String, pub u16);

impl FlowKey {
    pub fn of(packet: &PacketRecord) -> Self {
        FlowKey(
            packet.src_ip.clone(),
            packet.src_port,
            packet.dst_ip.clone(),
            packet.dst_port,
        )
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.0, self.1, self.2, self.3)
    }
}

/// The packets of one flow, in arrival order, paired with their position in the run.
#[derive(Clone, Debug)]
pub struct Flow<'a> {
    pub key: FlowKey,
    pub packets: Vec<(usize, &'a PacketRecord)>,
}

// Declaration order is the emission order for anomalies of a single packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyKind {
    #[serde(rename = "TCP Retransmission")]
    Retransmission,
    #[serde(rename = "Bogus TCP Payload")]
    BogusPayload,
    #[serde(rename = "Session Reset")]
    SessionReset,
    #[serde(rename = "Bogus TCP Header Length")]
    BogusHeaderLength,
    #[serde(rename = "Invalid TCP Checksum")]
    InvalidChecksum,
    #[serde(rename = "FIN with Data (Possible Misuse)")]
    FinMisuse,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 6] = [
        AnomalyKind::Retransmission,
        AnomalyKind::BogusPayload,
        AnomalyKind::SessionReset,
        AnomalyKind::BogusHeaderLength,
        AnomalyKind::InvalidChecksum,
        AnomalyKind::FinMisuse,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AnomalyKind::Retransmission => "TCP Retransmission",
            AnomalyKind::BogusPayload => "Bogus TCP Payload",
            AnomalyKind::SessionReset => "Session Reset",
            AnomalyKind::BogusHeaderLength => "Bogus TCP Header Length",
            AnomalyKind::InvalidChecksum => "Invalid TCP Checksum",
            AnomalyKind::FinMisuse => "FIN with Data (Possible Misuse)",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A classification applied to one packet of the run.
#[derive(Clone, Debug)]
pub struct Anomaly<'a> {
    pub kind: AnomalyKind,
    pub index: usize,
    pub packet: &'a PacketRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_letters() {
        let flags = TcpFlags::from_letters("fa");
        assert!(flags.contains(TcpFlags::FIN));
        assert!(flags.contains(TcpFlags::ACK));
        assert!(!flags.contains(TcpFlags::RST));
        assert_eq!(flags.letters(), "FA");
        assert_eq!(TcpFlags::from_letters("XZ"), TcpFlags::empty());
        assert_eq!((TcpFlags::SYN | TcpFlags::ACK).to_string(), "SA");
    }

    #[test]
    fn test_record_serializes_payload_as_hex() {
        let record = PacketRecord {
            src_ip: "10.0.0.1".to_string(),
            src_port: 4000,
            dst_ip: "10.0.0.2".to_string(),
            dst_port: 9876,
            flags: TcpFlags::PSH | TcpFlags::ACK,
            seq: 1,
            ack: 2,
            payload_len: 3,
            header_len: Some(5),
            checksum: Some(0xbeef),
            raw_payload: b"8=F".to_vec(),
            timestamp: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["raw_payload"], "383d46");
        assert_eq!(json["flags"], "PA");

        let back: PacketRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_draft_reports_missing_field() {
        let draft: RecordDraft = serde_json::from_str(
            r#"{"src_ip": "1.1.1.1", "src_port": 1, "dst_ip": "2.2.2.2", "dst_port": 2}"#,
        )
        .unwrap();

        assert_eq!(
            draft.into_record(7),
            Err(RecordError::MissingField { index: 7, field: "seq" })
        );
    }

    #[test]
    fn test_draft_defaults_payload_len_to_payload_size() {
        let draft: RecordDraft = serde_json::from_str(
            r#"{"src_ip": "1.1.1.1", "src_port": 1, "dst_ip": "2.2.2.2", "dst_port": 2,
                "seq": 10, "flags": "PA", "raw_payload": "3335"}"#,
        )
        .unwrap();

        let record = draft.into_record(0).unwrap();
        assert_eq!(record.payload_len, 2);
        assert_eq!(record.raw_payload, b"35".to_vec());
        assert_eq!(record.checksum, None);
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let draft = RecordDraft {
            src_ip: Some(" ".to_string()),
            src_port: Some(1),
            dst_ip: Some("2.2.2.2".to_string()),
            dst_port: Some(2),
            seq: Some(0),
            ..Default::default()
        };
        assert_eq!(
            draft.into_record(3),
            Err(RecordError::MissingField { index: 3, field: "src_ip" })
        );
    }

    #[test]
    fn test_flow_key_display_keeps_direction() {
        let key = FlowKey("a".to_string(), 1, "b".to_string(), 2);
        assert_eq!(key.to_string(), "a:1 -> b:2");
        assert_ne!(key, FlowKey("b".to_string(), 2, "a".to_string(), 1));
    }
}
