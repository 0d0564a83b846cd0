//! Contains utilities that turn captures into [PacketRecord]s and group them into flows.
use rtshark::{Layer, Packet};
use std::collections::HashMap;
use std::path::Path;
use std::{fs, io};
use thiserror::Error;
use super::containers::{Flow, FlowKey, PacketRecord, RecordDraft, RecordError, TcpFlags};

/// Default tshark display filter, only TCP segments carry what the analysis needs.
pub const DEFAULT_FILTER: &str = "tcp";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to spawn tshark: {0}")]
    Spawn(#[source] io::Error),
    #[error("capture read failed after {read} packets: {source}")]
    Truncated { read: usize, source: io::Error },
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("failed to parse packet records: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Groups packets by their exact [FlowKey].
///
/// Flows come out in order of first appearance and keep arrival order internally,
/// each packet paired with its position in `packets`.
pub fn correlate(packets: &[PacketRecord]) -> Vec<Flow<'_>> {
    log::info!("Correlating {} packets into flows.", packets.len());
    let mut flows: Vec<Flow> = Vec::new();
    let mut by_key: HashMap<FlowKey, usize> = HashMap::new();

    for (index, packet) in packets.iter().enumerate() {
        let key = FlowKey::of(packet);
        let slot = *by_key.entry(key.clone()).or_insert_with(|| {
            flows.push(Flow { key, packets: Vec::new() });
            flows.len() - 1
        });
        flows[slot].packets.push((index, packet));
    }

    log::debug!("Found {} flows.", flows.len());
    flows
}

/// Loads a PCAP/PCAPNG file via rtshark and converts every TCP packet into a [PacketRecord].
///
/// Packets that tshark could not describe fully are skipped with a warning.
pub fn load_file(filepath: &str, filter: &str) -> Result<Vec<PacketRecord>, LoadError> {
    log::info!("Loading capture file.");

    let builder = rtshark::RTSharkBuilder::builder()
        .input_path(filepath)
        .display_filter(filter);

    let mut rtshark = builder.spawn().map_err(LoadError::Spawn)?;
    log::info!("Reading from {}", filepath);

    let records = collect_records(|| rtshark.read(), record_from_packet);
    rtshark.kill();

    let records = records?;
    log::info!("Loaded {} TCP packets.", records.len());
    Ok(records)
}

/// Drains a packet source, converting each packet. A read error aborts the load
/// instead of handing back a silently shortened capture.
fn collect_records<P>(
    mut read: impl FnMut() -> io::Result<Option<P>>,
    convert: impl Fn(&P) -> Option<PacketRecord>,
) -> Result<Vec<PacketRecord>, LoadError> {
    let mut records = Vec::new();
    let mut seen = 0usize;
    let mut skipped = 0usize;

    loop {
        let packet = match read() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(source) => {
                log::error!("Error parsing TShark output after {seen} packets: {source}");
                return Err(LoadError::Truncated { read: seen, source });
            }
        };
        seen += 1;
        match convert(&packet) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} packets without a complete IP/TCP description.");
    }
    Ok(records)
}

/// Loads packet records from a JSON array, failing on the first record that
/// misses a mandatory field.
pub fn load_records(path: &Path) -> Result<Vec<PacketRecord>, LoadError> {
    log::info!("Loading packet records from {}", path.display());
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_records(&text)
}

pub fn parse_records(text: &str) -> Result<Vec<PacketRecord>, LoadError> {
    let drafts: Vec<RecordDraft> = serde_json::from_str(text)?;
    let records = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| draft.into_record(index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Peels the ip/ipv6 and tcp layers of an rtshark [Packet] into a [PacketRecord].
pub fn record_from_packet(packet: &Packet) -> Option<PacketRecord> {
    let tcp = packet.layer_name("tcp")?;
    let (src_ip, dst_ip) = match packet.layer_name("ip") {
        Some(ip) => (field(ip, "ip.src")?, field(ip, "ip.dst")?),
        None => {
            let ipv6 = packet.layer_name("ipv6")?;
            (field(ipv6, "ipv6.src")?, field(ipv6, "ipv6.dst")?)
        }
    };

    // Raw numbers are only exported by newer tshark releases.
    let seq = parse_field(tcp, "tcp.seq_raw").or_else(|| parse_field(tcp, "tcp.seq"))?;
    let ack = parse_field(tcp, "tcp.ack_raw")
        .or_else(|| parse_field(tcp, "tcp.ack"))
        .unwrap_or(0);

    let raw_payload = payload_bytes(packet, tcp);
    let payload_len = parse_field(tcp, "tcp.len").unwrap_or(raw_payload.len());

    Some(PacketRecord {
        src_ip,
        src_port: parse_field(tcp, "tcp.srcport")?,
        dst_ip,
        dst_port: parse_field(tcp, "tcp.dstport")?,
        flags: flags_of(tcp),
        seq,
        ack,
        payload_len,
        header_len: parse_field::<u16>(tcp, "tcp.hdr_len").and_then(header_words),
        checksum: field(tcp, "tcp.checksum").and_then(|v| parse_hex_u16(&v)),
        raw_payload,
        timestamp: packet.timestamp_micros().map(|micros| micros as f64 / 1_000_000.0),
    })
}

fn field(layer: &Layer, name: &str) -> Option<String> {
    layer.metadata(name).map(|m| m.value().to_string())
}

fn parse_field<T: std::str::FromStr>(layer: &Layer, name: &str) -> Option<T> {
    layer.metadata(name)?.value().trim().parse::<T>().ok()
}

fn flag_set(layer: &Layer, name: &str) -> bool {
    layer
        .metadata(name)
        .map(|m| matches!(m.value(), "1" | "True" | "true"))
        .unwrap_or(false)
}

fn flags_of(tcp: &Layer) -> TcpFlags {
    let mut flags = TcpFlags::empty();
    for (name, flag) in [
        ("tcp.flags.fin", TcpFlags::FIN),
        ("tcp.flags.syn", TcpFlags::SYN),
        ("tcp.flags.reset", TcpFlags::RST),
        ("tcp.flags.push", TcpFlags::PSH),
        ("tcp.flags.ack", TcpFlags::ACK),
        ("tcp.flags.urg", TcpFlags::URG),
        ("tcp.flags.ece", TcpFlags::ECE),
        ("tcp.flags.cwr", TcpFlags::CWR),
    ] {
        if flag_set(tcp, name) {
            flags.insert(flag);
        }
    }
    flags
}

/// tshark shows payloads as colon separated hex, either on the tcp layer or on a
/// trailing `data` layer when no dissector claimed the bytes.
fn payload_bytes(packet: &Packet, tcp: &Layer) -> Vec<u8> {
    let shown = field(tcp, "tcp.payload")
        .or_else(|| packet.layer_name("data").and_then(|data| field(data, "data.data")));

    match shown {
        Some(text) => parse_hex_bytes(&text).unwrap_or_else(|| {
            log::warn!("Unreadable payload bytes in capture, treating as empty.");
            Vec::new()
        }),
        None => Vec::new(),
    }
}

/// tshark reports the header length in bytes; records carry 32-bit words.
pub fn header_words(bytes: u16) -> Option<u8> {
    u8::try_from(bytes / 4).ok()
}

pub fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect();
    hex::decode(compact).ok()
}

pub fn parse_hex_u16(text: &str) -> Option<u16> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 16).ok()
}
