//! Per-packet anomaly classification over correlated flows.
use rayon::prelude::*;
use std::collections::HashSet;
use super::containers::{Anomaly, AnomalyKind, Flow, PacketRecord, TcpFlags};

/// Smallest legal TCP data offset, in 32-bit words (20 bytes).
pub const MIN_HEADER_WORDS: u8 = 5;

/// Sequence numbers observed so far on one flow.
///
/// Lives exactly as long as the scan of its flow.
#[derive(Debug, Default)]
pub struct FlowState {
    seen_seqs: HashSet<u32>,
}

impl FlowState {
    pub fn has_seen(&self, seq: u32) -> bool {
        self.seen_seqs.contains(&seq)
    }

    fn record(&mut self, seq: u32) {
        self.seen_seqs.insert(seq);
    }
}

impl AnomalyKind {
    /// Whether this category applies to `packet`, given everything seen earlier on its flow.
    pub fn matches(self, packet: &PacketRecord, state: &FlowState) -> bool {
        match self {
            AnomalyKind::Retransmission => scan_for_retransmission(packet, state),
            AnomalyKind::BogusPayload => scan_for_bogus_payload(packet),
            AnomalyKind::SessionReset => scan_for_session_reset(packet),
            AnomalyKind::BogusHeaderLength => scan_for_bogus_header_length(packet),
            AnomalyKind::InvalidChecksum => scan_for_invalid_checksum(packet),
            AnomalyKind::FinMisuse => scan_for_fin_misuse(packet),
        }
    }
}

pub fn scan_for_retransmission(packet: &PacketRecord, state: &FlowState) -> bool {
    state.has_seen(packet.seq)
}

pub fn scan_for_bogus_payload(packet: &PacketRecord) -> bool {
    packet.payload_len == 0
}

pub fn scan_for_session_reset(packet: &PacketRecord) -> bool {
    packet.flags.contains(TcpFlags::RST)
}

pub fn scan_for_bogus_header_length(packet: &PacketRecord) -> bool {
    matches!(packet.header_len, Some(words) if words < MIN_HEADER_WORDS)
}

/// A missing checksum is as suspicious as a zeroed one.
pub fn scan_for_invalid_checksum(packet: &PacketRecord) -> bool {
    matches!(packet.checksum, None | Some(0))
}

pub fn scan_for_fin_misuse(packet: &PacketRecord) -> bool {
    packet.flags.contains(TcpFlags::FIN) && packet.payload_len > 0
}

/// Classifies a single packet and then records its sequence number on the flow.
pub fn scan_packet<'a>(state: &mut FlowState, index: usize, packet: &'a PacketRecord) -> Vec<Anomaly<'a>> {
    let anomalies = AnomalyKind::ALL
        .iter()
        .filter(|kind| kind.matches(packet, state))
        .map(|kind| Anomaly { kind: *kind, index, packet })
        .collect();

    state.record(packet.seq);
    anomalies
}

/// Scans one flow from a fresh [FlowState], dropped once the flow is exhausted.
pub fn scan_flow<'a>(flow: &Flow<'a>) -> Vec<Anomaly<'a>> {
    let mut state = FlowState::default();
    let anomalies: Vec<Anomaly<'a>> = flow
        .packets
        .iter()
        .flat_map(|(index, packet)| scan_packet(&mut state, *index, *packet))
        .collect();

    log::debug!("Flow {}: {} anomalies over {} packets", flow.key, anomalies.len(), flow.packets.len());
    anomalies
}

/// Scans all flows in parallel and returns anomalies in packet arrival order.
///
/// Anomalies of the same packet keep [AnomalyKind] declaration order.
pub fn scan_flows<'a>(flows: &[Flow<'a>]) -> Vec<Anomaly<'a>> {
    log::info!("Scanning {} flows for anomalies.", flows.len());
    let mut anomalies: Vec<Anomaly<'a>> = flows.par_iter().flat_map_iter(scan_flow).collect();

    // Stable: per-packet category order survives the merge.
    anomalies.sort_by_key(|anomaly| anomaly.index);
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::utils::correlate;

    fn packet(src_port: u16, seq: u32) -> PacketRecord {
        PacketRecord {
            src_ip: "A".to_string(),
            src_port,
            dst_ip: "B".to_string(),
            dst_port: 2,
            flags: TcpFlags::ACK,
            seq,
            ack: 0,
            payload_len: 10,
            header_len: Some(5),
            checksum: Some(0x1234),
            raw_payload: Vec::new(),
            timestamp: None,
        }
    }

    fn kinds(anomalies: &[Anomaly]) -> Vec<AnomalyKind> {
        anomalies.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_clean_packet_has_no_anomalies() {
        let mut state = FlowState::default();
        let p = packet(1, 100);
        assert!(scan_packet(&mut state, 0, &p).is_empty());
    }

    #[test]
    fn test_retransmission_references_repeat() {
        let packets = vec![packet(1, 100), packet(1, 200), packet(1, 100)];
        let flows = correlate(&packets);
        let anomalies = scan_flows(&flows);

        assert_eq!(kinds(&anomalies), vec![AnomalyKind::Retransmission]);
        assert_eq!(anomalies[0].index, 2);
        assert!(std::ptr::eq(anomalies[0].packet, &packets[2]));
    }

    #[test]
    fn test_repeated_seq_flags_every_later_occurrence() {
        let packets = vec![packet(1, 100), packet(1, 100), packet(1, 100)];
        let flows = correlate(&packets);
        let indices: Vec<usize> = scan_flows(&flows).iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_seq_state_is_per_flow() {
        let packets = vec![packet(1, 100), packet(9, 100)];
        let flows = correlate(&packets);
        assert!(scan_flows(&flows).is_empty());
    }

    #[test]
    fn test_fin_and_reset_rules() {
        let mut state = FlowState::default();

        let mut fin_data = packet(1, 1);
        fin_data.flags = TcpFlags::FIN | TcpFlags::ACK;
        assert_eq!(kinds(&scan_packet(&mut state, 0, &fin_data)), vec![AnomalyKind::FinMisuse]);

        let mut fin_empty = packet(1, 2);
        fin_empty.flags = TcpFlags::FIN;
        fin_empty.payload_len = 0;
        assert_eq!(kinds(&scan_packet(&mut state, 1, &fin_empty)), vec![AnomalyKind::BogusPayload]);

        let mut rst_data = packet(1, 3);
        rst_data.flags = TcpFlags::RST;
        assert_eq!(kinds(&scan_packet(&mut state, 2, &rst_data)), vec![AnomalyKind::SessionReset]);

        let mut rst_empty = packet(1, 4);
        rst_empty.flags = TcpFlags::RST;
        rst_empty.payload_len = 0;
        assert_eq!(
            kinds(&scan_packet(&mut state, 3, &rst_empty)),
            vec![AnomalyKind::BogusPayload, AnomalyKind::SessionReset]
        );
    }

    #[test]
    fn test_checksum_absent_and_zero_both_flagged() {
        let mut absent = packet(1, 1);
        absent.checksum = None;
        let mut zero = packet(1, 2);
        zero.checksum = Some(0);

        assert!(scan_for_invalid_checksum(&absent));
        assert!(scan_for_invalid_checksum(&zero));
        assert!(!scan_for_invalid_checksum(&packet(1, 3)));
    }

    #[test]
    fn test_header_length_bounds() {
        let mut short = packet(1, 1);
        short.header_len = Some(4);
        let mut unknown = packet(1, 2);
        unknown.header_len = None;

        assert!(scan_for_bogus_header_length(&short));
        assert!(!scan_for_bogus_header_length(&unknown));
        assert!(!scan_for_bogus_header_length(&packet(1, 3)));
    }

    #[test]
    fn test_all_categories_fire_together_in_order() {
        let mut state = FlowState::default();
        let first = packet(1, 7);
        scan_packet(&mut state, 0, &first);

        let mut worst = packet(1, 7);
        worst.payload_len = 0;
        worst.flags = TcpFlags::RST | TcpFlags::FIN;
        worst.header_len = Some(2);
        worst.checksum = None;

        assert_eq!(
            kinds(&scan_packet(&mut state, 1, &worst)),
            vec![
                AnomalyKind::Retransmission,
                AnomalyKind::BogusPayload,
                AnomalyKind::SessionReset,
                AnomalyKind::BogusHeaderLength,
                AnomalyKind::InvalidChecksum,
            ]
        );
    }

    #[test]
    fn test_output_follows_arrival_order_across_flows() {
        let mut a0 = packet(1, 1);
        a0.payload_len = 0;
        let mut b0 = packet(2, 1);
        b0.checksum = None;
        let mut a1 = packet(1, 2);
        a1.flags = TcpFlags::RST;
        let mut b1 = packet(2, 1);
        b1.payload_len = 0;

        let packets = vec![a0, b0, a1, b1];
        let flows = correlate(&packets);
        let anomalies = scan_flows(&flows);

        let order: Vec<(usize, AnomalyKind)> = anomalies.iter().map(|a| (a.index, a.kind)).collect();
        assert_eq!(
            order,
            vec![
                (0, AnomalyKind::BogusPayload),
                (1, AnomalyKind::InvalidChecksum),
                (2, AnomalyKind::SessionReset),
                (3, AnomalyKind::Retransmission),
                (3, AnomalyKind::BogusPayload),
            ]
        );
    }
}
