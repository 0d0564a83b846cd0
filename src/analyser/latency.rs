//! Coarse per-flow timing.
//!
//! The estimate is the span between the first and last timestamped packet of a
//! flow. It is an upper bound on how long the flow was active, not a paired
//! request/response round trip, and should be presented that way.
use rayon::prelude::*;
use serde::Serialize;
use super::containers::{Flow, FlowKey};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowLatency {
    pub session: FlowKey,
    pub latency_ms: f64,
}

/// Span of a single flow, or `None` when fewer than two of its packets carry a timestamp.
pub fn estimate(flow: &Flow) -> Option<FlowLatency> {
    let mut stamps = flow.packets.iter().filter_map(|(_, packet)| packet.timestamp);
    let first = stamps.next()?;
    let last = stamps.last()?;

    Some(FlowLatency {
        session: flow.key.clone(),
        latency_ms: (last - first) * 1000.0,
    })
}

/// Estimates every flow, keeping flow order.
pub fn estimate_all(flows: &[Flow]) -> Vec<FlowLatency> {
    log::info!("Estimating latency for {} flows.", flows.len());
    flows.par_iter().filter_map(estimate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::containers::{PacketRecord, TcpFlags};
    use crate::analyser::utils::correlate;

    fn packet(src_port: u16, timestamp: Option<f64>) -> PacketRecord {
        PacketRecord {
            src_ip: "10.1.1.1".to_string(),
            src_port,
            dst_ip: "10.1.1.2".to_string(),
            dst_port: 9000,
            flags: TcpFlags::ACK,
            seq: 0,
            ack: 0,
            payload_len: 0,
            header_len: None,
            checksum: None,
            raw_payload: Vec::new(),
            timestamp,
        }
    }

    #[test]
    fn test_span_in_milliseconds() {
        let packets = vec![packet(1, Some(10.0)), packet(1, Some(10.1)), packet(1, Some(10.25))];
        let latencies = estimate_all(&correlate(&packets));

        assert_eq!(latencies.len(), 1);
        assert_eq!(latencies[0].latency_ms, 250.0);
        assert_eq!(latencies[0].session.1, 1);
    }

    #[test]
    fn test_untimed_edges_use_nearest_timestamps() {
        let packets = vec![packet(1, None), packet(1, Some(10.0)), packet(1, Some(10.25)), packet(1, None)];
        let latencies = estimate_all(&correlate(&packets));
        assert_eq!(latencies[0].latency_ms, 250.0);
    }

    #[test]
    fn test_needs_two_timestamps() {
        let packets = vec![
            packet(1, Some(10.0)),
            packet(2, Some(3.0)),
            packet(2, None),
            packet(3, None),
            packet(3, None),
        ];
        assert!(estimate_all(&correlate(&packets)).is_empty());
    }

    #[test]
    fn test_flow_order_is_kept() {
        let packets = vec![
            packet(7, Some(1.0)),
            packet(3, Some(2.0)),
            packet(7, Some(1.5)),
            packet(3, Some(2.25)),
        ];
        let ports: Vec<u16> = estimate_all(&correlate(&packets)).iter().map(|l| l.session.1).collect();
        assert_eq!(ports, vec![7, 3]);
    }
}
