use thiserror::Error;
use super::containers::{Anomaly, PacketRecord, RecordError};
use super::fix::{self, DecodedPayload};
use super::latency::{self, FlowLatency};
use super::report::{self, AnalysisReport};
use super::{scan, utils};
use crate::explain::ExplainPool;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid packet record: {0}")]
    InvalidRecord(#[from] RecordError),
}

/// Everything derived from the packets before explanations are attached.
#[derive(Debug)]
pub struct Findings<'a> {
    pub anomalies: Vec<Anomaly<'a>>,
    pub latencies: Vec<FlowLatency>,
    pub fix_messages: Vec<DecodedPayload>,
}

/// Runs the CPU-bound passes: correlation, then anomaly scan and latency
/// estimation side by side, then payload decoding.
///
/// Fails on the first record breaking the input contract.
pub fn inspect(packets: &[PacketRecord]) -> Result<Findings<'_>, AnalysisError> {
    log::info!("Starting analysis of {} packets.", packets.len());

    for (index, packet) in packets.iter().enumerate() {
        packet.validate(index)?;
    }

    let flows = utils::correlate(packets);
    let (anomalies, latencies) = rayon::join(|| scan::scan_flows(&flows), || latency::estimate_all(&flows));
    let fix_messages = fix::decode_all(packets);

    log::info!(
        "Found {} anomalies, {} latency estimates, {} payloads.",
        anomalies.len(),
        latencies.len(),
        fix_messages.len()
    );

    Ok(Findings {
        anomalies,
        latencies,
        fix_messages,
    })
}

/// Full analysis run. Per-flow state never outlives this call.
pub async fn analyse(packets: &[PacketRecord], pool: Option<&ExplainPool>) -> Result<AnalysisReport, AnalysisError> {
    let findings = inspect(packets)?;

    Ok(report::assemble(
        packets.len(),
        &findings.anomalies,
        findings.latencies,
        findings.fix_messages,
        pool,
    )
    .await)
}
