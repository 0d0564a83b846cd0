//! Assembles the final analysis report and attaches explanations.
use serde::Serialize;
use super::containers::{Anomaly, AnomalyKind, PacketRecord};
use super::fix::DecodedPayload;
use super::latency::FlowLatency;
use crate::explain::ExplainPool;

/// One anomaly as it appears in the report.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorEntry {
    pub category: AnomalyKind,
    pub packet_index: usize,
    /// Snapshot of the originating packet, payload rendered as hex.
    pub details: PacketRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub total_packets: usize,
    pub errors: Vec<ErrorEntry>,
    pub latencies: Vec<FlowLatency>,
    pub fix_messages: Vec<DecodedPayload>,
}

impl AnalysisReport {
    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.errors.iter().filter(|e| e.category == kind).count()
    }

    pub fn decoded_messages(&self) -> usize {
        self.fix_messages.iter().filter(|m| m.message().is_some()).count()
    }
}

/// What the explanation service gets to see about an anomaly.
#[derive(Serialize)]
struct AnomalyContext<'a> {
    category: AnomalyKind,
    details: &'a PacketRecord,
}

pub fn prompt_for(anomaly: &Anomaly) -> String {
    let context = AnomalyContext {
        category: anomaly.kind,
        details: anomaly.packet,
    };
    let json = serde_json::to_string(&context).unwrap_or_else(|_| anomaly.kind.label().to_string());
    format!("Analyze this TCP error: {json}")
}

/// Builds the report. With a pool, every anomaly gets an explanation (real or
/// fallback); without one, explanations stay absent.
pub async fn assemble(
    total_packets: usize,
    anomalies: &[Anomaly<'_>],
    latencies: Vec<FlowLatency>,
    fix_messages: Vec<DecodedPayload>,
    pool: Option<&ExplainPool>,
) -> AnalysisReport {
    let explanations: Vec<Option<String>> = match pool {
        Some(pool) => {
            let prompts = anomalies.iter().map(prompt_for).collect();
            pool.explain_all(prompts).await.into_iter().map(Some).collect()
        }
        None => vec![None; anomalies.len()],
    };

    let errors = anomalies
        .iter()
        .zip(explanations)
        .map(|(anomaly, explanation)| ErrorEntry {
            category: anomaly.kind,
            packet_index: anomaly.index,
            details: anomaly.packet.clone(),
            explanation,
        })
        .collect();

    log::info!("Report assembled.");
    AnalysisReport {
        total_packets,
        errors,
        latencies,
        fix_messages,
    }
}
