use crate::analyser::containers::AnomalyKind;
use crate::analyser::report::AnalysisReport;
use ansi_term::Colour;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::{fs, io, path::Path};

/// Number of anomalies listed individually in the terminal summary.
const LISTED_ANOMALIES: usize = 10;

pub fn print_results(report: &AnalysisReport) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    print_summary(report);
    print_latencies(report);
    print_anomalies(report);
}

pub fn print_summary(report: &AnalysisReport) {
    println!("\u{2503}");
    println!("\u{2503} Total packets    : {}", Colour::Red.paint(report.total_packets.to_string()));
    for kind in AnomalyKind::ALL {
        let count = report.count(kind);
        if count > 0 {
            println!("\u{2503} {:<33}: {}", kind.label(), Colour::Fixed(226).paint(count.to_string()));
        }
    }
    println!(
        "\u{2503} Tag/value msgs   : {} of {} payloads",
        Colour::Fixed(226).paint(report.decoded_messages().to_string()),
        report.fix_messages.len()
    );

    let mut types: BTreeMap<&str, usize> = BTreeMap::new();
    let mut fix = 0usize;
    for message in report.fix_messages.iter().filter_map(|m| m.message()) {
        if message.is_fix() {
            fix += 1;
        }
        if let Some(code) = message.msg_type() {
            *types.entry(message.msg_type_name().unwrap_or(code)).or_insert(0) += 1;
        }
    }
    if fix > 0 {
        println!("\u{2503} With BeginString: {}", Colour::Fixed(226).paint(fix.to_string()));
    }
    for (name, count) in types {
        println!("\u{2503}   {:<31}: {}", name, count);
    }
    println!("\u{2503} ");
}

pub fn print_latencies(report: &AnalysisReport) {
    let spans: Vec<f64> = report.latencies.iter().map(|l| l.latency_ms).collect();
    if spans.is_empty() {
        return;
    }

    let min = spans.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = spans.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = spans.iter().sum::<f64>() / spans.len() as f64;

    println!("\u{2503} Flow spans (first to last packet, not round trips)");
    println!("\u{2503}   min {:.2} ms, avg {:.2} ms, max {:.2} ms", min, avg, max);
    for latency in &report.latencies {
        println!("\u{2503}   {:<48} {:>10.2} ms", latency.session.to_string(), latency.latency_ms);
    }
    println!("\u{2503} ");
}

pub fn print_anomalies(report: &AnalysisReport) {
    for entry in report.errors.iter().take(LISTED_ANOMALIES) {
        let seen = entry
            .details
            .timestamp
            .and_then(capture_time)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "\u{2503} #{:<6} {} seq={} [{}] {}",
            entry.packet_index,
            Colour::Red.paint(entry.category.label()),
            entry.details.seq,
            entry.details.flags,
            seen
        );
        if let Some(explanation) = &entry.explanation {
            println!("\u{2503}         {}", Colour::Fixed(245).paint(explanation.as_str()));
        }
    }
    if report.errors.len() > LISTED_ANOMALIES {
        println!("\u{2503} ... {} more, use -j for the full report", report.errors.len() - LISTED_ANOMALIES);
    }
    println!("\u{2517}");
}

/// Capture timestamps are seconds since the epoch.
pub fn capture_time(seconds: f64) -> Option<DateTime<Utc>> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}

pub fn data_as_json(report: &AnalysisReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn data_to_file(json: &str, path: &Path) -> io::Result<()> {
    fs::write(path, json)?;
    log::info!("Report saved to {}", path.display());
    Ok(())
}
