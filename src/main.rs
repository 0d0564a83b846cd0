mod analyser;
mod explain;
mod ui;

use clap::Parser;
use explain::{ExplainConfig, ExplainPool, OllamaExplainer};
use simple_logger::SimpleLogger;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use std::fs;
use thiserror::Error;
use ui::output;

/// tradesniff analyzes captured trading traffic for TCP anomalies, FIX messages and flow timing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap/pcapng file to analyze
    #[arg(short = 'f', long, value_parser, required_unless_present = "records", conflicts_with = "records")]
    file: Option<String>,

    /// JSON file of already normalized packet records, instead of a capture
    #[arg(short = 'r', long, value_parser)]
    records: Option<PathBuf>,

    /// tshark display filter applied when reading a capture
    #[arg(short = 'd', long, default_value = analyser::utils::DEFAULT_FILTER, value_parser)]
    filter: String,

    /// Directory to write the JSON report to
    #[arg(short = 'o', long, value_parser)]
    output_dir: Option<PathBuf>,

    /// Display output as formatted JSON
    #[arg(short = 'j', long)]
    json: bool,

    /// Skip explanation generation
    #[arg(long)]
    no_explain: bool,

    /// Base URL of the Ollama server
    #[arg(long, default_value = explain::DEFAULT_URL, value_parser)]
    ollama_url: String,

    /// Model used for explanations
    #[arg(long, default_value = explain::DEFAULT_MODEL, value_parser)]
    model: String,

    /// Timeout per explanation request, in seconds
    #[arg(long, default_value_t = explain::DEFAULT_TIMEOUT_SECS, value_parser)]
    timeout: u64,

    /// Explanation requests in flight at once
    #[arg(short = 'w', long, default_value_t = explain::DEFAULT_WORKERS, value_parser)]
    workers: usize,

    /// Threads for the analysis passes, 0 lets rayon decide
    #[arg(short = 't', long, default_value_t = 0, value_parser)]
    threads: usize,
}

impl Args {
    fn explain_config(&self) -> ExplainConfig {
        ExplainConfig {
            url: self.ollama_url.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout),
            workers: self.workers,
        }
    }

    /// Name the report after its input.
    fn report_name(&self) -> String {
        let input = self
            .file
            .as_deref()
            .map(Path::new)
            .or(self.records.as_deref())
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());
        format!("{input}.json")
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Load(#[from] analyser::utils::LoadError),
    #[error(transparent)]
    Analysis(#[from] analyser::core::AnalysisError),
    #[error(transparent)]
    Explain(#[from] explain::ExplainError),
    #[error("failed to configure thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to render report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = SimpleLogger::new().with_level(log::LevelFilter::Info).env().init() {
        eprintln!("Failed to initialise logging: {e}");
    }

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global()?;
    }

    if let Some(out_dir) = args.output_dir.as_deref() {
        log::info!("Output directory {}", out_dir.display());
        fs::create_dir_all(out_dir)?;
    } else {
        log::warn!("No output directory specified.");
    }

    let packets = match (&args.file, &args.records) {
        (Some(file), _) => analyser::utils::load_file(file, &args.filter)?,
        (None, Some(records)) => analyser::utils::load_records(records)?,
        (None, None) => Vec::new(),
    };

    let pool = if args.no_explain {
        log::info!("Explanations disabled.");
        None
    } else {
        let config = args.explain_config();
        let explainer = OllamaExplainer::new(&config)?;
        Some(ExplainPool::new(Arc::new(explainer), config.workers, config.timeout))
    };

    let report = analyser::core::analyse(&packets, pool.as_ref()).await?;

    // ---- Output ----
    let json = output::data_as_json(&report)?;
    if let Some(out_dir) = args.output_dir.as_deref() {
        output::data_to_file(&json, &out_dir.join(args.report_name()))?;
    }
    if args.json {
        println!("{json}");
    } else {
        output::print_results(&report);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["tradesniff", "-f", "/tmp/session.pcap"]);
        assert_eq!(args.filter, "tcp");
        assert_eq!(args.report_name(), "session.pcap.json");

        let config = args.explain_config();
        assert_eq!(config.url, "http://localhost:11434");
        assert_eq!(config.model, "phi");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn test_input_is_required() {
        assert!(Args::try_parse_from(["tradesniff"]).is_err());
        assert!(Args::try_parse_from(["tradesniff", "-f", "a.pcap", "-r", "b.json"]).is_err());

        let args = Args::try_parse_from(["tradesniff", "-r", "records.json", "--no-explain", "-w", "8"]).unwrap();
        assert!(args.no_explain);
        assert_eq!(args.workers, 8);
        assert_eq!(args.report_name(), "records.json.json");
    }
}
