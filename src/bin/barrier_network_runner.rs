//! Barrier Network Runner Binary
//!
//! Runs the connectivity engine over a directory of processing units:
//! - Structured JSON logging for batch schedulers
//! - Parallel unit processing with per-unit failure isolation
//! - Per-unit metrics, flat export rows, tier tables and a run report
//!
//! ## Configuration
//!
//! Environment variables:
//! - `INPUT_DIR`: directory holding `units/*.json` (default: .)
//! - `OUTPUT_DIR`: directory for results (default: out)
//! - `POLICY_FILE`: analysis policy JSON (default: built-in policy)
//! - `LABELS_FILE`: domain label JSON (default: built-in labels)
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Output layout
//!
//! ```text
//! OUTPUT_DIR/
//!   metrics/<unit>.json
//!   export/<unit>_<network_type>.json
//!   tiers/<network_type>_<scope>.json
//!   run_report.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use barrier_connectivity::{
    export_unit, AnalysisPolicy, BatchRunner, DomainLabels, PolicyError, TierScope, TierTable,
    TieringEngine, UnitFailure, UnitInput,
};

/// Errors that stop the runner before or after the batch.
#[derive(Debug, thiserror::Error)]
enum RunnerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Policy error in {path}: {source}")]
    Policy {
        path: PathBuf,
        source: PolicyError,
    },
}

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "barrier_network_runner=info,barrier_connectivity=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

fn read_text(path: &Path) -> Result<String, RunnerError> {
    fs::read_to_string(path).map_err(|source| RunnerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RunnerError> {
    serde_json::from_str(&read_text(path)?).map_err(|source| RunnerError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RunnerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RunnerError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|source| RunnerError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| RunnerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Unit files in name order.
fn unit_files(dir: &Path) -> Result<Vec<PathBuf>, RunnerError> {
    let entries = fs::read_dir(dir).map_err(|source| RunnerError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn load_policy() -> Result<AnalysisPolicy, RunnerError> {
    match std::env::var("POLICY_FILE") {
        Ok(path) => {
            let path = PathBuf::from(path);
            AnalysisPolicy::from_json(&read_text(&path)?)
                .map_err(|source| RunnerError::Policy { path, source })
        }
        Err(_) => Ok(AnalysisPolicy::default()),
    }
}

/// Read one unit file; a failure becomes a report entry named after the file.
fn load_unit(path: &Path) -> Result<UnitInput, UnitFailure> {
    read_json::<UnitInput>(path).map_err(|e| {
        warn!(error = %e, "Unit file could not be loaded");
        UnitFailure {
            unit_id: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            error: e.to_string(),
        }
    })
}

fn load_labels() -> Result<DomainLabels, RunnerError> {
    match std::env::var("LABELS_FILE") {
        Ok(path) => read_json(Path::new(&path)),
        Err(_) => Ok(DomainLabels::default()),
    }
}

fn main() -> Result<(), RunnerError> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");
    info!(version = version, build_sha = build_sha, "Starting barrier network runner");

    let input_dir = PathBuf::from(std::env::var("INPUT_DIR").unwrap_or_else(|_| ".".to_string()));
    let output_dir = PathBuf::from(std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "out".to_string()));

    let policy = load_policy()?;
    let labels = load_labels()?;
    info!(
        policy_id = policy.policy_id(),
        policy_params_hash = %policy.params_hash(),
        network_types = ?policy.network_types,
        "Policy loaded"
    );

    let load_start = Instant::now();
    let loaded: Vec<Result<UnitInput, UnitFailure>> = unit_files(&input_dir.join("units"))?
        .iter()
        .map(|path| load_unit(path))
        .collect();
    info!(
        units = loaded.iter().filter(|u| u.is_ok()).count(),
        unreadable = loaded.iter().filter(|u| u.is_err()).count(),
        latency_ms = load_start.elapsed().as_millis() as u64,
        "Units loaded"
    );

    let run_start = Instant::now();
    let runner = BatchRunner::new(policy);
    let result = runner.run_loaded(loaded);
    info!(
        latency_ms = run_start.elapsed().as_millis() as u64,
        "Batch complete"
    );

    let tier_count = runner.policy().tier_count;
    for &network_type in &runner.policy().network_types {
        let inputs = result.tiering_inputs(network_type);
        let global: TierTable = TieringEngine::new(tier_count, TierScope::Global).run(&inputs);
        let by_state = TieringEngine::new(tier_count, TierScope::ByState).run(&inputs);

        write_json(&output_dir.join("tiers").join(format!("{network_type}_global.json")), &global)?;
        write_json(&output_dir.join("tiers").join(format!("{network_type}_by_state.json")), &by_state)?;

        for output in &result.outputs {
            let rows = export_unit(output, network_type, Some(&global), &labels);
            let name = format!("{}_{network_type}.json", output.unit_id);
            write_json(&output_dir.join("export").join(name), &rows)?;
        }
    }

    for output in &result.outputs {
        write_json(&output_dir.join("metrics").join(format!("{}.json", output.unit_id)), output)?;
    }
    write_json(&output_dir.join("run_report.json"), &result.report)?;

    info!(
        run_id = %result.report.run_id,
        completed = result.report.completed_units.len(),
        failed = result.report.failed_units.len(),
        events = ?result.report.totals(),
        "Barrier network runner finished"
    );

    Ok(())
}
