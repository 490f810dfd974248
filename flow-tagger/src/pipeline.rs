use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::export::export_results;
use crate::model::{LineReport, Tables};
use crate::store::{Aggregates, log_snapshot};
use crate::tagger::process_flow_log;

pub const DEFAULT_PROTOCOL_NUMBERS: &str = "input/protocol-numbers.csv";
pub const DEFAULT_LOOKUP: &str = "input/lookup-basic.csv";
pub const DEFAULT_FLOW_LOG: &str = "input/flow-logs-basic.txt";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_TAG_COUNTS_NAME: &str = "tagCounts";
pub const DEFAULT_PORT_PROTOCOL_COUNTS_NAME: &str = "portProtocolCounts";

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub protocol_numbers: PathBuf,
    pub lookup: PathBuf,
    pub flow_log: PathBuf,
    pub output_dir: PathBuf,
    pub tag_counts_name: String,
    pub port_protocol_counts_name: String,
}

/// Per-stage outcome of one run; `None` marks a stage that failed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSummary {
    pub protocol_numbers: Option<LineReport>,
    pub lookup: Option<LineReport>,
    pub flow_log: Option<LineReport>,
    pub tag_counts_file: Option<PathBuf>,
    pub port_protocol_counts_file: Option<PathBuf>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.protocol_numbers.is_some()
            && self.lookup.is_some()
            && self.flow_log.is_some()
            && self.tag_counts_file.is_some()
            && self.port_protocol_counts_file.is_some()
    }
}

/// Run load protocol numbers -> load lookup table -> tag the flow log ->
/// export. A failing stage is logged and the next one runs with whatever
/// state was built so far.
pub fn run(opts: &RunOptions, tables: &mut Tables, aggregates: &mut Aggregates) -> RunSummary {
    let mut summary = RunSummary::default();

    if let Err(err) = ensure_output_dir(opts) {
        error!("{err:#}");
    }

    summary.protocol_numbers = stage(
        "protocol numbers",
        tables.protocols.load(&opts.protocol_numbers),
    );
    summary.lookup = stage("lookup table", tables.lookup.load(&opts.lookup));
    debug!(
        "reference tables: {} protocol numbers, {} lookup keys",
        tables.protocols.len(),
        tables.lookup.len()
    );
    if tables.protocols.is_empty() || tables.lookup.is_empty() {
        warn!("reference tables are empty; every record will be counted as untagged");
    }

    summary.flow_log = stage(
        "flow log",
        process_flow_log(&opts.flow_log, tables, aggregates),
    );
    log_snapshot(aggregates);

    let outcome = export_results(
        &opts.output_dir,
        &opts.tag_counts_name,
        &opts.port_protocol_counts_name,
        aggregates,
    );
    summary.tag_counts_file = written(outcome.tag_counts);
    summary.port_protocol_counts_file = written(outcome.port_protocol_counts);

    summary
}

fn ensure_output_dir(opts: &RunOptions) -> Result<()> {
    let dir = &opts.output_dir;
    if dir.is_dir() {
        debug!("output directory {} already exists", dir.display());
        return Ok(());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    info!("created output directory {}", dir.display());
    Ok(())
}

fn stage(label: &str, result: Result<LineReport>) -> Option<LineReport> {
    match result {
        Ok(report) => {
            info!("{label}: {report}");
            Some(report)
        }
        Err(err) => {
            error!("{label}: {err:#}");
            None
        }
    }
}

fn written(result: Result<PathBuf>) -> Option<PathBuf> {
    match result {
        Ok(path) => {
            info!("wrote {}", path.display());
            Some(path)
        }
        Err(err) => {
            error!("failed to export results: {err:#}");
            None
        }
    }
}
