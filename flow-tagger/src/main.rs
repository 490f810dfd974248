use std::path::PathBuf;
use std::process::exit;

use anyhow::{Result, ensure};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod export;
mod generate;
mod model;
mod pipeline;
mod store;
mod tagger;

use model::Tables;
use store::Aggregates;

#[derive(Parser)]
#[command(name = "flow-tagger")]
#[command(about = "Tag flow-log records by destination port and protocol", long_about = None)]
struct Cli {
    /// Log filter (error, warn, info, debug, trace or an EnvFilter directive)
    #[arg(long, env = "FLOW_TAGGER_LOG", default_value = "info", global = true)]
    log_level: String,
    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load reference tables, tag a flow log and export the counts
    Run(RunCommand),
    /// Write a random flow log and lookup table for exercising `run`
    Generate(GenerateCommand),
}

#[derive(Args)]
struct RunCommand {
    /// Protocol-number reference file (`<id>,<name>` rows)
    #[arg(long, value_name = "PATH", default_value = pipeline::DEFAULT_PROTOCOL_NUMBERS)]
    protocol_numbers: PathBuf,
    /// Lookup table (`<port>,<protocol>,<tag>` rows)
    #[arg(long, value_name = "PATH", default_value = pipeline::DEFAULT_LOOKUP)]
    lookup: PathBuf,
    /// Space-delimited flow log to tag
    #[arg(long, value_name = "PATH", default_value = pipeline::DEFAULT_FLOW_LOG)]
    flow_log: PathBuf,
    /// Directory receiving the two CSV files; created when missing
    #[arg(long, value_name = "DIR", default_value = pipeline::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// File name (without `.csv`) for the tag counts
    #[arg(long, value_name = "NAME", default_value = pipeline::DEFAULT_TAG_COUNTS_NAME)]
    tag_counts_name: String,
    /// File name (without `.csv`) for the port/protocol counts
    #[arg(long, value_name = "NAME", default_value = pipeline::DEFAULT_PORT_PROTOCOL_COUNTS_NAME)]
    port_protocol_counts_name: String,
    /// Also print both tables and the run summary as JSON on stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args)]
struct GenerateCommand {
    /// Flow log to write
    #[arg(long, value_name = "PATH", default_value = generate::DEFAULT_GENERATED_FLOW_LOG)]
    flow_log: PathBuf,
    /// Number of flow-log records
    #[arg(long, value_name = "COUNT", default_value_t = generate::DEFAULT_FLOW_LOG_RECORDS)]
    records: usize,
    /// Lookup table to write
    #[arg(long, value_name = "PATH", default_value = generate::DEFAULT_GENERATED_LOOKUP)]
    lookup: PathBuf,
    /// Number of distinct lookup rows
    #[arg(long, value_name = "COUNT", default_value_t = generate::DEFAULT_LOOKUP_ENTRIES)]
    entries: usize,
    /// Seed for reproducible output
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("flow-tagger error: {err:?}");
        exit(1);
    }
}

fn init_logging(level: &str, verbose: u8) {
    let directive = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Run(cmd)) => {
            ensure!(
                !cmd.tag_counts_name.is_empty() && !cmd.port_protocol_counts_name.is_empty(),
                "output names must not be empty"
            );
            let opts = pipeline::RunOptions {
                protocol_numbers: cmd.protocol_numbers,
                lookup: cmd.lookup,
                flow_log: cmd.flow_log,
                output_dir: cmd.output_dir,
                tag_counts_name: cmd.tag_counts_name,
                port_protocol_counts_name: cmd.port_protocol_counts_name,
            };
            let mut tables = Tables::default();
            let mut aggregates = Aggregates::new();
            let summary = pipeline::run(&opts, &mut tables, &mut aggregates);
            if !summary.is_complete() {
                warn!("run finished with failed stages; see errors above");
            }

            if cmd.json {
                let mut report = aggregates.to_json();
                report["summary"] = serde_json::to_value(&summary)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Some(Commands::Generate(cmd)) => {
            let opts = generate::GenerateOptions {
                flow_log: cmd.flow_log,
                records: cmd.records,
                lookup: cmd.lookup,
                entries: cmd.entries,
                seed: cmd.seed,
            };
            generate::generate(&opts)?;
            println!(
                "Wrote {} flow-log records to {} and {} lookup rows to {}",
                opts.records,
                opts.flow_log.display(),
                opts.entries,
                opts.lookup.display()
            );
        }
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}
