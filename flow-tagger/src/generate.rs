use std::{
    collections::HashSet,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

pub const DEFAULT_FLOW_LOG_RECORDS: usize = 88_880;
pub const DEFAULT_LOOKUP_ENTRIES: usize = 99_999;
pub const DEFAULT_GENERATED_FLOW_LOG: &str = "input/flow-logs-large.txt";
pub const DEFAULT_GENERATED_LOOKUP: &str = "input/lookup-large.csv";

const PROTOCOLS: [&str; 8] = ["tcp", "udp", "icmp", "http", "https", "ftp", "smtp", "dns"];
const TAGS: [&str; 8] = [
    "sv_P1", "sv_P2", "sv_P3", "sv_P4", "sv_P5", "email", "sv_P6", "sv_P7",
];
const MIN_PORT: u32 = 1;
const MAX_PORT: u32 = 65_535;
const BASE_START_TIME: u64 = 1_620_140_761;

#[derive(Clone, Debug)]
pub struct GenerateOptions {
    pub flow_log: PathBuf,
    pub records: usize,
    pub lookup: PathBuf,
    pub entries: usize,
    pub seed: Option<u64>,
}

pub fn generate(opts: &GenerateOptions) -> Result<()> {
    ensure!(
        opts.entries as u64 <= max_lookup_entries(),
        "at most {} distinct lookup entries can be generated",
        max_lookup_entries()
    );

    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    write_lines(&opts.flow_log, "flow log", |out| {
        write_flow_log(out, opts.records, &mut rng)
    })?;
    write_lines(&opts.lookup, "lookup table", |out| {
        write_lookup_table(out, opts.entries, &mut rng)
    })?;
    Ok(())
}

fn max_lookup_entries() -> u64 {
    (MAX_PORT - MIN_PORT + 1) as u64 * PROTOCOLS.len() as u64 * TAGS.len() as u64
}

fn write_lines<F>(path: &Path, label: &str, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create {label} at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer).with_context(|| format!("failed to write {label} at {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {label} at {}", path.display()))
}

fn write_flow_log<W: Write, R: Rng>(
    out: &mut W,
    records: usize,
    rng: &mut R,
) -> std::io::Result<()> {
    for i in 0..records {
        let start = BASE_START_TIME + rng.gen_range(0..10_000);
        let end = start + rng.gen_range(0..100);
        let action = if rng.gen_bool(0.5) { "ACCEPT" } else { "REJECT" };
        let dst_port = rng.gen_range(MIN_PORT..=MAX_PORT);
        let protocol: u8 = rng.r#gen();
        let octet = i % 255;
        writeln!(
            out,
            "2 123456789012 eni-{i} 10.0.1.{octet} 198.51.100.{octet} 443 {dst_port} {protocol} 25 20000 {start} {end} {action} OK"
        )?;
    }
    Ok(())
}

fn write_lookup_table<W: Write, R: Rng>(
    out: &mut W,
    entries: usize,
    rng: &mut R,
) -> std::io::Result<()> {
    let mut seen: HashSet<(u32, &str, &str)> = HashSet::with_capacity(entries);
    while seen.len() < entries {
        let port = rng.gen_range(MIN_PORT..=MAX_PORT);
        let protocol = *PROTOCOLS.choose(rng).unwrap_or(&PROTOCOLS[0]);

        // Reroll the tag until the row is new; a pair with every tag used
        // already falls through and a fresh pair is drawn.
        let mut tags = TAGS;
        tags.shuffle(rng);
        let Some(tag) = tags
            .into_iter()
            .find(|tag| !seen.contains(&(port, protocol, *tag)))
        else {
            continue;
        };

        seen.insert((port, protocol, tag));
        writeln!(out, "{port},{protocol},{tag}")?;
    }
    Ok(())
}
