use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::store::Aggregates;

pub const TAG_COUNTS_HEADER: &str = "Tag,Count";
pub const PORT_PROTOCOL_COUNTS_HEADER: &str = "Port_Protocol,Count";
const CSV_EXTENSION: &str = "csv";

/// Result of writing each output file. The two files are written
/// independently; one failing leaves the other on disk.
pub struct ExportOutcome {
    pub tag_counts: Result<PathBuf>,
    pub port_protocol_counts: Result<PathBuf>,
}

pub fn output_path(out_dir: &Path, name: &str) -> PathBuf {
    out_dir.join(format!("{name}.{CSV_EXTENSION}"))
}

pub fn export_results(
    out_dir: &Path,
    tag_counts_name: &str,
    port_protocol_counts_name: &str,
    aggregates: &Aggregates,
) -> ExportOutcome {
    let tag_path = output_path(out_dir, tag_counts_name);
    let tag_counts = write_counts(&tag_path, TAG_COUNTS_HEADER, aggregates.tag_counts())
        .map(|()| tag_path);

    let pair_path = output_path(out_dir, port_protocol_counts_name);
    let port_protocol_counts = write_counts(
        &pair_path,
        PORT_PROTOCOL_COUNTS_HEADER,
        aggregates.port_protocol_counts(),
    )
    .map(|()| pair_path);

    ExportOutcome {
        tag_counts,
        port_protocol_counts,
    }
}

fn write_counts<'a, K, I>(path: &Path, header: &str, rows: I) -> Result<()>
where
    K: Display + 'a,
    I: IntoIterator<Item = (&'a K, &'a u64)>,
{
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{header}").with_context(|| format!("failed to write {}", path.display()))?;
    for (key, count) in rows {
        writeln!(writer, "{key},{count}")
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
