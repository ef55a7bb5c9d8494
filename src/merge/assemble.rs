use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{BYTES_PER_KB, DEFAULT_IO_BUFFER_SIZE_KB, OUTPUT_BUFFER_SIZE_KB};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssembleStats {
    pub parts: usize,
    pub lines_written: usize,
    pub header_lines_skipped: usize,
}

/// Concatenate result parts in order, keeping the first `header_lines` lines
/// of the first part and dropping that many lines from every later part.
pub fn assemble_files(parts: &[PathBuf], output: &Path, header_lines: usize) -> Result<AssembleStats> {
    if parts.is_empty() {
        return Err(anyhow::anyhow!("No result parts to assemble"));
    }
    if let Some(missing) = parts.iter().find(|p| !p.is_file()) {
        return Err(anyhow::anyhow!("Result part not found: {}", missing.display()));
    }

    info!("Assembling {} result parts into {}", parts.len(), output.display());

    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE_KB * BYTES_PER_KB, file);
    let mut stats = AssembleStats {
        parts: parts.len(),
        ..Default::default()
    };

    for (position, part) in parts.iter().enumerate() {
        let reader = BufReader::with_capacity(
            DEFAULT_IO_BUFFER_SIZE_KB * BYTES_PER_KB,
            File::open(part).with_context(|| format!("Failed to open {}", part.display()))?,
        );
        let skip = if position == 0 { 0 } else { header_lines };
        let mut part_lines = 0;

        for (line_index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", part.display()))?;
            if line_index < skip {
                stats.header_lines_skipped += 1;
                continue;
            }
            // lines() drops the final newline, so every part ends cleanly
            writeln!(writer, "{}", line)?;
            part_lines += 1;
        }

        debug!("Appended {} lines from {}", part_lines, part.display());
        stats.lines_written += part_lines;
    }

    writer.flush()?;
    Ok(stats)
}
