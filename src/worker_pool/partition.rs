use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{BYTES_PER_KB, DEFAULT_IO_BUFFER_SIZE_KB, PART_FILE_INFIX};

/// Result of splitting one input file into contiguous parts.
#[derive(Debug, Clone)]
pub struct Partitioning {
    pub parts: Vec<PathBuf>,
    pub records: usize,
    pub preamble_lines: usize,
}

/// Split `input` into at most `parts` files of contiguous records.
///
/// A record starts at every line whose trimmed text begins with `marker`
/// (`BEGIN IONS` for MGF spectra). Lines before the first record are copied
/// to the top of every part. Part sizes differ by at most one record; when
/// there are fewer records than requested parts, one part per record is
/// written.
pub fn split_into_partitions(
    input: &Path,
    marker: &str,
    parts: usize,
    out_dir: &Path,
) -> Result<Partitioning> {
    if parts == 0 {
        return Err(anyhow::anyhow!("Partition count must be at least 1"));
    }

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create partition directory {}", out_dir.display()))?;

    let (records, preamble) = scan_records(input, marker)?;
    if records == 0 {
        return Err(anyhow::anyhow!(
            "No records starting with '{}' found in {}",
            marker,
            input.display()
        ));
    }

    let part_count = parts.min(records);
    let sizes = partition_sizes(records, part_count);

    let file = File::open(input)?;
    let reader = BufReader::with_capacity(DEFAULT_IO_BUFFER_SIZE_KB * BYTES_PER_KB, file);

    let mut part_paths: Vec<PathBuf> = Vec::with_capacity(part_count);
    let mut writer: Option<BufWriter<File>> = None;
    let mut remaining_in_part = 0usize;
    let mut in_records = false;

    for line in reader.lines() {
        let line = line?;

        if is_record_start(&line, marker) {
            if remaining_in_part == 0 {
                if let Some(mut finished) = writer.take() {
                    finished.flush()?;
                }

                let path = part_path(input, out_dir, part_paths.len() + 1);
                let mut next = BufWriter::new(File::create(&path)?);
                for preamble_line in &preamble {
                    writeln!(next, "{}", preamble_line)?;
                }

                remaining_in_part = sizes[part_paths.len()];
                debug!("Writing {} records to {}", remaining_in_part, path.display());
                part_paths.push(path);
                writer = Some(next);
            }
            remaining_in_part -= 1;
            in_records = true;
        }

        if !in_records {
            continue;
        }

        if let Some(out) = writer.as_mut() {
            writeln!(out, "{}", line)?;
        }
    }

    if let Some(mut finished) = writer.take() {
        finished.flush()?;
    }

    info!(
        "Split {} into {} parts ({} records)",
        input.display(),
        part_paths.len(),
        records
    );

    Ok(Partitioning {
        parts: part_paths,
        records,
        preamble_lines: preamble.len(),
    })
}

fn scan_records(input: &Path, marker: &str) -> Result<(usize, Vec<String>)> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open input file {}", input.display()))?;
    let reader = BufReader::with_capacity(DEFAULT_IO_BUFFER_SIZE_KB * BYTES_PER_KB, file);

    let mut records = 0;
    let mut preamble = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if is_record_start(&line, marker) {
            records += 1;
        } else if records == 0 {
            preamble.push(line);
        }
    }

    Ok((records, preamble))
}

fn is_record_start(line: &str, marker: &str) -> bool {
    line.trim_start().starts_with(marker)
}

/// Sizes of `parts` contiguous groups covering `records`; the first
/// `records % parts` groups take one extra record.
pub fn partition_sizes(records: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let base = records / parts;
    let extra = records % parts;
    (0..parts).map(|i| base + usize::from(i < extra)).collect()
}

fn part_path(input: &Path, out_dir: &Path, index: usize) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());

    let name = match input.extension() {
        Some(ext) => format!("{}{}{}.{}", stem, PART_FILE_INFIX, index, ext.to_string_lossy()),
        None => format!("{}{}{}", stem, PART_FILE_INFIX, index),
    };
    out_dir.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn mgf(spectra: usize) -> String {
        let mut content = String::from("COM=test run\n");
        for scan in 1..=spectra {
            content.push_str(&format!(
                "BEGIN IONS\nTITLE=scan{}\nPEPMASS=500.{}\n100.0 20\nEND IONS\n\n",
                scan, scan
            ));
        }
        content
    }

    #[test]
    fn test_partition_sizes() {
        assert_eq!(partition_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(partition_sizes(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(partition_sizes(7, 1), vec![7]);
        assert!(partition_sizes(3, 0).is_empty());
    }

    #[test]
    fn test_split_mgf_into_contiguous_parts() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("scans.mgf");
        fs::write(&input, mgf(5)).unwrap();

        let result = split_into_partitions(&input, "BEGIN IONS", 2, &dir.path().join("parts")).unwrap();

        assert_eq!(result.records, 5);
        assert_eq!(result.preamble_lines, 1);
        assert_eq!(result.parts.len(), 2);
        assert!(result.parts[0].ends_with("scans_Part1.mgf"));

        let first = fs::read_to_string(&result.parts[0]).unwrap();
        let second = fs::read_to_string(&result.parts[1]).unwrap();
        assert!(first.starts_with("COM=test run\n"));
        assert!(second.starts_with("COM=test run\n"));
        assert_eq!(first.matches("BEGIN IONS").count(), 3);
        assert_eq!(second.matches("BEGIN IONS").count(), 2);
        assert!(first.contains("TITLE=scan3"));
        assert!(second.contains("TITLE=scan4"));
    }

    #[test]
    fn test_more_parts_than_records() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("scans.mgf");
        fs::write(&input, mgf(2)).unwrap();

        let result = split_into_partitions(&input, "BEGIN IONS", 8, dir.path()).unwrap();
        assert_eq!(result.parts.len(), 2);
    }

    #[test]
    fn test_no_records_is_an_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("empty.mgf");
        fs::write(&input, "COM=nothing here\n").unwrap();

        assert!(split_into_partitions(&input, "BEGIN IONS", 2, dir.path()).is_err());
    }
}
