use anyhow::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use crate::constants::{BYTES_PER_KB, PART_FILE_INFIX, SECONDS_PER_HOUR, SECONDS_PER_MINUTE};

pub fn setup_logging(verbosity: &str, log_file: Option<&Path>) -> Result<()> {
    let level = match verbosity {
        "silent" => Level::ERROR,
        "normal" => Level::INFO,
        "verbose" => Level::DEBUG,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("dms_tool_runner={}", level).parse()?);

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish())?;
        }
    }

    Ok(())
}

/// Files below `directory` whose name ends with `suffix`, in partition order.
///
/// Per-worker result files are named `<stem>_Part<n><suffix>`; `n` is compared
/// numerically so `_Part10` comes after `_Part9`. Other names sort by name.
pub fn discover_files<P: AsRef<Path>>(directory: P, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(directory).follow_links(false) {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            let matches = path
                .file_name()
                .map(|name| name.to_string_lossy().ends_with(suffix))
                .unwrap_or(false);
            if matches {
                files.push(path.to_path_buf());
            }
        }
    }

    files.sort_by_cached_key(|path| partition_sort_key(path));
    Ok(files)
}

/// Partition index `n` of a file named `<stem>_Part<n>...`.
pub fn partition_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_string_lossy();
    let (_, rest) = name.rsplit_once(PART_FILE_INFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn partition_sort_key(path: &Path) -> (Option<PathBuf>, String, Option<usize>, PathBuf) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match name.rsplit_once(PART_FILE_INFIX) {
        Some((stem, _)) if partition_index(path).is_some() => stem.to_string(),
        _ => name,
    };
    (path.parent().map(Path::to_path_buf), stem, partition_index(path), path.to_path_buf())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= BYTES_PER_KB as f64 && unit_index < UNITS.len() - 1 {
        size /= BYTES_PER_KB as f64;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_duration(seconds: f64) -> String {
    if seconds < SECONDS_PER_MINUTE as f64 {
        format!("{:.1}s", seconds)
    } else if seconds < SECONDS_PER_HOUR as f64 {
        format!("{:.1}m", seconds / SECONDS_PER_MINUTE as f64)
    } else {
        format!("{:.1}h", seconds / SECONDS_PER_HOUR as f64)
    }
}
