use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::CONSOLE_OUTPUT_SUFFIX;

/// One partition of the input, assigned to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Partition index, 1..=K.
    pub index: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Where the worker captures the tool's stdout/stderr.
    pub console_output_path: PathBuf,
    /// Extra arguments appended after the launcher's template.
    pub args: Vec<String>,
}

impl WorkUnit {
    pub fn new(index: usize, input_path: PathBuf, output_path: PathBuf) -> Self {
        let console_output_path = sibling_with_suffix(&output_path, CONSOLE_OUTPUT_SUFFIX);
        Self {
            index,
            input_path,
            output_path,
            console_output_path,
            args: Vec::new(),
        }
    }

    /// Unit for a partition file: outputs land in `output_dir` as
    /// `<part stem><output_suffix>` next to `<part stem>_ConsoleOutput.txt`.
    pub fn for_partition(index: usize, part_path: &Path, output_dir: &Path, output_suffix: &str) -> Self {
        let stem = file_stem(part_path);
        Self {
            index,
            input_path: part_path.to_path_buf(),
            output_path: output_dir.join(format!("{}{}", stem, output_suffix)),
            console_output_path: output_dir.join(format!("{}{}", stem, CONSOLE_OUTPUT_SUFFIX)),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unit".to_string())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    path.with_file_name(format!("{}{}", file_stem(path), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_output_next_to_output() {
        let unit = WorkUnit::new(2, "in/scans_Part2.mgf".into(), "out/scans_Part2_modp.txt".into());
        assert_eq!(unit.console_output_path, PathBuf::from("out/scans_Part2_modp_ConsoleOutput.txt"));
    }

    #[test]
    fn test_for_partition_paths() {
        let unit = WorkUnit::for_partition(
            3,
            Path::new("/work/scans_Part3.mgf"),
            Path::new("/results"),
            "_modp.txt",
        );
        assert_eq!(unit.index, 3);
        assert_eq!(unit.output_path, PathBuf::from("/results/scans_Part3_modp.txt"));
        assert_eq!(unit.console_output_path, PathBuf::from("/results/scans_Part3_ConsoleOutput.txt"));
        assert!(unit.args.is_empty());
    }
}
