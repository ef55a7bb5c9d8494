use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{BYTES_PER_KB, OUTPUT_BUFFER_SIZE_KB};
use crate::merge::config::{MalformedKeyPolicy, MergeConfig};
use crate::merge::error::{MergeError, MergeResult};
use crate::merge::key::{KeyExtractor, MergeKey};
use crate::merge::source::{BlockReader, MergeSource, SourcePosition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub sources: usize,
    pub blocks_written: usize,
    pub lines_written: usize,
    /// Blocks that shared their key with an earlier block of another source.
    pub tied_blocks: usize,
    /// Times a source's key went down instead of up.
    pub order_violations: usize,
    pub malformed_sources: usize,
    /// Lines copied after the ordered part for malformed sources.
    pub unordered_lines: usize,
    /// Preamble lines of later sources that were not written.
    pub skipped_preamble_lines: usize,
}

/// K-way merge of block streams that are each sorted by [`MergeKey`].
///
/// Sources waiting at a key are kept in a `BTreeMap<MergeKey, VecDeque<_>>`;
/// the smallest key is popped, every source at that key emits one block in
/// queue order and is queued again at its next key. Only the current block of
/// each source is in memory.
pub struct OrderedStreamMerge {
    config: MergeConfig,
    extractor: Arc<dyn KeyExtractor>,
}

impl OrderedStreamMerge {
    pub fn new(config: MergeConfig) -> Result<Self> {
        config.validate()?;
        let extractor = Arc::new(config.key_extractor());
        Ok(Self { config, extractor })
    }

    pub fn with_key_extractor(mut self, extractor: impl KeyExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn merge_sources<S, W>(&self, sources: &mut [S], writer: &mut W) -> MergeResult<MergeStats>
    where
        S: MergeSource,
        W: Write,
    {
        let mut stats = MergeStats {
            sources: sources.len(),
            ..Default::default()
        };

        // The first preamble wins; the parts usually repeat the same one
        let winner = sources.iter().position(|s| !s.preamble().is_empty());
        if let Some(winner) = winner {
            for line in sources[winner].preamble() {
                writeln!(writer, "{}", line)?;
                stats.lines_written += 1;
            }

            for (index, source) in sources.iter().enumerate().skip(winner + 1) {
                let preamble = source.preamble();
                if preamble.is_empty() {
                    continue;
                }
                stats.skipped_preamble_lines += preamble.len();
                if preamble != sources[winner].preamble() {
                    warn!(
                        source = index + 1,
                        lines = preamble.len(),
                        "Dropping preamble that differs from source {}",
                        winner + 1
                    );
                }
            }
        }

        let mut queue: BTreeMap<MergeKey, VecDeque<usize>> = BTreeMap::new();
        let mut unordered: Vec<usize> = Vec::new();

        for index in 0..sources.len() {
            self.enqueue(index, &sources[index], None, &mut queue, &mut unordered, &mut stats)?;
        }

        while let Some((key, tied)) = queue.pop_first() {
            for (position, index) in tied.into_iter().enumerate() {
                let source = &mut sources[index];
                let Some(block) = source.advance()? else {
                    continue;
                };

                for line in block.lines() {
                    writeln!(writer, "{}", line)?;
                    stats.lines_written += 1;
                }
                writeln!(writer, "{}", self.config.separator)?;
                stats.blocks_written += 1;
                if position > 0 {
                    stats.tied_blocks += 1;
                }

                self.enqueue(index, &sources[index], Some(key), &mut queue, &mut unordered, &mut stats)?;
            }
        }

        unordered.sort_unstable();
        for index in unordered {
            let lines = sources[index].drain_verbatim(&mut *writer)?;
            debug!("Appended {} unordered lines from source {}", lines, index + 1);
            stats.unordered_lines += lines;
        }

        writer.flush()?;
        Ok(stats)
    }

    fn enqueue<S: MergeSource>(
        &self,
        index: usize,
        source: &S,
        previous: Option<MergeKey>,
        queue: &mut BTreeMap<MergeKey, VecDeque<usize>>,
        unordered: &mut Vec<usize>,
        stats: &mut MergeStats,
    ) -> MergeResult<()> {
        match source.position() {
            SourcePosition::Keyed(key) => {
                if let Some(previous) = previous {
                    if key < previous {
                        stats.order_violations += 1;
                        warn!(
                            "Source {} is out of order: key {} follows {}",
                            index + 1,
                            key,
                            previous
                        );
                    }
                }
                queue.entry(key).or_default().push_back(index);
            }
            SourcePosition::Malformed => {
                let (line_number, header) = source
                    .current_block()
                    .map(|block| (block.line_number, block.header().to_string()))
                    .unwrap_or_default();

                match self.config.malformed_key_policy {
                    MalformedKeyPolicy::Fail => {
                        return Err(MergeError::MalformedKey {
                            source_index: index + 1,
                            line_number,
                            header,
                        });
                    }
                    MalformedKeyPolicy::AppendUnordered => {
                        warn!(
                            "Source {} has a malformed header at line {} ({}); appending the rest of it unordered",
                            index + 1,
                            line_number,
                            header
                        );
                        stats.malformed_sources += 1;
                        unordered.push(index);
                    }
                }
            }
            SourcePosition::Exhausted => {}
        }
        Ok(())
    }

    /// Merge result files into `output`. A failed merge leaves no output behind.
    pub fn merge_files(&self, inputs: &[PathBuf], output: &Path) -> MergeResult<MergeStats> {
        if inputs.is_empty() {
            return Err(MergeError::NoInputs);
        }

        let start_time = Instant::now();
        info!("Merging {} files into {}", inputs.len(), output.display());

        let mut sources = Vec::with_capacity(inputs.len());
        for input in inputs {
            if !input.is_file() {
                return Err(MergeError::MissingInput(input.clone()));
            }
            let reader = BufReader::with_capacity(self.config.io_buffer_size(), File::open(input)?);
            sources.push(BlockReader::new(reader, self.extractor.clone())?);
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE_KB * BYTES_PER_KB, File::create(output)?);

        match self.merge_sources(&mut sources, &mut writer) {
            Ok(stats) => {
                info!(
                    "Merged {} blocks ({} lines) in {:.2}s",
                    stats.blocks_written,
                    stats.lines_written,
                    start_time.elapsed().as_secs_f64()
                );
                if stats.order_violations > 0 || stats.malformed_sources > 0 {
                    warn!(
                        "Merge finished with {} order violations and {} malformed sources",
                        stats.order_violations, stats.malformed_sources
                    );
                }
                Ok(stats)
            }
            Err(e) => {
                drop(writer);
                if let Err(remove_err) = std::fs::remove_file(output) {
                    warn!("Failed to remove partial merge output {}: {}", output.display(), remove_err);
                }
                Err(e)
            }
        }
    }
}
