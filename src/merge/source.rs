use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::merge::key::{KeyExtractor, MergeKey};

/// One header line plus the lines up to the next header.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBlock {
    /// `None` when the header could not produce a key.
    pub key: Option<MergeKey>,
    /// 1-based line number of the header in its source.
    pub line_number: usize,
    raw: Vec<String>,
}

impl RecordBlock {
    pub fn header(&self) -> &str {
        self.raw.first().map(String::as_str).unwrap_or("")
    }

    /// Block content without blank separator lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.raw
            .iter()
            .map(String::as_str)
            .filter(|line| !line.trim().is_empty())
    }

    /// Every line as read, separators included.
    pub fn raw_lines(&self) -> &[String] {
        &self.raw
    }

    pub fn is_malformed(&self) -> bool {
        self.key.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePosition {
    Keyed(MergeKey),
    Malformed,
    Exhausted,
}

/// A sorted stream of record blocks positioned on its current block.
pub trait MergeSource {
    fn position(&self) -> SourcePosition;

    fn current_key(&self) -> Option<MergeKey> {
        match self.position() {
            SourcePosition::Keyed(key) => Some(key),
            _ => None,
        }
    }

    fn current_block(&self) -> Option<&RecordBlock>;

    /// Hands out the current block and moves to the next one.
    fn advance(&mut self) -> io::Result<Option<RecordBlock>>;

    /// Lines before the first block header.
    fn preamble(&self) -> &[String];

    /// Writes the current block and the rest of the stream unchanged.
    /// Returns the number of lines written.
    fn drain_verbatim(&mut self, writer: &mut dyn Write) -> io::Result<usize>;
}

/// Reads blocks from any buffered reader, holding one block at a time.
pub struct BlockReader<R> {
    reader: R,
    extractor: Arc<dyn KeyExtractor>,
    preamble: Vec<String>,
    current: Option<RecordBlock>,
    pending_header: Option<(String, usize)>,
    line_number: usize,
}

impl<R: BufRead> BlockReader<R> {
    pub fn new(reader: R, extractor: Arc<dyn KeyExtractor>) -> io::Result<Self> {
        let mut source = Self {
            reader,
            extractor,
            preamble: Vec::new(),
            current: None,
            pending_header: None,
            line_number: 0,
        };

        while let Some(line) = source.read_line()? {
            if source.extractor.is_block_start(&line) {
                source.pending_header = Some((line, source.line_number));
                break;
            }
            source.preamble.push(line);
        }

        source.load_next()?;
        Ok(source)
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    fn load_next(&mut self) -> io::Result<()> {
        let Some((header, line_number)) = self.pending_header.take() else {
            self.current = None;
            return Ok(());
        };

        let key = self.extractor.key(&header);
        let mut raw = vec![header];
        while let Some(line) = self.read_line()? {
            if self.extractor.is_block_start(&line) {
                self.pending_header = Some((line, self.line_number));
                break;
            }
            raw.push(line);
        }

        self.current = Some(RecordBlock { key, line_number, raw });
        Ok(())
    }
}

impl<R: BufRead> MergeSource for BlockReader<R> {
    fn position(&self) -> SourcePosition {
        match &self.current {
            Some(RecordBlock { key: Some(key), .. }) => SourcePosition::Keyed(*key),
            Some(_) => SourcePosition::Malformed,
            None => SourcePosition::Exhausted,
        }
    }

    fn current_block(&self) -> Option<&RecordBlock> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> io::Result<Option<RecordBlock>> {
        let block = self.current.take();
        if block.is_some() {
            self.load_next()?;
        }
        Ok(block)
    }

    fn preamble(&self) -> &[String] {
        &self.preamble
    }

    fn drain_verbatim(&mut self, writer: &mut dyn Write) -> io::Result<usize> {
        let mut written = 0;

        if let Some(block) = self.current.take() {
            for line in block.raw_lines() {
                writeln!(writer, "{}", line)?;
                written += 1;
            }
        }
        if let Some((header, _)) = self.pending_header.take() {
            writeln!(writer, "{}", header)?;
            written += 1;
        }
        while let Some(line) = self.read_line()? {
            writeln!(writer, "{}", line)?;
            written += 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::key::DelimitedHeaderKey;

    fn reader(text: &str) -> BlockReader<&[u8]> {
        BlockReader::new(text.as_bytes(), Arc::new(DelimitedHeaderKey::default())).unwrap()
    }

    #[test]
    fn test_reads_preamble_and_blocks() {
        let mut source = reader("#SpecFile\tScan\n>a.mgf\t1\t2\nPEPTIDE\t0.9\n\n>a.mgf\t3\t2\nPEPK\t0.8\n");

        assert_eq!(source.preamble(), ["#SpecFile\tScan".to_string()]);
        assert_eq!(source.current_key(), MergeKey::from_scan_charge(1, 2));

        let first = source.advance().unwrap().unwrap();
        assert_eq!(first.header(), ">a.mgf\t1\t2");
        assert_eq!(first.line_number, 2);
        assert_eq!(first.lines().collect::<Vec<_>>(), vec![">a.mgf\t1\t2", "PEPTIDE\t0.9"]);
        assert_eq!(first.raw_lines().len(), 3);

        assert_eq!(source.current_key(), MergeKey::from_scan_charge(3, 2));
        assert!(source.advance().unwrap().is_some());
        assert_eq!(source.position(), SourcePosition::Exhausted);
        assert!(source.advance().unwrap().is_none());
    }

    #[test]
    fn test_malformed_header_position() {
        let source = reader(">a.mgf\tnot-a-scan\t2\nLINE\n");
        assert_eq!(source.position(), SourcePosition::Malformed);
        assert!(source.current_block().unwrap().is_malformed());
    }

    #[test]
    fn test_drain_verbatim_copies_remainder() {
        let mut source = reader(">a.mgf\t1\t2\nX\n\n>a.mgf\tbad\t2\nY\n\n>a.mgf\t9\t2\nZ\n");
        source.advance().unwrap();

        let mut out = Vec::new();
        let written = source.drain_verbatim(&mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), ">a.mgf\tbad\t2\nY\n\n>a.mgf\t9\t2\nZ\n");
        assert_eq!(written, 5);
        assert_eq!(source.position(), SourcePosition::Exhausted);
    }

    #[test]
    fn test_empty_and_headerless_input() {
        let source = reader("");
        assert_eq!(source.position(), SourcePosition::Exhausted);

        let source = reader("just text\nno headers\n");
        assert_eq!(source.position(), SourcePosition::Exhausted);
        assert_eq!(source.preamble().len(), 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut source = reader(">a.mgf\t2\t1\r\nROW\r\n");
        let block = source.advance().unwrap().unwrap();
        assert_eq!(block.raw_lines(), [">a.mgf\t2\t1".to_string(), "ROW".to_string()]);
    }
}
