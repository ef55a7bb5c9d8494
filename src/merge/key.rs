use ordered_float::OrderedFloat;
use std::fmt;

use crate::constants::{DEFAULT_HEADER_DELIMITER, DEFAULT_HEADER_PREFIX};

/// Totally ordered merge key. Construction rejects NaN and infinities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MergeKey(OrderedFloat<f64>);

impl MergeKey {
    pub fn new(value: f64) -> Option<Self> {
        value.is_finite().then(|| Self(OrderedFloat(value)))
    }

    /// `scan + charge / 100`, so scan 3 at charge 2 sorts as 3.02.
    pub fn from_scan_charge(scan: u64, charge: u32) -> Option<Self> {
        Self::new(scan as f64 + charge as f64 / 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.value())
    }
}

/// Recognises block headers and reads their keys.
pub trait KeyExtractor: Send + Sync {
    fn is_block_start(&self, line: &str) -> bool;

    /// `None` marks a malformed header.
    fn key(&self, header: &str) -> Option<MergeKey>;
}

/// Header lines such as `>spectra.mgf<TAB>1043<TAB>2<TAB>...`: the prefix
/// marks a block start, the remaining text is split on the delimiter and the
/// scan (and optionally charge) columns form the key. Columns count from 0
/// after the prefix is removed.
#[derive(Debug, Clone)]
pub struct DelimitedHeaderKey {
    prefix: String,
    delimiter: char,
    scan_column: usize,
    charge_column: Option<usize>,
}

impl DelimitedHeaderKey {
    pub fn new(prefix: impl Into<String>, delimiter: char, scan_column: usize, charge_column: Option<usize>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter,
            scan_column,
            charge_column,
        }
    }
}

impl Default for DelimitedHeaderKey {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_PREFIX, DEFAULT_HEADER_DELIMITER, 1, Some(2))
    }
}

impl KeyExtractor for DelimitedHeaderKey {
    fn is_block_start(&self, line: &str) -> bool {
        line.starts_with(&self.prefix)
    }

    fn key(&self, header: &str) -> Option<MergeKey> {
        let body = header.strip_prefix(&self.prefix)?;
        let columns: Vec<&str> = body.split(self.delimiter).collect();

        let scan: u64 = columns.get(self.scan_column)?.trim().parse().ok()?;
        // A header shorter than the charge column carries charge 0
        let charge: u32 = match self.charge_column.and_then(|column| columns.get(column)) {
            Some(text) => text.trim().parse().ok()?,
            None => 0,
        };

        MergeKey::from_scan_charge(scan, charge)
    }
}
