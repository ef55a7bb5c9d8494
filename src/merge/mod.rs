//! Recombining per-worker results.
//!
//! [`OrderedStreamMerge`] interleaves key-sorted block streams; [`assemble_files`]
//! concatenates parts whose order is already their partition order.

pub mod assemble;
pub mod config;
pub mod error;
pub mod key;
pub mod merger;
pub mod source;


pub use assemble::{assemble_files, AssembleStats};
pub use config::{MalformedKeyPolicy, MergeConfig};
pub use error::{MergeError, MergeResult};
pub use key::{DelimitedHeaderKey, KeyExtractor, MergeKey};
pub use merger::{MergeStats, OrderedStreamMerge};
pub use source::{BlockReader, MergeSource, RecordBlock, SourcePosition};
