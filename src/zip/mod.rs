//! On-disk ZIP records and the pieces that turn them into ranged downloads.
//!
//! - [`structures`]: EOCD, ZIP64 and header records plus [`ZipEntryDescriptor`]
//! - [`parser`]: trailer and central directory parsing over fetched bytes
//! - [`merger`]: groups wanted entries into contiguous spans
//! - [`extractor`]: writes entries out of a downloaded span
//!
//! Only the tail and the central directory are needed to list an archive.
//! Only STORED and DEFLATED entries can be extracted; any other method is
//! reported as unsupported. Multi-disk archives are not handled.

mod extractor;
mod merger;
mod parser;
mod structures;

pub use extractor::{SpanExtractor, file_crc32, target_path};
pub use merger::{DEFAULT_LOCAL_HEADER_SIZE_GUESS, EntryMerger, MergedSpan};
pub use parser::{CentralDirectoryParser, EndOfCentralDirectoryParser, MAX_COMMENT_SIZE, MAX_LOOKBACK};
pub use structures::*;
