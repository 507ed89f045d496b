//! Streaming archive I/O for BagIt-style packages.
//!
//! Two symmetric halves: writers that stream a set of source files into a
//! tar container ([`writer::tar::TarTarget`]) or a plain directory
//! ([`writer::dir::DirTarget`]) while computing any number of content
//! digests in a single read pass, and readers ([`reader::tar::TarReader`],
//! [`reader::dir::DirReader`]) that walk either format back entry by entry
//! without ever holding a whole file in memory.
//!
//! Writes go through [`writer::Writer`], a single-worker queue that commits
//! files in submission order and reports progress through events. Reads are
//! visitor-driven: the traversal hands each entry (and, in read mode, its
//! content stream) to a callback and does not advance until the callback
//! returns.

pub mod chunk;
pub mod descriptor;
pub mod digest;
pub mod reader;
pub mod tar;
pub mod writer;

pub use descriptor::{EntryKind, FileDescriptor, FileStat};
pub use digest::{DigestAlgorithm, DigestSet};
pub use reader::{Entry, PackSource, ReadSummary};
pub use writer::{PackTarget, WriteEvent, WriteSummary, Writer};
