//! The read engine: entry-by-entry traversal of an existing package.
//!
//! Both readers present the same shape, so validation code does not care
//! whether a package is a tar container or a directory tree. Traversal is
//! visitor-driven: the reader hands each [`Entry`] to a callback and only
//! advances after the callback returns. In read mode the entry carries a
//! borrowed content stream, which makes the one-open-stream-at-a-time
//! protocol a lifetime fact — the stream cannot outlive the visit.
//!
//! A traversal always produces a [`ReadSummary`]. Errors are carried inside
//! it rather than replacing it, so a caller that waits for completion gets
//! it even when the traversal ends early.

pub mod dir;
pub mod tar;

use std::io::Read;

use crate::descriptor::FileStat;

/// One traversed entry.
pub struct Entry<'a> {
    /// Path of the entry relative to the package being read; forward-slash
    /// separated.
    pub relative_path: String,
    pub stat: FileStat,
    /// The entry's byte stream. `None` in list mode. In read mode, file
    /// entries carry their content and directories carry an already-ended
    /// placeholder so visitors can treat every entry uniformly.
    pub content: Option<&'a mut dyn Read>,
}

/// Totals for one traversal; returning it is the completion signal.
#[derive(Debug, Clone, Default)]
pub struct ReadSummary {
    pub file_count: u64,
    pub dir_count: u64,
    /// Set when the traversal stopped early (corrupt header, unreadable
    /// file, or a visitor error). The counts cover everything visited
    /// before the failure.
    pub error: Option<String>,
}

impl ReadSummary {
    pub fn total_entries(&self) -> u64 {
        self.file_count + self.dir_count
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A package format that can be traversed entry by entry.
pub trait PackSource {
    /// Visit every entry's metadata, in the format's traversal order,
    /// without opening any content.
    fn list(&mut self, visit: &mut dyn FnMut(&Entry<'_>)) -> ReadSummary;

    /// Same traversal, but each entry carries its content stream. The
    /// visitor may drain the stream or return without reading; either way
    /// the reader disposes of the remainder before moving on. A visitor
    /// error ends the traversal.
    fn read(&mut self, visit: &mut dyn FnMut(Entry<'_>) -> anyhow::Result<()>) -> ReadSummary;
}
