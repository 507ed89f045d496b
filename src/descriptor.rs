//! Descriptions of the files and directories flowing through the engine.
//!
//! [`FileStat`] is the format-agnostic metadata shape shared by tar entries
//! and filesystem entries, so validation code can consume either through one
//! interface. [`FileDescriptor`] describes one file to be written into a
//! package: where to read it from, where it lands relative to the package
//! root, and (after the write) the digests computed over its bytes.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::digest::DigestAlgorithm;

/// What kind of entry a [`FileStat`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for a single entry, independent of where it came from.
///
/// `size` is `-1` when unknown; tar directory entries carry no meaningful
/// size, so both readers report `-1` for directories rather than inventing
/// one. Callers must tolerate this and not treat it as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, seconds since the unix epoch.
    pub mtime: i64,
    pub kind: EntryKind,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One file to be written into a package.
///
/// Built by the packaging layer before any write begins. The writer fills
/// `digests` exactly once, as a side effect of streaming the file's bytes;
/// nothing else mutates a descriptor after construction.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Absolute path of the source file on disk.
    pub source_path: PathBuf,
    /// Destination path relative to the package root. Always forward-slash
    /// separated, never absolute.
    pub dest_path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    /// Digest algorithm -> lowercase hex digest, populated by the writer.
    pub digests: BTreeMap<DigestAlgorithm, String>,
}

impl FileDescriptor {
    /// Builds a descriptor by reading the source file's metadata.
    ///
    /// `dest_path` is normalized: backslashes become forward slashes and any
    /// leading separators are stripped, so the same manifest produces the
    /// same package layout on every platform.
    pub fn from_path(source_path: &Path, dest_path: &str) -> anyhow::Result<Self> {
        let metadata = fs::metadata(source_path)
            .with_context(|| format!("Unable to read metadata of: {}", source_path.display()))?;
        Ok(Self {
            source_path: source_path.to_path_buf(),
            dest_path: normalize_dest_path(dest_path),
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            mtime: metadata.mtime(),
            digests: BTreeMap::new(),
        })
    }

    /// Builds a descriptor from already-known metadata, without touching the
    /// filesystem.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_path: PathBuf,
        dest_path: &str,
        size: u64,
        mode: u32,
        uid: u32,
        gid: u32,
        mtime: i64,
    ) -> Self {
        Self {
            source_path,
            dest_path: normalize_dest_path(dest_path),
            size,
            mode,
            uid,
            gid,
            mtime,
            digests: BTreeMap::new(),
        }
    }

    /// The metadata view of this descriptor.
    pub fn stat(&self) -> FileStat {
        FileStat {
            size: self.size as i64,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            mtime: self.mtime,
            kind: EntryKind::File,
        }
    }
}

/// Forward slashes only, no leading separators.
fn normalize_dest_path(dest_path: &str) -> String {
    let normalized = dest_path.replace('\\', "/");
    normalized.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_path_backslashes_are_normalized() {
        let desc = FileDescriptor::new(
            PathBuf::from("/tmp/a.txt"),
            r"data\sub\a.txt",
            3,
            0o644,
            0,
            0,
            0,
        );
        assert_eq!(desc.dest_path, "data/sub/a.txt");
    }

    #[test]
    fn dest_path_leading_slash_is_stripped() {
        let desc =
            FileDescriptor::new(PathBuf::from("/tmp/a.txt"), "/data/a.txt", 3, 0o644, 0, 0, 0);
        assert_eq!(desc.dest_path, "data/a.txt");
    }

    #[test]
    fn stat_reflects_descriptor_fields() {
        let desc = FileDescriptor::new(
            PathBuf::from("/tmp/a.txt"),
            "data/a.txt",
            42,
            0o600,
            1000,
            1000,
            1700000000,
        );
        let stat = desc.stat();
        assert_eq!(stat.size, 42);
        assert_eq!(stat.mode, 0o600);
        assert!(stat.is_file());
        assert!(!stat.is_dir());
    }
}
