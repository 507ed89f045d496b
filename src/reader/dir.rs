//! Filesystem source: walks a directory tree.

use std::fs::File;
use std::io::{self, BufReader};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use crate::descriptor::{EntryKind, FileStat};
use crate::reader::{Entry, PackSource, ReadSummary};

enum Mode {
    List,
    Read,
}

/// Reads a directory tree with the same entry shape as the tar reader.
///
/// Traversal order is depth-first, lexicographic by file name at every
/// level, which makes it deterministic for a given tree (but not equal to
/// any tar container's physical order). The root itself is not an entry;
/// paths are relative to it.
pub struct DirReader {
    root: PathBuf,
}

impl DirReader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn walk(
        &mut self,
        mode: Mode,
        visit: &mut dyn FnMut(Entry<'_>) -> anyhow::Result<()>,
    ) -> ReadSummary {
        let mut summary = ReadSummary::default();
        match self.walk_inner(mode, visit, &mut summary) {
            Ok(()) => {}
            Err(e) => summary.error = Some(format!("{:#}", e)),
        }
        summary
    }

    fn walk_inner(
        &mut self,
        mode: Mode,
        visit: &mut dyn FnMut(Entry<'_>) -> anyhow::Result<()>,
        summary: &mut ReadSummary,
    ) -> anyhow::Result<()> {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.with_context(|| "Walking directory tree")?;
            let metadata = entry
                .metadata()
                .with_context(|| format!("Unable to read metadata of: {}", entry.path().display()))?;

            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                log::debug!("Skipping non-regular entry: {}", entry.path().display());
                continue;
            };

            let relative_path = relative_path(&self.root, entry.path())?;
            let stat = FileStat {
                size: match kind {
                    EntryKind::File => metadata.len() as i64,
                    // Match the tar side: directory sizes are not
                    // meaningful, report unknown.
                    EntryKind::Directory => -1,
                },
                mode: metadata.mode(),
                uid: metadata.uid(),
                gid: metadata.gid(),
                mtime: metadata.mtime(),
                kind,
            };

            match kind {
                EntryKind::File => summary.file_count += 1,
                EntryKind::Directory => summary.dir_count += 1,
            }

            match (&mode, kind) {
                (Mode::List, _) => visit(Entry {
                    relative_path,
                    stat,
                    content: None,
                })?,
                (Mode::Read, EntryKind::File) => {
                    let file = File::open(entry.path()).with_context(|| {
                        format!("Unable to open file: {}", entry.path().display())
                    })?;
                    let mut content = BufReader::new(file);
                    visit(Entry {
                        relative_path,
                        stat,
                        content: Some(&mut content),
                    })?;
                    // Stream is dropped here, before the walk advances.
                }
                (Mode::Read, EntryKind::Directory) => {
                    let mut placeholder = io::empty();
                    visit(Entry {
                        relative_path,
                        stat,
                        content: Some(&mut placeholder),
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Path relative to the walk root, forward-slash separated.
fn relative_path(root: &Path, path: &Path) -> anyhow::Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("Entry escapes walk root: {}", path.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

impl PackSource for DirReader {
    fn list(&mut self, visit: &mut dyn FnMut(&Entry<'_>)) -> ReadSummary {
        self.walk(Mode::List, &mut |entry| {
            visit(&entry);
            Ok(())
        })
    }

    fn read(&mut self, visit: &mut dyn FnMut(Entry<'_>) -> anyhow::Result<()>) -> ReadSummary {
        self.walk(Mode::Read, visit)
    }
}
