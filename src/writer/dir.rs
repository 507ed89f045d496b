//! Filesystem destination: mirrors the destination hierarchy on disk.

use std::fs::{self, DirBuilder, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use filetime::FileTime;
use nix::unistd::{chown, Gid, Uid};

use crate::chunk::read_file_chunked;
use crate::descriptor::FileDescriptor;
use crate::digest::{DigestAlgorithm, DigestSet};
use crate::writer::PackTarget;

/// Mode used for the output root and every intermediate directory.
pub const DIR_MODE: u32 = 0o755;

/// Writes files directly under an output root, creating intermediate
/// directories as needed and restoring each file's mode and mtime.
///
/// When no digest algorithms are requested the file is copied with
/// `fs::copy`; otherwise the bytes are streamed through the digest
/// accumulators into the destination in a single pass.
pub struct DirTarget {
    root: PathBuf,
}

impl DirTarget {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn restore_metadata(&self, dest: &Path, descriptor: &FileDescriptor) -> anyhow::Result<()> {
        fs::set_permissions(dest, fs::Permissions::from_mode(descriptor.mode & 0o7777))
            .with_context(|| format!("Setting permissions on: {}", dest.display()))?;
        filetime::set_file_mtime(dest, FileTime::from_unix_time(descriptor.mtime, 0))
            .with_context(|| format!("Setting mtime on: {}", dest.display()))?;
        // Ownership can only be restored by root; otherwise files keep the
        // writing user.
        if Uid::effective().is_root() {
            if let Err(e) = chown(
                dest,
                Some(Uid::from_raw(descriptor.uid)),
                Some(Gid::from_raw(descriptor.gid)),
            ) {
                log::warn!("Unable to chown {}: {}", dest.display(), e);
            }
        }
        Ok(())
    }
}

fn create_dirs(path: &Path) -> anyhow::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .with_context(|| format!("Unable to create directory: {}", path.display()))
}

impl PackTarget for DirTarget {
    fn open(&mut self) -> anyhow::Result<()> {
        if self.root.exists() && !self.root.is_dir() {
            bail!(
                "Output root exists but is not a directory: {}",
                self.root.display()
            );
        }
        create_dirs(&self.root)
    }

    fn write_file(
        &mut self,
        descriptor: &mut FileDescriptor,
        algorithms: &[DigestAlgorithm],
    ) -> anyhow::Result<()> {
        let dest = self.root.join(&descriptor.dest_path);
        if let Some(parent) = dest.parent() {
            create_dirs(parent)?;
        }
        log::debug!(
            "Copying {} -> {}",
            descriptor.source_path.display(),
            dest.display()
        );

        if algorithms.is_empty() {
            // No digest fan-out requested; a plain copy is faster.
            let copied = fs::copy(&descriptor.source_path, &dest).with_context(|| {
                format!(
                    "Copying {} to {}",
                    descriptor.source_path.display(),
                    dest.display()
                )
            })?;
            if copied != descriptor.size {
                bail!(
                    "Copied {} bytes of {}, expected {}",
                    copied,
                    descriptor.source_path.display(),
                    descriptor.size
                );
            }
        } else {
            let file = File::create(&dest)
                .with_context(|| format!("Unable to create destination: {}", dest.display()))?;
            let mut writer = BufWriter::new(file);
            let mut digests = DigestSet::new(algorithms);
            read_file_chunked(&descriptor.source_path, descriptor.size, |chunk| {
                digests.update(chunk);
                writer.write_all(chunk)?;
                Ok(())
            })?;
            writer
                .flush()
                .with_context(|| format!("Flushing destination: {}", dest.display()))?;
            digests.finish_into(descriptor)?;
        }

        self.restore_metadata(&dest, descriptor)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
