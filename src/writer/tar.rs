//! Tar destination: serializes entries into a single `.tar` container.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::chunk::read_chunked;
use crate::descriptor::FileDescriptor;
use crate::digest::{DigestAlgorithm, DigestSet};
use crate::tar::header::{
    build_header, build_pax_header, fallback_name, needs_pax, path_fits, pax_data, HeaderFields,
};
use crate::tar::{padding_needed, EOA_MARKER};
use crate::writer::PackTarget;

/// Writes files as tar entries under `<package name>/<dest path>`.
///
/// The package name is the archive file's stem, so `bags/photos.tar` holds
/// entries like `photos/data/img_001.jpg`. Entries whose size or path exceed
/// the classic header fields get a preceding pax extended header, so files
/// past the 8 GiB octal limit are carried with their true size.
pub struct TarTarget {
    archive_path: PathBuf,
    package_name: String,
    output: Option<BufWriter<File>>,
    pax_sequence: u64,
}

impl TarTarget {
    /// Validates the destination path. The output file itself is not
    /// created until [`PackTarget::open`], so a target can be constructed
    /// before its destination directory exists.
    pub fn new(archive_path: &Path) -> anyhow::Result<Self> {
        if archive_path.extension().and_then(|e| e.to_str()) != Some("tar") {
            bail!(
                "Archive path must end with .tar: {}",
                archive_path.display()
            );
        }
        let package_name = archive_path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| "Unable to get package name from archive path")?
            .to_string();
        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            package_name,
            output: None,
            pax_sequence: 0,
        })
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    fn output(&mut self) -> anyhow::Result<&mut BufWriter<File>> {
        self.output
            .as_mut()
            .with_context(|| "Tar destination is not open")
    }
}

impl PackTarget for TarTarget {
    fn open(&mut self) -> anyhow::Result<()> {
        if let Some(parent) = self.archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if parent.exists() {
                if !parent.is_dir() {
                    bail!(
                        "Archive parent exists but is not a directory: {}",
                        parent.display()
                    );
                }
            } else {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Unable to create archive parent: {}", parent.display())
                })?;
            }
        }
        let file = File::create(&self.archive_path).with_context(|| {
            format!("Unable to create archive file: {}", self.archive_path.display())
        })?;
        self.output = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_file(
        &mut self,
        descriptor: &mut FileDescriptor,
        algorithms: &[DigestAlgorithm],
    ) -> anyhow::Result<()> {
        let entry_path = format!("{}/{}", self.package_name, descriptor.dest_path);
        log::debug!("Packing entry: {}", entry_path);

        // Open the source before any header bytes go out, so an unreadable
        // descriptor cannot leave a stray header in the archive.
        let source = File::open(&descriptor.source_path).with_context(|| {
            format!(
                "Unable to open source file: {}",
                descriptor.source_path.display()
            )
        })?;

        if needs_pax(&entry_path, descriptor.size) {
            self.pax_sequence += 1;
            let data = pax_data(&entry_path, descriptor.size);
            let header = build_pax_header(self.pax_sequence, data.len(), descriptor.mtime);
            let padding = padding_needed(data.len() as u64);
            let writer = self.output()?;
            writer.write_all(&header)?;
            writer.write_all(&data)?;
            writer.write_all(&vec![0u8; padding])?;
        }

        // When the full path travels in the pax record, the classic name
        // field carries a truncated stand-in.
        let header_path = if path_fits(&entry_path) {
            entry_path.as_str()
        } else {
            fallback_name(&entry_path)
        };
        let header = build_header(&HeaderFields {
            path: header_path,
            size: descriptor.size,
            mode: descriptor.mode,
            uid: descriptor.uid,
            gid: descriptor.gid,
            mtime: descriptor.mtime,
            is_dir: false,
        })?;

        let mut digests = DigestSet::new(algorithms);
        {
            let writer = self.output()?;
            writer.write_all(&header)?;
            read_chunked(BufReader::new(source), descriptor.size, |chunk| {
                digests.update(chunk);
                writer.write_all(chunk)?;
                Ok(())
            })
            .with_context(|| {
                format!(
                    "Reading source file: {}",
                    descriptor.source_path.display()
                )
            })?;
            let padding = padding_needed(descriptor.size);
            if padding > 0 {
                writer.write_all(&vec![0u8; padding])?;
            }
        }
        digests.finish_into(descriptor)?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        let writer = self.output()?;
        writer.write_all(&EOA_MARKER)?;
        writer
            .flush()
            .with_context(|| "Flushing archive destination")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_tar_extension() {
        assert!(TarTarget::new(Path::new("/tmp/out.zip")).is_err());
        assert!(TarTarget::new(Path::new("/tmp/out")).is_err());
        assert!(TarTarget::new(Path::new("/tmp/out.tar")).is_ok());
    }

    #[test]
    fn package_name_is_archive_stem() {
        let target = TarTarget::new(Path::new("/tmp/bags/photos.tar")).unwrap();
        assert_eq!(target.package_name(), "photos");
    }

    #[test]
    fn open_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/out.tar");
        let mut target = TarTarget::new(&path).unwrap();
        target.open().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a dir").unwrap();
        let path = blocker.join("out.tar");
        let mut target = TarTarget::new(&path).unwrap();
        assert!(target.open().is_err());
    }

    #[test]
    fn unreadable_source_leaves_no_partial_entry() {
        use crate::reader::tar::TarReader;
        use crate::reader::PackSource;

        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("skip.tar");
        let mut target = TarTarget::new(&archive).unwrap();
        target.open().unwrap();

        let mut bad = FileDescriptor::new(
            PathBuf::from("/no/such/source"),
            "data/x.txt",
            4,
            0o644,
            0,
            0,
            0,
        );
        assert!(target.write_file(&mut bad, &[]).is_err());

        let source = src.path().join("ok.txt");
        fs::write(&source, b"okay").unwrap();
        let mut good = FileDescriptor::from_path(&source, "data/ok.txt").unwrap();
        target.write_file(&mut good, &[]).unwrap();
        target.finish().unwrap();

        // The failed entry contributed nothing; the archive stays parseable.
        let mut paths = Vec::new();
        let summary = TarReader::new(&archive)
            .list(&mut |entry| paths.push(entry.relative_path.clone()));
        assert!(summary.is_ok());
        assert_eq!(paths, vec!["skip/data/ok.txt"]);
    }
}
