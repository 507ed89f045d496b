//! Tar source: walks a container's entries in physical order.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::descriptor::{EntryKind, FileStat};
use crate::reader::{Entry, PackSource, ReadSummary};
use crate::tar::header::{PaxOverrides, TarHeader, TypeFlag};
use crate::tar::{is_zero_block, round_up_block, BLOCK_SIZE};

enum Mode {
    List,
    Read,
}

/// Reads the entries of a tar container, in the order they are stored.
///
/// pax extended headers (per-file and global) are applied to the entries
/// they describe, so oversized files report their true size. Entry types
/// other than files and directories are skipped.
pub struct TarReader {
    archive_path: PathBuf,
}

impl TarReader {
    pub fn new(archive_path: &Path) -> Self {
        Self {
            archive_path: archive_path.to_path_buf(),
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
        let file = File::open(&self.archive_path)
            .with_context(|| format!("Unable to open archive: {}", self.archive_path.display()))?;
        let mut reader = BufReader::new(file);

        let mut global = PaxOverrides::default();
        let mut pending: Option<PaxOverrides> = None;
        let mut block = [0u8; BLOCK_SIZE];

        loop {
            match reader.read_exact(&mut block) {
                Ok(()) => {}
                // A container that simply stops is treated as ended; only a
                // half-read block would leave bytes unaccounted for.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e).with_context(|| "Reading header block"),
            }
            if is_zero_block(&block) {
                // End of archive; the second zero block (if present) is not
                // required to be intact.
                break;
            }

            let header = TarHeader::parse(&block).with_context(|| "Parsing tar header")?;
            match header.typeflag {
                TypeFlag::PaxGlobal => {
                    let data = read_pax_data(&mut reader, header.size)?;
                    global = PaxOverrides::parse(&data)?;
                    continue;
                }
                TypeFlag::PaxExtended => {
                    let data = read_pax_data(&mut reader, header.size)?;
                    pending = Some(PaxOverrides::parse(&data)?);
                    continue;
                }
                _ => {}
            }

            let mut overrides = global.clone();
            if let Some(ref per_file) = pending.take() {
                overrides.apply(per_file);
            }
            let path = overrides.path.unwrap_or(header.path);
            let size = overrides.size.unwrap_or(header.size);
            let relative_path = path.trim_end_matches('/').to_string();

            match header.typeflag {
                TypeFlag::Regular => {
                    let padded = aligned(size)?;
                    summary.file_count += 1;
                    let stat = FileStat {
                        size: size as i64,
                        mode: header.mode,
                        uid: header.uid,
                        gid: header.gid,
                        mtime: header.mtime,
                        kind: EntryKind::File,
                    };
                    match mode {
                        Mode::List => {
                            visit(Entry {
                                relative_path,
                                stat,
                                content: None,
                            })?;
                            skip_bytes(&mut reader, padded)?;
                        }
                        Mode::Read => {
                            let mut content = (&mut reader).take(size);
                            visit(Entry {
                                relative_path,
                                stat,
                                content: Some(&mut content),
                            })?;
                            // Dispose of whatever the visitor left, plus
                            // the block padding.
                            let leftover = content.limit();
                            skip_bytes(&mut reader, leftover + padded - size)?;
                        }
                    }
                }
                TypeFlag::Directory => {
                    summary.dir_count += 1;
                    let stat = FileStat {
                        // Directory sizes in tar are convention-dependent;
                        // report unknown rather than a guess.
                        size: -1,
                        mode: header.mode,
                        uid: header.uid,
                        gid: header.gid,
                        mtime: header.mtime,
                        kind: EntryKind::Directory,
                    };
                    match mode {
                        Mode::List => visit(Entry {
                            relative_path,
                            stat,
                            content: None,
                        })?,
                        Mode::Read => {
                            let mut placeholder = io::empty();
                            visit(Entry {
                                relative_path,
                                stat,
                                content: Some(&mut placeholder),
                            })?;
                        }
                    }
                    skip_bytes(&mut reader, aligned(header.size)?)?;
                }
                TypeFlag::Other(flag) => {
                    log::debug!("Skipping unsupported entry type {:?}: {}", flag as char, path);
                    skip_bytes(&mut reader, aligned(size)?)?;
                }
                TypeFlag::PaxExtended | TypeFlag::PaxGlobal => unreachable!(),
            }
        }
        Ok(())
    }
}

/// Largest pax extended header data area this reader will buffer. Real
/// extended headers are a few records of path/size text; anything bigger is
/// a malformed or hostile size field.
const PAX_DATA_LIMIT: u64 = 1 << 20;

/// Block-aligned length of an entry's content, rejecting sizes that cannot
/// be aligned.
fn aligned(size: u64) -> anyhow::Result<u64> {
    round_up_block(size)
        .with_context(|| format!("Entry size {} overflows block alignment", size))
}

fn read_pax_data(reader: &mut BufReader<File>, size: u64) -> anyhow::Result<Vec<u8>> {
    if size > PAX_DATA_LIMIT {
        anyhow::bail!(
            "Extended header claims {} bytes, over the {} byte limit",
            size,
            PAX_DATA_LIMIT
        );
    }
    let mut data = vec![0u8; size as usize];
    reader
        .read_exact(&mut data)
        .with_context(|| "Reading pax extended header data")?;
    skip_bytes(reader, aligned(size)? - size)?;
    Ok(data)
}

fn skip_bytes(reader: &mut BufReader<File>, count: u64) -> anyhow::Result<()> {
    if count == 0 {
        return Ok(());
    }
    let copied = io::copy(&mut reader.take(count), &mut io::sink())
        .with_context(|| "Skipping entry content")?;
    if copied != count {
        anyhow::bail!("Archive ended {} bytes short of an entry", count - copied);
    }
    Ok(())
}

impl PackSource for TarReader {
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
