//! Serialization and deserialization of tar header blocks.
//!
//! The classic ustar header is a 512-byte block of fixed-width fields,
//! numbers written as zero-padded octal text. Values that do not fit the
//! classic fields (file size over 8 GiB - 1, paths over the name/prefix
//! capacity) are carried in a preceding pax extended header: a block with
//! typeflag `x` whose data area holds `"<len> <keyword>=<value>\n"` records.

use std::str;

use anyhow::{bail, Context};

use crate::tar::{BLOCK_SIZE, MAX_OCTAL_SIZE, NAME_LEN};

// Field offsets within a header block.
const NAME_OFF: usize = 0;
const MODE_OFF: usize = 100;
const UID_OFF: usize = 108;
const GID_OFF: usize = 116;
const SIZE_OFF: usize = 124;
const MTIME_OFF: usize = 136;
const CHKSUM_OFF: usize = 148;
const TYPEFLAG_OFF: usize = 156;
const MAGIC_OFF: usize = 257;
const VERSION_OFF: usize = 263;
const PREFIX_OFF: usize = 345;

const PREFIX_LEN: usize = 155;

const REGTYPE: u8 = b'0';
const AREGTYPE: u8 = b'\0';
const DIRTYPE: u8 = b'5';
const PAX_XHDR: u8 = b'x';
const PAX_GHDR: u8 = b'g';

/// Entry type, as carried by the header's typeflag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFlag {
    Regular,
    Directory,
    /// Per-file pax extended header; applies to the next entry only.
    PaxExtended,
    /// Global pax extended header; applies to all following entries.
    PaxGlobal,
    /// Anything else (links, devices, fifos). Skipped by the reader.
    Other(u8),
}

impl TypeFlag {
    fn from_byte(byte: u8) -> Self {
        match byte {
            REGTYPE | AREGTYPE => TypeFlag::Regular,
            DIRTYPE => TypeFlag::Directory,
            PAX_XHDR => TypeFlag::PaxExtended,
            PAX_GHDR => TypeFlag::PaxGlobal,
            other => TypeFlag::Other(other),
        }
    }
}

/// A parsed tar header block.
#[derive(Debug, Clone)]
pub struct TarHeader {
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub typeflag: TypeFlag,
}

impl TarHeader {
    /// Parse and checksum-verify one header block.
    pub fn parse(block: &[u8; BLOCK_SIZE]) -> anyhow::Result<Self> {
        let stored = parse_octal(&block[CHKSUM_OFF..CHKSUM_OFF + 8])
            .with_context(|| "Reading header checksum")?;
        let calculated = checksum(block) as u64;
        if stored != calculated {
            bail!(
                "Corrupt tar header: checksum mismatch (stored {}, calculated {})",
                stored,
                calculated
            );
        }

        let name = parse_string(&block[NAME_OFF..NAME_OFF + NAME_LEN]);
        let prefix = parse_string(&block[PREFIX_OFF..PREFIX_OFF + PREFIX_LEN]);
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };

        Ok(Self {
            path,
            size: parse_octal(&block[SIZE_OFF..SIZE_OFF + 12])
                .with_context(|| "Reading size field")?,
            mode: parse_octal(&block[MODE_OFF..MODE_OFF + 8])? as u32,
            uid: parse_octal(&block[UID_OFF..UID_OFF + 8])? as u32,
            gid: parse_octal(&block[GID_OFF..GID_OFF + 8])? as u32,
            mtime: parse_octal(&block[MTIME_OFF..MTIME_OFF + 12])? as i64,
            typeflag: TypeFlag::from_byte(block[TYPEFLAG_OFF]),
        })
    }
}

/// The fields needed to serialize one header block.
#[derive(Debug, Clone)]
pub struct HeaderFields<'a> {
    pub path: &'a str,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub is_dir: bool,
}

/// Serialize a ustar header block for one entry.
///
/// Values over the classic field widths are clamped here; callers that need
/// the true values representable must emit a pax header first (see
/// [`needs_pax`] and [`pax_data`]).
pub fn build_header(fields: &HeaderFields) -> anyhow::Result<[u8; BLOCK_SIZE]> {
    let mut block = [0u8; BLOCK_SIZE];

    let path = if fields.is_dir && !fields.path.ends_with('/') {
        format!("{}/", fields.path)
    } else {
        fields.path.to_string()
    };
    let (name, prefix) = split_path(&path)?;

    write_string(&mut block[NAME_OFF..], &name, NAME_LEN);
    write_octal(&mut block[MODE_OFF..], (fields.mode & 0o7777) as u64, 8);
    write_octal(&mut block[UID_OFF..], fields.uid.min(0o7777777) as u64, 8);
    write_octal(&mut block[GID_OFF..], fields.gid.min(0o7777777) as u64, 8);
    write_octal(&mut block[SIZE_OFF..], fields.size.min(MAX_OCTAL_SIZE), 12);
    write_octal(&mut block[MTIME_OFF..], fields.mtime.max(0) as u64, 12);
    block[TYPEFLAG_OFF] = if fields.is_dir { DIRTYPE } else { REGTYPE };
    block[MAGIC_OFF..MAGIC_OFF + 6].copy_from_slice(b"ustar\0");
    block[VERSION_OFF..VERSION_OFF + 2].copy_from_slice(b"00");
    write_string(&mut block[PREFIX_OFF..], &prefix, PREFIX_LEN);

    let sum = checksum(&block);
    write_octal(&mut block[CHKSUM_OFF..], sum as u64, 8);
    Ok(block)
}

/// Serialize the header block announcing a pax extended header of
/// `data_len` bytes. `sequence` keeps the synthetic entry names unique
/// within one archive.
pub fn build_pax_header(sequence: u64, data_len: usize, mtime: i64) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];

    let name = format!("PaxHeader/{}", sequence);
    write_string(&mut block[NAME_OFF..], &name, NAME_LEN);
    write_octal(&mut block[MODE_OFF..], 0o644, 8);
    write_octal(&mut block[UID_OFF..], 0, 8);
    write_octal(&mut block[GID_OFF..], 0, 8);
    write_octal(&mut block[SIZE_OFF..], data_len as u64, 12);
    write_octal(&mut block[MTIME_OFF..], mtime.max(0) as u64, 12);
    block[TYPEFLAG_OFF] = PAX_XHDR;
    block[MAGIC_OFF..MAGIC_OFF + 6].copy_from_slice(b"ustar\0");
    block[VERSION_OFF..VERSION_OFF + 2].copy_from_slice(b"00");

    let sum = checksum(&block);
    write_octal(&mut block[CHKSUM_OFF..], sum as u64, 8);
    block
}

/// Whether an entry needs a pax extended header before its ustar header.
pub fn needs_pax(path: &str, size: u64) -> bool {
    size > MAX_OCTAL_SIZE || !path_fits(path)
}

/// Whether a path fits the classic name/prefix fields.
pub fn path_fits(path: &str) -> bool {
    split_path(path).is_ok()
}

/// Stand-in for the classic name field when the real path travels in a pax
/// `path` record: the trailing name-field's worth of bytes, cut at a
/// character boundary, so pre-pax readers see a recognizable tail instead
/// of rejecting the entry.
pub fn fallback_name(path: &str) -> &str {
    if path.len() <= NAME_LEN {
        return path;
    }
    let mut start = path.len() - NAME_LEN;
    while !path.is_char_boundary(start) {
        start += 1;
    }
    &path[start..]
}

/// Build the pax record data carrying the values the classic header
/// cannot: the true `size` and/or the full `path`.
pub fn pax_data(path: &str, size: u64) -> Vec<u8> {
    let mut data = Vec::new();
    if !path_fits(path) {
        write_pax_record(&mut data, "path", path);
    }
    if size > MAX_OCTAL_SIZE {
        write_pax_record(&mut data, "size", &size.to_string());
    }
    data
}

/// Overrides parsed from a pax extended header's data area.
#[derive(Debug, Clone, Default)]
pub struct PaxOverrides {
    pub path: Option<String>,
    pub size: Option<u64>,
}

impl PaxOverrides {
    /// Parse `"<len> <keyword>=<value>\n"` records. Unknown keywords are
    /// ignored.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let mut overrides = PaxOverrides::default();
        let mut pos = 0;

        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .with_context(|| "Malformed pax record: no length delimiter")?;
            let len_str = str::from_utf8(&data[pos..pos + space])
                .with_context(|| "Malformed pax record length")?;
            let record_len: usize = len_str
                .parse()
                .with_context(|| "Malformed pax record length")?;
            if record_len == 0 || pos + record_len > data.len() {
                bail!("Pax record extends past end of extended header");
            }

            let body_start = pos + space + 1;
            let body_end = pos + record_len - 1; // trailing newline
            if body_end > body_start {
                let record = str::from_utf8(&data[body_start..body_end])
                    .with_context(|| "Pax record is not valid UTF-8")?;
                if let Some((keyword, value)) = record.split_once('=') {
                    match keyword {
                        "path" => overrides.path = Some(value.to_string()),
                        "size" => {
                            overrides.size = Some(
                                value.parse().with_context(|| "Invalid pax size value")?,
                            );
                        }
                        _ => {}
                    }
                }
            }
            pos += record_len;
        }
        Ok(overrides)
    }

    /// Merge another set of overrides on top of this one.
    pub fn apply(&mut self, other: &PaxOverrides) {
        if let Some(ref path) = other.path {
            self.path = Some(path.clone());
        }
        if let Some(size) = other.size {
            self.size = Some(size);
        }
    }
}

/// Append one pax record. The leading length field counts itself, so the
/// width is found iteratively.
fn write_pax_record(data: &mut Vec<u8>, keyword: &str, value: &str) {
    let content = format!(" {}={}\n", keyword, value);
    let mut len = content.len() + 1;
    loop {
        let total = len.to_string().len() + content.len();
        if total == len {
            break;
        }
        len = total;
    }
    data.extend_from_slice(len.to_string().as_bytes());
    data.extend_from_slice(content.as_bytes());
}

/// Header checksum: byte sum with the checksum field read as spaces.
fn checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    let mut sum: u32 = 0;
    for (i, &byte) in block.iter().enumerate() {
        if (CHKSUM_OFF..CHKSUM_OFF + 8).contains(&i) {
            sum += b' ' as u32;
        } else {
            sum += byte as u32;
        }
    }
    sum
}

/// Split a path into the 100-byte name field and the 155-byte prefix field.
/// Fails when no split fits; the caller falls back to a pax `path` record.
fn split_path(path: &str) -> anyhow::Result<(String, String)> {
    if path.len() <= NAME_LEN {
        return Ok((path.to_string(), String::new()));
    }
    if path.len() <= NAME_LEN + PREFIX_LEN + 1 {
        for i in (1..=PREFIX_LEN.min(path.len() - 1)).rev() {
            if path.as_bytes()[i] == b'/' {
                let name = &path[i + 1..];
                if !name.is_empty() && name.len() <= NAME_LEN {
                    return Ok((name.to_string(), path[..i].to_string()));
                }
            }
        }
    }
    bail!("Path does not fit ustar name/prefix fields: {}", path)
}

/// Parse a NUL-terminated, possibly space-padded string field.
fn parse_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// Parse an octal number field.
fn parse_octal(bytes: &[u8]) -> anyhow::Result<u64> {
    let s = parse_string(bytes);
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 8).with_context(|| format!("Invalid octal field: {:?}", s))
}

/// Write a zero-padded octal number followed by a space terminator.
fn write_octal(buf: &mut [u8], value: u64, width: usize) {
    let s = format!("{:0w$o} ", value, w = width - 2);
    let bytes = s.as_bytes();
    let len = bytes.len().min(width);
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// Write a string field, NUL-padded by virtue of the zeroed block.
fn write_string(buf: &mut [u8], s: &str, max_len: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(max_len);
    buf[..len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(path: &'a str, size: u64) -> HeaderFields<'a> {
        HeaderFields {
            path,
            size,
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            mtime: 1_700_000_000,
            is_dir: false,
        }
    }

    #[test]
    fn header_roundtrip() {
        let block = build_header(&fields("pkg/data/file.txt", 1234)).unwrap();
        let parsed = TarHeader::parse(&block).unwrap();
        assert_eq!(parsed.path, "pkg/data/file.txt");
        assert_eq!(parsed.size, 1234);
        assert_eq!(parsed.mode, 0o644);
        assert_eq!(parsed.uid, 1000);
        assert_eq!(parsed.gid, 1000);
        assert_eq!(parsed.mtime, 1_700_000_000);
        assert_eq!(parsed.typeflag, TypeFlag::Regular);
    }

    #[test]
    fn directory_header_gets_trailing_slash_and_dirtype() {
        let mut f = fields("pkg/data", 0);
        f.is_dir = true;
        let block = build_header(&f).unwrap();
        let parsed = TarHeader::parse(&block).unwrap();
        assert_eq!(parsed.path, "pkg/data/");
        assert_eq!(parsed.typeflag, TypeFlag::Directory);
    }

    #[test]
    fn corrupt_block_fails_checksum() {
        let mut block = build_header(&fields("pkg/a.txt", 1)).unwrap();
        block[0] ^= 0xff;
        assert!(TarHeader::parse(&block).is_err());
    }

    #[test]
    fn long_path_splits_into_prefix() {
        let long_dir = "d".repeat(120);
        let path = format!("{}/file.txt", long_dir);
        let block = build_header(&fields(&path, 1)).unwrap();
        let parsed = TarHeader::parse(&block).unwrap();
        assert_eq!(parsed.path, path);
    }

    #[test]
    fn oversized_values_need_pax() {
        assert!(!needs_pax("pkg/a.txt", 1024));
        assert!(needs_pax("pkg/a.txt", MAX_OCTAL_SIZE + 1));
        let unsplittable = "x".repeat(300);
        assert!(needs_pax(&unsplittable, 0));
    }

    #[test]
    fn fallback_name_is_the_path_tail() {
        let long = format!("dir/{}", "f".repeat(150));
        assert!(!path_fits(&long));
        let name = fallback_name(&long);
        assert_eq!(name.len(), NAME_LEN);
        assert!(long.ends_with(name));
        assert_eq!(fallback_name("short/path.txt"), "short/path.txt");
    }

    #[test]
    fn pax_record_format() {
        let mut data = Vec::new();
        write_pax_record(&mut data, "path", "/some/path");
        assert_eq!(String::from_utf8(data).unwrap(), "19 path=/some/path\n");
    }

    #[test]
    fn pax_data_roundtrip() {
        let path = "p".repeat(300);
        let size = MAX_OCTAL_SIZE + 42;
        let data = pax_data(&path, size);
        let parsed = PaxOverrides::parse(&data).unwrap();
        assert_eq!(parsed.path.as_deref(), Some(path.as_str()));
        assert_eq!(parsed.size, Some(size));
    }

    #[test]
    fn pax_header_block_parses_as_extended() {
        let block = build_pax_header(1, 64, 1_700_000_000);
        let parsed = TarHeader::parse(&block).unwrap();
        assert_eq!(parsed.typeflag, TypeFlag::PaxExtended);
        assert_eq!(parsed.size, 64);
        assert_eq!(parsed.path, "PaxHeader/1");
    }

    #[test]
    fn pax_overrides_apply_in_order() {
        let mut base = PaxOverrides {
            path: Some("global".into()),
            size: None,
        };
        let per_file = PaxOverrides {
            path: Some("local".into()),
            size: Some(7),
        };
        base.apply(&per_file);
        assert_eq!(base.path.as_deref(), Some("local"));
        assert_eq!(base.size, Some(7));
    }
}
