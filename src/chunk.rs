//! Buffered, chunk-at-a-time file reading.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context};

/// Read in 8KB of buffer for efficient reading, for large files.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Read the entire source file (given by path), in chunks, in a buffered
/// manner. Whenever data is obtained the callback function is called.
pub fn read_file_chunked<F>(path: &Path, file_size: u64, callback: F) -> anyhow::Result<()>
where
    F: FnMut(&[u8]) -> anyhow::Result<()>,
{
    let file = File::open(path)
        .with_context(|| format!("Unable to open source file: {}", path.display()))?;
    read_chunked(BufReader::new(file), file_size, callback)
        .with_context(|| format!("Reading source file: {}", path.display()))
}

/// Read exactly `file_size` bytes from an open stream, chunk by chunk.
///
/// The stream must yield at least `file_size` bytes; anything shorter means
/// the source was truncated between stat and read, and the whole operation
/// fails rather than producing a short entry. Reads are clamped to the
/// declared size, so a source that grew after stat never leaks extra bytes
/// into the destination.
pub fn read_chunked<R, F>(mut reader: R, file_size: u64, mut callback: F) -> anyhow::Result<()>
where
    R: Read,
    F: FnMut(&[u8]) -> anyhow::Result<()>,
{
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut total_bytes_read: u64 = 0;

    while total_bytes_read < file_size {
        let want = (file_size - total_bytes_read).min(READ_BUFFER_SIZE as u64) as usize;
        let bytes_read = reader
            .read(&mut buffer[..want])
            .with_context(|| "Reading source stream")?;
        log::trace!("Read {} bytes of data..", bytes_read);
        if bytes_read == 0 {
            break;
        }
        callback(&buffer[..bytes_read])?;
        total_bytes_read += bytes_read as u64;
    }
    log::debug!(
        "File size: {}. Total bytes read: {}",
        file_size,
        total_bytes_read
    );

    if total_bytes_read != file_size {
        bail!(
            "Source yielded {} bytes, expected {}",
            total_bytes_read,
            file_size
        );
    }
    Ok(())
}
