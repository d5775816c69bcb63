//! Disk I/O: async double-buffered streams, codecs, multifiles and
//! scatterfiles.

pub mod backward_reader;
pub mod bit_stream;
pub mod chunk_reader;
pub mod multifile;
pub mod scatterfile;
pub mod stream_reader;
pub mod stream_writer;
pub mod vbyte;

use anyhow::{anyhow, Result};
use std::{
    fs,
    fs::File,
    io::{Read, Seek, SeekFrom},
};

// --------------------------------------------------
pub fn file_size(filename: &str) -> Result<u64> {
    let meta = fs::metadata(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
    Ok(meta.len())
}

// --------------------------------------------------
/// Read `len` bytes at `offset`. Short reads at EOF are errors here: the
/// caller always asks for a range it knows exists.
pub fn read_at(filename: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut file = File::open(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| anyhow!("{filename}: {e}"))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)
        .map_err(|e| anyhow!("{filename}: {e}"))?;
    Ok(buf)
}

// --------------------------------------------------
/// Best-effort removal of an intermediate file.
pub fn delete_file(filename: &str) {
    let _ = fs::remove_file(filename);
}
