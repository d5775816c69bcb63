//! Growing-window chunk reader for pattern text.
//!
//! Rank seeding compares a pattern suffix of the text against block
//! suffixes; the comparison length is not known up front, so the reader
//! pulls the pattern from disk one chunk at a time and keeps everything
//! read so far.

use anyhow::{anyhow, Result};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
};

const DEFAULT_CHUNK: usize = 1 << 20;

// --------------------------------------------------
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    path: String,
    start: u64,
    limit: usize,
    chunk_size: usize,
    data: Vec<u8>,
    exhausted: bool,
}

impl ChunkReader {
    /// Read on demand from `filename` starting at byte `start`, never more
    /// than `limit` bytes in total.
    pub fn new(filename: &str, start: u64, limit: usize) -> Result<Self> {
        let file =
            File::open(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        Ok(ChunkReader {
            file,
            path: filename.to_string(),
            start,
            limit,
            chunk_size: DEFAULT_CHUNK,
            data: vec![],
            exhausted: false,
        })
    }

    #[cfg(test)]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    // --------------------------------------------------
    /// Everything read so far, after making at least `want` bytes available
    /// (less only when the file or the limit ends first).
    pub fn prefix(&mut self, want: usize) -> Result<&[u8]> {
        let want = want.min(self.limit);
        while self.data.len() < want && !self.exhausted {
            let grow = self
                .chunk_size
                .max(want - self.data.len())
                .min(self.limit - self.data.len());
            let old_len = self.data.len();
            self.data.resize(old_len + grow, 0);

            self.file
                .seek(SeekFrom::Start(self.start + old_len as u64))
                .map_err(|e| anyhow!("{}: {e}", self.path))?;
            let mut filled = 0;
            loop {
                match self.file.read(&mut self.data[old_len + filled..]) {
                    Ok(0) => break,
                    Ok(count) => filled += count,
                    Err(e) => return Err(anyhow!("{}: {e}", self.path)),
                }
                if old_len + filled == self.data.len() {
                    break;
                }
            }
            self.data.truncate(old_len + filled);
            if filled < grow {
                self.exhausted = true;
            }
            if self.data.len() == self.limit {
                self.exhausted = true;
            }
        }
        Ok(&self.data)
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::ChunkReader;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_growing_prefix() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        let data: Vec<u8> = (0..200u8).collect();
        file.write_all(&data)?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut reader = ChunkReader::new(&path, 10, 150)?.with_chunk_size(16);

        assert_eq!(reader.prefix(5)?, &data[10..26]); // one whole chunk
        assert_eq!(reader.prefix(40)?.len(), 40);
        assert_eq!(reader.prefix(1000)?, &data[10..160]); // capped by limit
        Ok(())
    }

    #[test]
    fn test_short_at_eof() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"0123456789")?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut reader = ChunkReader::new(&path, 6, 100)?.with_chunk_size(4);
        assert_eq!(reader.prefix(50)?, b"6789");
        Ok(())
    }
}
