//! Multifile: an ordered catalog of bit files tiling one logical bitvector.
//!
//! The tail `gt` bitvector grows leftward by one block per iteration; as a
//! multifile that growth is a catalog entry, not a rewrite of the bits
//! already on disk. Ranges are expressed in the reversed bit domain (the
//! bit of text position p lives at logical index n − 1 − p), so the entry
//! for a block [beg, end) covers [n − end, n − beg).

use anyhow::{anyhow, bail, Result};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
};

// --------------------------------------------------
#[derive(Debug, Clone)]
pub struct MultifileEntry {
    pub beg: u64,
    pub end: u64,
    pub filename: String,
}

// --------------------------------------------------
#[derive(Debug, Default)]
pub struct Multifile {
    entries: Vec<MultifileEntry>,
}

impl Multifile {
    pub fn new() -> Self {
        Multifile { entries: vec![] }
    }

    /// Register `filename` as the bits [beg, end). Ranges of one catalog
    /// must tile their domain without overlap; that is checked on read.
    pub fn add_file(&mut self, beg: u64, end: u64, filename: &str) {
        self.entries.push(MultifileEntry {
            beg,
            end,
            filename: filename.to_string(),
        });
    }

    pub fn entries(&self) -> &[MultifileEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete the underlying files, best-effort.
    pub fn destroy(self) {
        for entry in &self.entries {
            super::delete_file(&entry.filename);
        }
    }

    fn sorted_entries(&self) -> Result<Vec<MultifileEntry>> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|e| e.beg);
        for pair in entries.windows(2) {
            if pair[0].end != pair[1].beg {
                bail!(
                    "multifile ranges [{}, {}) and [{}, {}) do not tile",
                    pair[0].beg,
                    pair[0].end,
                    pair[1].beg,
                    pair[1].end
                );
            }
        }
        Ok(entries)
    }
}

// --------------------------------------------------
/// Forward sequential reader over the logical bit range, starting at an
/// arbitrary bit.
#[derive(Debug)]
pub struct MultifileBitReader {
    entries: Vec<MultifileEntry>,
    entry_idx: usize,
    file: Option<File>,
    buf: Vec<u8>,
    buf_beg: u64,
    pos: u64,
}

const BIT_BUF_BYTES: usize = 1 << 16;

impl MultifileBitReader {
    pub fn new(multifile: &Multifile, start_bit: u64) -> Result<Self> {
        let entries = multifile.sorted_entries()?;
        let mut reader = MultifileBitReader {
            entries,
            entry_idx: 0,
            file: None,
            buf: vec![],
            buf_beg: 0,
            pos: start_bit,
        };
        reader.seek_entry()?;
        Ok(reader)
    }

    fn seek_entry(&mut self) -> Result<()> {
        self.file = None;
        self.buf.clear();
        while self.entry_idx < self.entries.len()
            && self.entries[self.entry_idx].end <= self.pos
        {
            self.entry_idx += 1;
        }
        if self.entry_idx < self.entries.len() {
            let entry = &self.entries[self.entry_idx];
            if self.pos < entry.beg {
                bail!("bit {} is below the multifile domain", self.pos);
            }
            self.file = Some(
                File::open(&entry.filename)
                    .map_err(|e| anyhow!("{}: {e}", entry.filename))?,
            );
        }
        Ok(())
    }

    // --------------------------------------------------
    pub fn next(&mut self) -> Result<bool> {
        let entry_end = match self.entries.get(self.entry_idx) {
            Some(entry) => entry.end,
            None => bail!("bit {} is beyond the multifile domain", self.pos),
        };
        if self.pos >= entry_end {
            self.entry_idx += 1;
            self.seek_entry()?;
            return self.next();
        }

        let entry = &self.entries[self.entry_idx];
        let local = self.pos - entry.beg;
        let byte_idx = local >> 3;

        let buf_end = self.buf_beg + self.buf.len() as u64;
        if self.buf.is_empty() || byte_idx < self.buf_beg || byte_idx >= buf_end
        {
            let file = self.file.as_mut().unwrap();
            file.seek(SeekFrom::Start(byte_idx))
                .map_err(|e| anyhow!("{}: {e}", entry.filename))?;
            let entry_bytes = (entry.end - entry.beg).div_ceil(8);
            let want = BIT_BUF_BYTES.min((entry_bytes - byte_idx) as usize);
            self.buf.resize(want, 0);
            file.read_exact(&mut self.buf)
                .map_err(|e| anyhow!("{}: {e}", entry.filename))?;
            self.buf_beg = byte_idx;
        }

        let byte = self.buf[(byte_idx - self.buf_beg) as usize];
        let bit = byte & (1 << (local & 7)) != 0;
        self.pos += 1;
        Ok(bit)
    }
}

// --------------------------------------------------
/// Random access over the logical bit range, with one cached window.
#[derive(Debug)]
pub struct MultifileBitAccess {
    entries: Vec<MultifileEntry>,
    cache_entry: usize,
    cache_beg: u64,
    cache: Vec<u8>,
}

impl MultifileBitAccess {
    pub fn new(multifile: &Multifile) -> Result<Self> {
        Ok(MultifileBitAccess {
            entries: multifile.sorted_entries()?,
            cache_entry: usize::MAX,
            cache_beg: 0,
            cache: vec![],
        })
    }

    pub fn access(&mut self, bit: u64) -> Result<bool> {
        let idx = match self
            .entries
            .binary_search_by(|e| {
                if bit < e.beg {
                    std::cmp::Ordering::Greater
                } else if bit >= e.end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            }) {
            Ok(idx) => idx,
            Err(_) => bail!("bit {bit} is outside the multifile domain"),
        };

        let entry = &self.entries[idx];
        let local = bit - entry.beg;
        let byte_idx = local >> 3;

        let cached = self.cache_entry == idx
            && byte_idx >= self.cache_beg
            && byte_idx < self.cache_beg + self.cache.len() as u64;
        if !cached {
            let mut file = File::open(&entry.filename)
                .map_err(|e| anyhow!("{}: {e}", entry.filename))?;
            let entry_bytes = (entry.end - entry.beg).div_ceil(8);
            // Center the window on the requested byte.
            let half = (BIT_BUF_BYTES / 2) as u64;
            let beg = byte_idx.saturating_sub(half);
            let want = BIT_BUF_BYTES.min((entry_bytes - beg) as usize);
            file.seek(SeekFrom::Start(beg))
                .map_err(|e| anyhow!("{}: {e}", entry.filename))?;
            self.cache.resize(want, 0);
            file.read_exact(&mut self.cache)
                .map_err(|e| anyhow!("{}: {e}", entry.filename))?;
            self.cache_beg = beg;
            self.cache_entry = idx;
        }

        let byte = self.cache[(byte_idx - self.cache_beg) as usize];
        Ok(byte & (1 << (local & 7)) != 0)
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{Multifile, MultifileBitAccess, MultifileBitReader};
    use crate::bitvector::Bitvector;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn build(dir: &TempDir, splits: &[usize], len: usize) -> Result<(Multifile, Vec<bool>)> {
        let bits: Vec<bool> = (0..len).map(|i| (i * 7 + i / 3) % 5 == 0).collect();
        let mut multifile = Multifile::new();
        let mut beg = 0usize;
        for (part, &end) in splits.iter().chain([&len]).enumerate() {
            let mut bv = Bitvector::new(end - beg);
            for (j, &bit) in bits[beg..end].iter().enumerate() {
                if bit {
                    bv.set(j);
                }
            }
            let path = dir
                .path()
                .join(format!("part.{part}"))
                .to_string_lossy()
                .to_string();
            bv.save(&path)?;
            multifile.add_file(beg as u64, end as u64, &path);
            beg = end;
        }
        Ok((multifile, bits))
    }

    #[test]
    fn test_sequential_from_offsets() -> Result<()> {
        let dir = TempDir::new()?;
        let (multifile, bits) = build(&dir, &[8, 48, 112], 200)?;

        for start in [0usize, 5, 8, 47, 48, 113, 199] {
            let mut reader = MultifileBitReader::new(&multifile, start as u64)?;
            for (i, &expected) in bits.iter().enumerate().skip(start) {
                assert_eq!(reader.next()?, expected, "start {start} bit {i}");
            }
            assert!(reader.next().is_err());
        }
        Ok(())
    }

    #[test]
    fn test_random_access() -> Result<()> {
        let dir = TempDir::new()?;
        let (multifile, bits) = build(&dir, &[64, 72], 300)?;

        let mut access = MultifileBitAccess::new(&multifile)?;
        for i in [299usize, 0, 64, 63, 72, 150, 1, 298] {
            assert_eq!(access.access(i as u64)?, bits[i], "bit {i}");
        }
        assert!(access.access(300).is_err());
        Ok(())
    }

    #[test]
    fn test_non_tiling_rejected() -> Result<()> {
        let mut multifile = Multifile::new();
        multifile.add_file(0, 8, "a");
        multifile.add_file(16, 24, "b");
        assert!(MultifileBitReader::new(&multifile, 0).is_err());
        Ok(())
    }
}
