//! Length-parameterised bit array.
//!
//! Bits are packed little-endian within bytes: bit j of byte k is position
//! 8k + j. Several structures store `gt` bitvectors *reversed*: the bit of
//! text position p over a domain [beg, end) is kept at index end − 1 − p,
//! which is the `get_rev`/`set_rev` contract. Reversed storage makes a
//! block's bit file directly addressable as the global reversed range
//! [n − end, n − beg) of a multifile.

use anyhow::{anyhow, Result};
use std::{
    fs::{self, File},
    io::Write,
};

// --------------------------------------------------
#[inline(always)]
pub(crate) fn bit_get(bytes: &[u8], idx: usize) -> bool {
    bytes[idx >> 3] & (1 << (idx & 7)) != 0
}

#[inline(always)]
pub(crate) fn bit_set(bytes: &mut [u8], idx: usize) {
    bytes[idx >> 3] |= 1 << (idx & 7);
}

#[inline(always)]
pub(crate) fn bit_reset(bytes: &mut [u8], idx: usize) {
    bytes[idx >> 3] &= !(1 << (idx & 7));
}

// --------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Bitvector {
    len: usize,
    bytes: Vec<u8>,
}

impl Bitvector {
    /// A zero-initialised bitvector of `len` bits.
    pub fn new(len: usize) -> Self {
        Bitvector {
            len,
            bytes: vec![0u8; len.div_ceil(8)],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn get(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        bit_get(&self.bytes, idx)
    }

    #[inline(always)]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        bit_set(&mut self.bytes, idx)
    }

    #[inline(always)]
    pub fn reset(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        bit_reset(&mut self.bytes, idx)
    }

    /// Reversed-storage accessor: the bit of position `idx` under the
    /// p ↔ len − 1 − p index map.
    #[inline(always)]
    pub fn get_rev(&self, idx: usize) -> bool {
        self.get(self.len - 1 - idx)
    }

    #[inline(always)]
    pub fn set_rev(&mut self, idx: usize) {
        self.set(self.len - 1 - idx)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    // --------------------------------------------------
    pub fn save(&self, filename: &str) -> Result<()> {
        let mut file =
            File::create(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        file.write_all(&self.bytes)
            .map_err(|e| anyhow!("{filename}: {e}"))?;
        Ok(())
    }

    pub fn load(filename: &str, len: usize) -> Result<Self> {
        let bytes = fs::read(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        if bytes.len() < len.div_ceil(8) {
            anyhow::bail!(
                "{filename}: holds {} bytes, {} bits requested",
                bytes.len(),
                len
            );
        }
        Ok(Bitvector { len, bytes })
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::Bitvector;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn test_get_set_reset() -> Result<()> {
        let mut bv = Bitvector::new(19);
        assert_eq!(bv.len(), 19);
        for i in 0..19 {
            assert!(!bv.get(i));
        }

        bv.set(0);
        bv.set(8);
        bv.set(18);
        assert!(bv.get(0) && bv.get(8) && bv.get(18));
        assert!(!bv.get(1) && !bv.get(17));

        bv.reset(8);
        assert!(!bv.get(8));
        Ok(())
    }

    #[test]
    fn test_reversed_contract() -> Result<()> {
        let mut bv = Bitvector::new(10);
        bv.set_rev(3);
        assert!(bv.get(6));
        assert!(bv.get_rev(3));
        Ok(())
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let mut bv = Bitvector::new(77);
        for i in (0..77).step_by(3) {
            bv.set(i);
        }

        let file = NamedTempFile::new()?;
        let path = file.path().to_string_lossy().to_string();
        bv.save(&path)?;

        let loaded = Bitvector::load(&path, 77)?;
        assert_eq!(loaded, bv);
        Ok(())
    }
}
