//! Gap arrays.
//!
//! The counting form keeps one byte per slot; a slot that wraps past 255
//! records its index in an excess list (each entry is worth 256). Updater
//! threads stage excess locally and either spill a full staging buffer to
//! an append-only file or, on shutdown, flush the remainder into the
//! in-memory list. Finalisation converts to the two-byte form (u16 per
//! slot, excess entries worth 65536) and then streams v-byte values
//! `count[j] + 65536 * freq(j)`.

use crate::{
    io::{self, vbyte::VbyteWriter},
    types::{random_hash, Int},
};
use anyhow::{anyhow, Result};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    sync::Mutex,
};

/// Staging buffer size of one updater thread.
pub const EXCESS_STAGING: usize = 1 << 16;

// --------------------------------------------------
#[derive(Debug)]
pub struct GapArray {
    pub count: Vec<u8>,
    excess: Mutex<Vec<u32>>,
    spill: Mutex<SpillFile>,
}

#[derive(Debug)]
struct SpillFile {
    filename: Option<String>,
    file: Option<File>,
    entries: u64,
}

impl GapArray {
    /// A gap array whose excess may spill to a file under `prefix`.
    pub fn new(len: usize, prefix: &str) -> Self {
        GapArray {
            count: vec![0u8; len],
            excess: Mutex::new(vec![]),
            spill: Mutex::new(SpillFile {
                filename: Some(format!("{prefix}.excess.{}", random_hash())),
                file: None,
                entries: 0,
            }),
        }
    }

    /// A gap array that keeps all excess in memory (sibling merges).
    pub fn new_in_memory(len: usize) -> Self {
        GapArray {
            count: vec![0u8; len],
            excess: Mutex::new(vec![]),
            spill: Mutex::new(SpillFile {
                filename: None,
                file: None,
                entries: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.count.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count.is_empty()
    }

    // --------------------------------------------------
    /// Split into the bare slot counters and a sharable excess sink, so
    /// updater tasks can own disjoint counter ranges while all of them
    /// feed the same excess lists.
    pub fn split_for_update(&mut self) -> (&mut [u8], ExcessSink<'_>) {
        let GapArray {
            ref mut count,
            ref excess,
            ref spill,
        } = *self;
        (count, ExcessSink { excess, spill })
    }

    /// Append a full staging buffer to the spill file (or to the
    /// in-memory list when this array has no file).
    pub fn spill_excess(&self, staged: &[u32]) -> Result<()> {
        ExcessSink {
            excess: &self.excess,
            spill: &self.spill,
        }
        .spill(staged)
    }

    /// Flush an updater's residual staging buffer.
    pub fn add_excess(&self, staged: &[u32]) {
        let mut excess = self.excess.lock().unwrap();
        excess.extend_from_slice(staged);
    }

    // --------------------------------------------------
    /// All excess slot indices, sorted: the in-memory list plus whatever
    /// was spilled, read back in bounded chunks.
    fn sorted_excess(&self) -> Result<Vec<u32>> {
        let mut all = self.excess.lock().unwrap().clone();

        let mut spill = self.spill.lock().unwrap();
        spill.file.take(); // close the append handle
        if spill.entries > 0 {
            let filename = spill.filename.clone().unwrap();
            let mut file =
                File::open(&filename).map_err(|e| anyhow!("{filename}: {e}"))?;
            let mut remaining = spill.entries;
            let mut chunk = vec![0u8; (1usize << 20).min(remaining as usize * 4)];
            while remaining > 0 {
                let want = chunk.len().min(remaining as usize * 4);
                file.read_exact(&mut chunk[..want])
                    .map_err(|e| anyhow!("{filename}: {e}"))?;
                for rec in chunk[..want].chunks_exact(4) {
                    all.push(u32::read_le(rec));
                }
                remaining -= (want / 4) as u64;
            }
        }

        all.sort_unstable();
        Ok(all)
    }

    // --------------------------------------------------
    /// Total value of every slot, for the in-memory bitvector conversion.
    pub fn into_values(self) -> Result<Vec<u64>> {
        let excess = self.sorted_excess()?;
        let mut values: Vec<u64> =
            self.count.iter().map(|&c| c as u64).collect();
        for idx in excess {
            values[idx as usize] += 256;
        }
        self.erase_spill();
        Ok(values)
    }

    // --------------------------------------------------
    /// Interleave order of a sibling merge as a bitvector: slot i
    /// contributes gap[i] zero bits (right elements) followed by one set
    /// bit (left element i), except after the final slot.
    pub fn into_bitvector(self, n_bits: usize) -> Result<crate::bitvector::Bitvector> {
        let excess = self.sorted_excess()?;
        let mut bv = crate::bitvector::Bitvector::new(n_bits);
        let mut pos = 0usize;
        let mut e = 0usize;
        let slots = self.count.len();
        for (idx, &c) in self.count.iter().enumerate() {
            let mut val = c as u64;
            while e < excess.len() && excess[e] as usize == idx {
                val += 256;
                e += 1;
            }
            pos += val as usize;
            if idx + 1 < slots {
                bv.set(pos);
                pos += 1;
            }
        }
        debug_assert_eq!(pos, n_bits);
        self.erase_spill();
        Ok(bv)
    }

    // --------------------------------------------------
    /// Convert to the two-byte form, applying all excess.
    pub fn into_2n(self) -> Result<GapArray2n> {
        let excess = self.sorted_excess()?;
        let mut count: Vec<u16> =
            self.count.iter().map(|&c| c as u16).collect();
        let mut big_excess: Vec<u32> = vec![];
        for idx in excess {
            let slot = &mut count[idx as usize];
            let (next, wrapped) = slot.overflowing_add(256);
            *slot = next;
            if wrapped {
                big_excess.push(idx);
            }
        }
        self.erase_spill();
        // Entries arrive in sorted slot order, so big_excess is sorted too.
        Ok(GapArray2n {
            count,
            excess: big_excess,
        })
    }

    fn erase_spill(&self) {
        let spill = self.spill.lock().unwrap();
        if let Some(name) = &spill.filename {
            io::delete_file(name);
        }
    }
}

// --------------------------------------------------
/// Shared excess destination handed to the updater tasks.
#[derive(Clone, Copy)]
pub struct ExcessSink<'a> {
    excess: &'a Mutex<Vec<u32>>,
    spill: &'a Mutex<SpillFile>,
}

impl ExcessSink<'_> {
    /// A full staging buffer goes to the append-only spill file; arrays
    /// without one (sibling merges) take it in memory.
    pub fn spill(&self, staged: &[u32]) -> Result<()> {
        let mut spill = self.spill.lock().unwrap();
        let filename = match &spill.filename {
            Some(name) => name.clone(),
            None => {
                drop(spill);
                self.flush(staged);
                return Ok(());
            }
        };
        if spill.file.is_none() {
            spill.file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&filename)
                    .map_err(|e| anyhow!("{filename}: {e}"))?,
            );
        }
        let mut bytes = Vec::with_capacity(staged.len() * 4);
        for &idx in staged {
            bytes.extend_from_slice(&idx.to_le_bytes());
        }
        spill
            .file
            .as_mut()
            .unwrap()
            .write_all(&bytes)
            .map_err(|e| anyhow!("{filename}: {e}"))?;
        spill.entries += staged.len() as u64;
        Ok(())
    }

    /// Residual staging goes to the in-memory excess list.
    pub fn flush(&self, staged: &[u32]) {
        let mut excess = self.excess.lock().unwrap();
        excess.extend_from_slice(staged);
    }
}

// --------------------------------------------------
/// Two-byte gap form: u16 per slot, each excess entry worth 65536.
#[derive(Debug)]
pub struct GapArray2n {
    count: Vec<u16>,
    excess: Vec<u32>,
}

impl GapArray2n {
    pub fn value(&self, idx: usize) -> u64 {
        let big = self.excess.partition_point(|&e| (e as usize) < idx);
        let big_end = self.excess.partition_point(|&e| (e as usize) <= idx);
        self.count[idx] as u64 + (big_end - big) as u64 * 65536
    }

    // --------------------------------------------------
    /// Stream every slot to `filename` as v-byte values.
    pub fn save_vbyte(&self, filename: &str, buf_size: usize) -> Result<u64> {
        let mut writer = VbyteWriter::new(filename, buf_size)?;
        let mut pos = 0usize;
        for (idx, &count) in self.count.iter().enumerate() {
            let mut big = 0u64;
            while pos < self.excess.len() && self.excess[pos] as usize == idx {
                big += 1;
                pos += 1;
            }
            writer.write(count as u64 + (big << 16))?;
        }
        writer.finish()
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{GapArray, EXCESS_STAGING};
    use crate::io::vbyte::VbyteReader;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_counting_to_values() -> Result<()> {
        let mut gap = GapArray::new_in_memory(5);
        // Slot 2 wraps once, slot 4 sits right at the byte boundary.
        let counts = [3u64, 0, 300, 1, 255];
        let mut excess = vec![];
        for (idx, &total) in counts.iter().enumerate() {
            gap.count[idx] = (total % 256) as u8;
            for _ in 0..total / 256 {
                excess.push(idx as u32);
            }
        }
        gap.add_excess(&excess);

        let values = gap.into_values()?;
        assert_eq!(values, counts.to_vec());
        Ok(())
    }

    #[test]
    fn test_spill_and_vbyte_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let prefix = dir.path().join("gap").to_string_lossy().to_string();

        // Slot 1 receives 2^16 + 100 increments in total.
        let total = (1u64 << 16) + 100;
        let gap = GapArray::new(3, &prefix);
        {
            let gap = &gap;
            let wraps = total / 256;
            let staged: Vec<u32> = vec![1; wraps as usize];
            // Force both the spill path and the in-memory remainder.
            gap.spill_excess(&staged[..EXCESS_STAGING.min(staged.len())])?;
            gap.add_excess(&staged[EXCESS_STAGING.min(staged.len())..]);
        }
        let mut gap = gap;
        gap.count[1] = (total % 256) as u8;
        gap.count[2] = 7;

        let two_byte = gap.into_2n()?;
        assert_eq!(two_byte.value(0), 0);
        assert_eq!(two_byte.value(1), total);
        assert_eq!(two_byte.value(2), 7);

        let vbyte_path = format!("{prefix}.gap");
        two_byte.save_vbyte(&vbyte_path, 1 << 12)?;

        let mut reader = VbyteReader::new(&vbyte_path, 1 << 12)?;
        assert_eq!(reader.read()?, 0);
        assert_eq!(reader.read()?, total);
        assert_eq!(reader.read()?, 7);
        Ok(())
    }
}
