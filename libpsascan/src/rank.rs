//! Rank structure over a byte sequence (normally a partial BWT).
//!
//! Two levels of per-symbol counts: absolute `u64` counts at every
//! superblock (2^16 symbols) and `u16` counts relative to the enclosing
//! superblock at every block (2^10 symbols). A query adds both and counts
//! the matching bytes in the at most 1023-byte remainder, so the cost is a
//! small constant. Space is the sequence itself plus ~0.53 bytes per
//! symbol. The structure is read-only after construction and shared across
//! streaming threads.

use rayon::prelude::*;

const SBLOCK_LOG: usize = 16;
const SBLOCK_SIZE: usize = 1 << SBLOCK_LOG;
const BLOCK_LOG: usize = 10;
const BLOCK_SIZE: usize = 1 << BLOCK_LOG;
const SIGMA: usize = 256;

// --------------------------------------------------
#[derive(Debug)]
pub struct RankSupport {
    seq: Vec<u8>,
    sblock_counts: Vec<u64>,
    block_counts: Vec<u16>,
    totals: Vec<u64>,
}

impl RankSupport {
    /// Build over `seq`, consuming it. Construction is parallel over
    /// superblocks.
    pub fn new(seq: Vec<u8>) -> Self {
        let len = seq.len();
        let n_sblocks = len.div_ceil(SBLOCK_SIZE).max(1);
        let n_blocks = len.div_ceil(BLOCK_SIZE).max(1);

        let mut sblock_counts = vec![0u64; n_sblocks * SIGMA];
        let mut block_counts = vec![0u16; n_blocks * SIGMA];

        // Per-superblock pass: local totals plus the relative block counts.
        let sblock_totals: Vec<[u64; SIGMA]> = seq
            .par_chunks(SBLOCK_SIZE)
            .zip(block_counts.par_chunks_mut((SBLOCK_SIZE / BLOCK_SIZE) * SIGMA))
            .map(|(chunk, blocks)| {
                let mut running = [0u64; SIGMA];
                for (block_idx, block) in chunk.chunks(BLOCK_SIZE).enumerate() {
                    let dst = &mut blocks[block_idx * SIGMA..(block_idx + 1) * SIGMA];
                    for (c, &count) in running.iter().enumerate() {
                        dst[c] = count as u16;
                    }
                    for &byte in block {
                        running[byte as usize] += 1;
                    }
                }
                running
            })
            .collect();

        // Exclusive prefix sums of superblock totals give absolute counts.
        let mut totals = vec![0u64; SIGMA];
        for (sblock_idx, local) in sblock_totals.iter().enumerate() {
            let dst = &mut sblock_counts[sblock_idx * SIGMA..(sblock_idx + 1) * SIGMA];
            dst.copy_from_slice(&totals);
            for c in 0..SIGMA {
                totals[c] += local[c];
            }
        }

        RankSupport {
            seq,
            sblock_counts,
            block_counts,
            totals,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    /// Total number of occurrences of `c` in the sequence.
    pub fn total(&self, c: u8) -> u64 {
        self.totals[c as usize]
    }

    // --------------------------------------------------
    /// First-column table over a partial BWT: `count[c]` is the number of
    /// block suffixes starting with a symbol below c. The totals are
    /// corrected before the prefix sum: +1 for `last` (the block's final
    /// symbol has no BWT slot) and −1 for byte 0 (the dummy written at i0).
    pub fn bwt_count_table(&self, last: u8) -> [u64; 256] {
        let mut counts = [0u64; 256];
        counts.copy_from_slice(&self.totals);
        counts[last as usize] += 1;
        counts[0] -= 1;

        let mut sum = 0u64;
        for count in counts.iter_mut() {
            let val = *count;
            *count = sum;
            sum += val;
        }
        counts
    }

    // --------------------------------------------------
    /// `|{j < i : seq[j] = c}|` for i in [0, len].
    #[inline]
    pub fn rank(&self, i: usize, c: u8) -> u64 {
        debug_assert!(i <= self.seq.len());
        if i == self.seq.len() {
            return self.totals[c as usize];
        }

        let sblock = (i >> SBLOCK_LOG) * SIGMA + c as usize;
        let block = (i >> BLOCK_LOG) * SIGMA + c as usize;
        let scan_beg = i & !(BLOCK_SIZE - 1);
        let scanned = self.seq[scan_beg..i]
            .iter()
            .filter(|&&byte| byte == c)
            .count() as u64;

        self.sblock_counts[sblock] + self.block_counts[block] as u64 + scanned
    }
}
