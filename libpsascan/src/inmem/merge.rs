//! Balanced merge of the sorted sub-blocks of one block.
//!
//! A range of sub-blocks is merged by sorting its left part, streaming
//! the right part through the left part's rank (producing the gap as a
//! bitvector) and interleaving the two partial SAs and BWTs. The schedule
//! bounds the left side so the transient rank + gap stay inside the
//! memory model.

use super::gap::{inmem_compute_gap, InmemGapParams};
use crate::{bitvector::Bitvector, gt::TailInfo, rank::RankSupport};
use anyhow::Result;
use log::debug;

// --------------------------------------------------
/// One sorted range of the block, [beg, end) block-local, SA values
/// relative to `beg`.
#[derive(Debug)]
pub struct SortedRange {
    pub beg: usize,
    pub end: usize,
    pub psa: Vec<u32>,
    pub bwt: Vec<u8>,
    pub i0: usize,
}

// --------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct MergeSchedule {
    pub max_left_blocks: usize,
}

impl MergeSchedule {
    /// The cap follows the peak-memory model: the transient structures of
    /// a merge cost about 5 bytes per left-side byte on top of the
    /// (2.125 + record width) bytes every block byte already holds.
    pub fn new(n_blocks: usize, ram_per_input_byte: usize) -> Self {
        let spare = ram_per_input_byte as f64 - (2.125 + 4.0);
        let max_left_blocks =
            (((n_blocks as f64) * spare / 5.0).floor() as usize).max(1);
        MergeSchedule { max_left_blocks }
    }

    /// How many of `n` sub-blocks go to the left side.
    pub fn left_count(&self, n: usize) -> usize {
        (n / 2).max(1).min(self.max_left_blocks)
    }
}

// --------------------------------------------------
pub struct MergeContext<'a> {
    pub text: &'a [u8],
    pub tail: Option<&'a TailInfo<'a>>,
    pub bounds: &'a [usize],
    pub matrix: &'a [Vec<u64>],
    pub schedule: MergeSchedule,
    pub n_threads: usize,
    pub n_increasers: usize,
    pub buf_elems: usize,
    pub random_seed: u64,
}

// --------------------------------------------------
/// Merge sub-blocks [lo, hi) into one sorted range. `gt_begin` holds,
/// for every not-yet-merged range, its bits relative to its own begin;
/// after the call the bits of [lo, hi) are relative to `bounds[lo − 1]`'s
/// end (when `need_gt` is set).
pub fn balanced_merge(
    ctx: &MergeContext,
    parts: &mut [Option<SortedRange>],
    gt_begin: &mut Bitvector,
    lo: usize,
    hi: usize,
    need_gt: bool,
) -> Result<SortedRange> {
    if hi - lo == 1 {
        return Ok(parts[lo].take().expect("sub-block already consumed"));
    }

    let m = ctx.schedule.left_count(hi - lo);
    debug!(
        "merge [{lo}, {hi}): left {} block{}, right {}",
        m,
        if m == 1 { "" } else { "s" },
        hi - lo - m
    );
    let left = balanced_merge(ctx, parts, gt_begin, lo, lo + m, need_gt)?;
    let right = balanced_merge(ctx, parts, gt_begin, lo + m, hi, true)?;

    // Rank of T[right.end..] among the left range's suffixes, summed over
    // the matrix rows of the left range.
    let matrix_rank: u64 =
        (lo..lo + m).map(|r| ctx.matrix[r][hi - 1]).sum();

    merge_pair(ctx, left, right, matrix_rank, gt_begin, need_gt)
}

// --------------------------------------------------
fn merge_pair(
    ctx: &MergeContext,
    left: SortedRange,
    right: SortedRange,
    matrix_rank: u64,
    gt_begin: &mut Bitvector,
    need_gt: bool,
) -> Result<SortedRange> {
    let block_len = ctx.text.len();
    let left_size = left.end - left.beg;
    let right_size = right.end - right.beg;
    let left_last = ctx.text[left.end - 1];

    let rank = RankSupport::new(left.bwt);
    let (gap, gt_out) = {
        let params = InmemGapParams {
            text: ctx.text,
            tail: ctx.tail,
            gt_begin,
            matrix_rank,
            n_threads: ctx.n_threads,
            n_increasers: ctx.n_increasers,
            buf_elems: ctx.buf_elems,
            random_seed: ctx.random_seed,
        };
        inmem_compute_gap(
            &rank, &left.psa, left.i0, left.beg, left.end, right.end,
            need_gt, &params,
        )?
    };
    let gap_bv = gap.into_bitvector(left_size + right_size)?;

    // Interleave: a set bit takes the next left entry.
    let offset = (right.beg - left.beg) as u32;
    let mut psa = Vec::with_capacity(left_size + right_size);
    let mut bwt = Vec::with_capacity(left_size + right_size);
    let mut i0 = 0usize;
    let (mut li, mut ri) = (0usize, 0usize);
    let left_bwt = rank.seq();
    for pos in 0..left_size + right_size {
        if gap_bv.get(pos) {
            if li == left.i0 {
                i0 = pos;
            }
            psa.push(left.psa[li]);
            bwt.push(left_bwt[li]);
            li += 1;
        } else {
            // The right range's dummy slot becomes the left range's last
            // symbol in the combined BWT.
            let byte = if ri == right.i0 {
                left_last
            } else {
                right.bwt[ri]
            };
            psa.push(right.psa[ri] + offset);
            bwt.push(byte);
            ri += 1;
        }
    }

    if let Some(out) = gt_out {
        for j in right.beg..right.end {
            if out.get(j - right.beg) {
                gt_begin.set(block_len - 1 - j);
            } else {
                gt_begin.reset(block_len - 1 - j);
            }
        }
    }

    Ok(SortedRange {
        beg: left.beg,
        end: right.end,
        psa,
        bwt,
        i0,
    })
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::MergeSchedule;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_schedule_balanced_when_unconstrained() -> Result<()> {
        let schedule = MergeSchedule::new(8, 12);
        assert_eq!(schedule.left_count(8), 4);
        assert_eq!(schedule.left_count(3), 1);
        assert_eq!(schedule.left_count(2), 1);
        Ok(())
    }

    #[test]
    fn test_schedule_skews_under_pressure() -> Result<()> {
        let schedule = MergeSchedule { max_left_blocks: 2 };
        assert_eq!(schedule.left_count(16), 2);
        assert_eq!(schedule.left_count(4), 2);
        assert_eq!(schedule.left_count(2), 1);
        Ok(())
    }
}
