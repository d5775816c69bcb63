//! Gap computation between two sibling ranges of one block.
//!
//! The right range is streamed right-to-left through the rank structure
//! over the left range's BWT. Worker seeds come from the block rank
//! matrix (rightmost segment) and from bounded text comparison refined
//! against the sparse ISA (the rest); the right range's `gt_begin`
//! resolves any comparison that crosses the left range's end.

use crate::{
    bitvector::{bit_set, Bitvector},
    gap_array::GapArray,
    gap_buffer::{GapBuffer, Partitioner},
    gt::TailInfo,
    initial_ranks::position_greater,
    rank::RankSupport,
    sparse_isa::SparseIsa,
    update::updater_loop,
};
use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, SeedableRng};
use std::cmp::Ordering;
use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    mpsc::{sync_channel, Receiver, SyncSender},
    Arc, Mutex,
};

// --------------------------------------------------
#[derive(Debug)]
pub struct InmemGapParams<'a> {
    /// The whole block, original byte values.
    pub text: &'a [u8],
    pub tail: Option<&'a TailInfo<'a>>,

    /// Block-reversed `gt_begin`; the bits of [right_beg, right_end) must
    /// currently be relative to the right range's own begin.
    pub gt_begin: &'a Bitvector,

    /// Rank of T[right_end..] among the left range's suffixes, summed
    /// from the block rank matrix.
    pub matrix_rank: u64,

    pub n_threads: usize,
    pub n_increasers: usize,
    pub buf_elems: usize,
    pub random_seed: u64,
}

// --------------------------------------------------
/// Returns the gap array of the left range (length left_size + 1) and,
/// when requested, the `gt` bits of the right range relative to the left
/// range's begin, indexed forward from right_beg.
#[allow(clippy::too_many_arguments)]
pub fn inmem_compute_gap(
    rank: &RankSupport,
    left_psa: &[u32],
    left_i0: usize,
    left_beg: usize,
    left_end: usize,
    right_end: usize,
    need_gt_out: bool,
    params: &InmemGapParams,
) -> Result<(GapArray, Option<Bitvector>)> {
    let left_size = left_end - left_beg;
    let right_beg = left_end;
    let right_size = right_end - right_beg;
    let left_last = params.text[left_end - 1];
    let count = rank.bwt_count_table(left_last);

    // Segments of the right range, byte-aligned for the gt writers.
    let mut seg_size = right_size.div_ceil(params.n_threads).max(1);
    while seg_size & 7 != 0 {
        seg_size += 1;
    }
    let mut seg_bounds = vec![right_beg];
    let mut cur = right_beg;
    while cur < right_end {
        cur = (cur + seg_size).min(right_end);
        seg_bounds.push(cur);
    }
    let n_segments = seg_bounds.len() - 1;

    let seeds = compute_seeds(
        rank, left_psa, left_i0, left_beg, left_end, right_end, &seg_bounds,
        &count, left_last, params,
    )?;

    // Stream all segments, updaters draining in parallel.
    let mut gap = GapArray::new_in_memory(left_size + 1);
    let mut gt_out = need_gt_out.then(|| Bitvector::new(right_size));

    let n_buffers = 2 * n_segments;
    let (empty_tx, empty_rx) = sync_channel::<GapBuffer>(n_buffers);
    let (full_tx, full_rx) = sync_channel::<GapBuffer>(n_buffers);
    for _ in 0..n_buffers {
        empty_tx.send(GapBuffer::new(params.buf_elems)).unwrap();
    }
    let empty_rx = Arc::new(Mutex::new(empty_rx));
    let abort = AtomicBool::new(false);

    let (count_slots, sink) = gap.split_for_update();
    let gap_len = count_slots.len();

    // Per-segment byte chunks of the gt output.
    let mut gt_chunks: Vec<Option<&mut [u8]>> = vec![];
    match &mut gt_out {
        Some(out) => {
            let mut rest: &mut [u8] = out.as_bytes_mut();
            for t in 0..n_segments {
                let bits = (seg_bounds[t + 1] - seg_bounds[t]).div_ceil(8) * 8;
                let bytes = (bits / 8).min(rest.len());
                let (chunk, remainder) = rest.split_at_mut(bytes);
                rest = remainder;
                gt_chunks.push(Some(chunk));
            }
        }
        None => gt_chunks.resize_with(n_segments, || None),
    }

    let results: Vec<Result<()>> = std::thread::scope(|scope| {
        let updater =
            scope.spawn(|| updater_loop(full_rx, empty_tx, count_slots, sink));

        let handles: Vec<_> = gt_chunks
            .into_iter()
            .enumerate()
            .map(|(t, gt_chunk)| {
                let full_tx = full_tx.clone();
                let empty_rx = Arc::clone(&empty_rx);
                let count = &count;
                let abort = &abort;
                let seg_beg = seg_bounds[t];
                let seg_end = seg_bounds[t + 1];
                let seed = seeds[t];
                scope.spawn(move || {
                    let res = stream_segment(
                        rank, params, count, gap_len, left_i0, left_last,
                        seg_beg, seg_end, seed, t, gt_chunk, full_tx, empty_rx,
                        abort,
                    );
                    if res.is_err() {
                        abort.store(true, AtomicOrdering::Relaxed);
                    }
                    res
                })
            })
            .collect();
        drop(full_tx);

        let mut results: Vec<Result<()>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.push(
            updater
                .join()
                .unwrap_or_else(|_| Err(anyhow!("gap updater panicked"))),
        );
        results
    });
    for res in results {
        res?;
    }

    Ok((gap, gt_out))
}

// --------------------------------------------------
/// Seeds: the rank of T[seg_end − 1..] among the left suffixes, for every
/// segment, right to left.
#[allow(clippy::too_many_arguments)]
fn compute_seeds(
    rank: &RankSupport,
    left_psa: &[u32],
    left_i0: usize,
    left_beg: usize,
    left_end: usize,
    right_end: usize,
    seg_bounds: &[usize],
    count: &[u64; 256],
    left_last: u8,
    params: &InmemGapParams,
) -> Result<Vec<u64>> {
    let text = params.text;
    let left_size = left_end - left_beg;
    let n_segments = seg_bounds.len() - 1;
    let mut seeds = vec![0u64; n_segments];

    // Rightmost segment: one backward-search step from the matrix rank.
    {
        let c = text[right_end - 1];
        let i = params.matrix_rank as usize;
        let delta = (i > left_i0 && c == 0) as u64;
        let mut seed = count[c as usize] + rank.rank(i, c) - delta;
        if c == left_last && position_greater(text, params.tail, right_end, left_end)? {
            seed += 1;
        }
        seeds[n_segments - 1] = seed;
    }

    if n_segments == 1 {
        return Ok(seeds);
    }

    // Bounded comparison narrows each remaining boundary to a range of
    // left suffixes sharing the pattern's prefix.
    let ranges: Vec<(usize, usize)> = (0..n_segments - 1)
        .map(|t| {
            let pos = seg_bounds[t + 1] - 1;
            let limit = seg_bounds[t + 2] - seg_bounds[t + 1];
            compute_range(text, left_psa, left_beg, pos, limit)
        })
        .collect();

    let nontrivial = ranges.iter().any(|&(lo, hi)| lo != hi);
    let isa = if nontrivial {
        Some(SparseIsa::new(
            left_psa,
            &text[left_beg..left_end],
            left_i0,
            rank,
        ))
    } else {
        None
    };

    // Refine right to left, each boundary anchored on the one after it.
    let mut prev_rank = seeds[n_segments - 1];
    for t in (0..n_segments - 1).rev() {
        let pos = seg_bounds[t + 1] - 1;
        let limit = seg_bounds[t + 2] - seg_bounds[t + 1];
        let (mut lo, mut hi) = ranges[t];
        while lo < hi {
            let mid = (lo + hi) / 2;
            let sa_mid = left_psa[mid] as usize;
            if sa_mid + limit >= left_size {
                // The suffix crossed the left range's end inside the
                // matched prefix; the right range's gt bit decides.
                let q = pos + (left_size - sa_mid);
                if params.gt_begin.get_rev(q) {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            } else {
                let j = sa_mid + limit;
                if (isa.as_ref().unwrap().query(j) as u64) < prev_rank {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
        }
        seeds[t] = lo as u64;
        prev_rank = lo as u64;
    }

    Ok(seeds)
}

// --------------------------------------------------
/// Range of left suffixes whose first `limit` characters match the
/// pattern at `pos`. All reads stay inside the block.
fn compute_range(
    text: &[u8],
    left_psa: &[u32],
    left_beg: usize,
    pos: usize,
    limit: usize,
) -> (usize, usize) {
    let bounded = |sa: u32| -> Ordering {
        let suf = left_beg + sa as usize;
        for el in 0..limit {
            let a = text[suf + el];
            let b = text[pos + el];
            if a != b {
                return if a < b { Ordering::Less } else { Ordering::Greater };
            }
        }
        Ordering::Equal
    };

    let lo = left_psa.partition_point(|&sa| bounded(sa) == Ordering::Less);
    let hi = left_psa.partition_point(|&sa| bounded(sa) != Ordering::Greater);
    (lo, hi)
}

// --------------------------------------------------
#[allow(clippy::too_many_arguments)]
fn stream_segment(
    rank: &RankSupport,
    params: &InmemGapParams,
    count: &[u64; 256],
    gap_len: usize,
    i0: usize,
    last: u8,
    seg_beg: usize,
    seg_end: usize,
    seed: u64,
    worker_idx: usize,
    mut gt_chunk: Option<&mut [u8]>,
    full_tx: SyncSender<GapBuffer>,
    empty_rx: Arc<Mutex<Receiver<GapBuffer>>>,
    abort: &AtomicBool,
) -> Result<()> {
    let text = params.text;
    let buf_elems = params.buf_elems;
    let mut temp = vec![0u32; buf_elems];
    let mut filled = 0usize;
    let mut partitioner = Partitioner::new(
        gap_len,
        params.n_increasers,
        buf_elems,
        StdRng::seed_from_u64(params.random_seed ^ (worker_idx as u64) << 32),
    );
    partitioner.reset();

    let mut i = seed as usize;
    let flush = |temp: &mut Vec<u32>,
                     filled: &mut usize,
                     partitioner: &mut Partitioner|
     -> Result<()> {
        let mut buf = empty_rx
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| anyhow!("gap updater terminated early"))?;
        partitioner.partition(&temp[..*filled], &mut buf);
        full_tx
            .send(buf)
            .map_err(|_| anyhow!("gap updater terminated early"))?;
        partitioner.reset();
        *filled = 0;
        Ok(())
    };

    // Emit the seeded position, then walk left.
    for j in (seg_beg..seg_end).rev() {
        if j < seg_end - 1 {
            let c = text[j];
            let gt_bit = params.gt_begin.get_rev(j + 1);
            let delta = (i > i0 && c == 0) as u64;
            i = (count[c as usize] + rank.rank(i, c) - delta) as usize;
            if c == last && gt_bit {
                i += 1;
            }
        }
        if let Some(chunk) = gt_chunk.as_deref_mut() {
            if i > i0 {
                bit_set(chunk, j - seg_beg);
            }
        }
        temp[filled] = i as u32;
        partitioner.note(i as u32);
        filled += 1;
        if filled == buf_elems {
            flush(&mut temp, &mut filled, &mut partitioner)?;
            if abort.load(AtomicOrdering::Relaxed) {
                return Ok(());
            }
        }
    }
    if filled > 0 {
        flush(&mut temp, &mut filled, &mut partitioner)?;
    }
    Ok(())
}
