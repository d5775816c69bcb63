//! Parallel backward search over the tail of the text.
//!
//! Each worker owns one segment of the right context and walks it right to
//! left through the rank structure of the block's BWT, emitting one gap
//! index per position and the matching bit of the new tail `gt`. Buffers
//! travel worker → updater through a bounded channel and come back empty
//! through another; a worker that finishes simply drops its sender, and
//! the updater stops once every sender is gone and the channel is dry.

use crate::{
    gap_array::GapArray,
    gap_buffer::{GapBuffer, Partitioner},
    io::{
        backward_reader::BackwardChunkReader,
        bit_stream::BitStreamWriter,
        multifile::{Multifile, MultifileBitReader},
    },
    rank::RankSupport,
    types::random_hash,
    update::updater_loop,
};
use anyhow::{anyhow, Result};
use log::debug;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{sync_channel, Receiver, SyncSender},
    Arc, Mutex,
};

const TEXT_CHUNK: usize = 1 << 20;

// --------------------------------------------------
#[derive(Debug)]
pub struct StreamParams<'a> {
    pub text_filename: &'a str,
    pub block_end: u64,
    pub text_len: u64,

    /// Last symbol of the block.
    pub last_byte: u8,

    /// Rank position of the block's first suffix.
    pub i0: usize,

    pub n_increasers: usize,
    pub buf_elems: usize,
    pub random_seed: u64,

    /// Prefix for the per-segment `gt` files left for the next iteration.
    pub gt_out_prefix: &'a str,
}

// --------------------------------------------------
/// Split [block_end, text_len) into at most `n_workers` segments.
pub fn segment_bounds(block_end: u64, text_len: u64, n_workers: usize) -> Vec<u64> {
    let tail_len = text_len - block_end;
    let n_segments = (n_workers as u64).min(tail_len).max(1);
    let seg_size = tail_len.div_ceil(n_segments);
    let mut bounds = vec![block_end];
    let mut cur = block_end;
    while cur < text_len {
        cur = (cur + seg_size).min(text_len);
        bounds.push(cur);
    }
    bounds
}

// --------------------------------------------------
/// Stream the whole tail, filling `gap` and writing the new tail `gt`
/// bits. `init_ranks[t]` must hold the rank of the suffix starting at
/// `seg_bounds[t + 1] − 1`. Returns the multifile entries (reversed bit
/// ranges) of the freshly written `gt` files.
pub fn compute_gap(
    rank: &RankSupport,
    params: &StreamParams,
    tail_gt: &Multifile,
    init_ranks: &[u64],
    seg_bounds: &[u64],
    gap: &mut GapArray,
) -> Result<Vec<(u64, u64, String)>> {
    let n_segments = seg_bounds.len() - 1;
    debug_assert_eq!(init_ranks.len(), n_segments);
    let count = rank.bwt_count_table(params.last_byte);

    let gt_files: Vec<String> = (0..n_segments)
        .map(|_| format!("{}.{}", params.gt_out_prefix, random_hash()))
        .collect();

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

    let worker_errors: Vec<Result<()>> = std::thread::scope(|scope| {
        let updater = scope.spawn(|| updater_loop(full_rx, empty_tx, count_slots, sink));

        let handles: Vec<_> = (0..n_segments)
            .map(|t| {
                let full_tx = full_tx.clone();
                let empty_rx = Arc::clone(&empty_rx);
                let gt_file = gt_files[t].clone();
                let count = &count;
                let abort = &abort;
                scope.spawn(move || {
                    let res = stream_worker(
                        rank,
                        params,
                        tail_gt,
                        count,
                        gap_len,
                        seg_bounds[t],
                        seg_bounds[t + 1],
                        init_ranks[t],
                        t,
                        &gt_file,
                        full_tx,
                        empty_rx,
                        abort,
                    );
                    if res.is_err() {
                        abort.store(true, Ordering::Relaxed);
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

    for res in worker_errors {
        res?;
    }

    Ok((0..n_segments)
        .map(|t| {
            (
                params.text_len - seg_bounds[t + 1],
                params.text_len - seg_bounds[t],
                gt_files[t].clone(),
            )
        })
        .collect())
}

// --------------------------------------------------
#[allow(clippy::too_many_arguments)]
fn stream_worker(
    rank: &RankSupport,
    params: &StreamParams,
    tail_gt: &Multifile,
    count: &[u64; 256],
    gap_len: usize,
    seg_beg: u64,
    seg_end: u64,
    init_rank: u64,
    worker_idx: usize,
    gt_file: &str,
    full_tx: SyncSender<GapBuffer>,
    empty_rx: Arc<Mutex<Receiver<GapBuffer>>>,
    abort: &AtomicBool,
) -> Result<()> {
    let i0 = params.i0;
    let last = params.last_byte;
    let buf_elems = params.buf_elems;

    let mut temp = vec![0u32; buf_elems];
    let mut filled = 0usize;
    let mut partitioner = Partitioner::new(
        gap_len,
        params.n_increasers,
        buf_elems,
        StdRng::seed_from_u64(params.random_seed ^ worker_idx as u64),
    );
    partitioner.reset();

    let mut gt_writer = BitStreamWriter::new(gt_file, 1 << 16)?;
    let mut gt_reader =
        MultifileBitReader::new(tail_gt, params.text_len - seg_end)?;
    let mut text_reader = BackwardChunkReader::new(
        params.text_filename,
        seg_beg,
        seg_end - 1,
        TEXT_CHUNK,
    )?;

    // The seed is the rank at the segment's rightmost position; every
    // following step consumes one text byte and one old-tail gt bit, both
    // strictly inside the segment's reach.
    let mut i = init_rank as usize;
    let emit = |i: usize,
                    filled: &mut usize,
                    temp: &mut Vec<u32>,
                    partitioner: &mut Partitioner,
                    gt_writer: &mut BitStreamWriter|
     -> Result<()> {
        gt_writer.write(i > i0)?;
        temp[*filled] = i as u32;
        partitioner.note(i as u32);
        *filled += 1;
        if *filled == buf_elems {
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
        }
        Ok(())
    };

    emit(i, &mut filled, &mut temp, &mut partitioner, &mut gt_writer)?;

    while let Some(chunk) = text_reader.next_chunk()? {
        if abort.load(Ordering::Relaxed) {
            return Ok(());
        }
        for &c in chunk.iter().rev() {
            let gt_bit = gt_reader.next()?;
            let delta = (i > i0 && c == 0) as u64;
            i = (count[c as usize] + rank.rank(i, c) - delta) as usize;
            if c == last && gt_bit {
                i += 1;
            }
            emit(i, &mut filled, &mut temp, &mut partitioner, &mut gt_writer)?;
        }
        text_reader.recycle(chunk);
    }

    if filled > 0 {
        let mut buf = empty_rx
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| anyhow!("gap updater terminated early"))?;
        partitioner.partition(&temp[..filled], &mut buf);
        full_tx
            .send(buf)
            .map_err(|_| anyhow!("gap updater terminated early"))?;
    }

    let bits = gt_writer.finish()?;
    debug!(
        "segment [{seg_beg}, {seg_end}): wrote {} gt bits",
        bits * 8
    );
    Ok(())
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{compute_gap, segment_bounds, StreamParams};
    use crate::{
        bitvector::Bitvector,
        bwt::bwt_from_sa,
        gap_array::GapArray,
        initial_ranks::tail_boundary_ranks,
        io::multifile::Multifile,
        rank::RankSupport,
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Write;
    use tempfile::TempDir;

    fn run_stream(full: &[u8], block_len: usize, n_workers: usize) -> Result<()> {
        let dir = TempDir::new()?;
        let text_path = dir.path().join("text").to_string_lossy().to_string();
        std::fs::File::create(&text_path)?.write_all(full)?;

        let text = &full[..block_len];
        let total = full.len();
        let tail_len = total - block_len;

        // Old tail gt (reference = block end), brute force, on disk.
        let mut tail_gt = Multifile::new();
        let mut bv = Bitvector::new(tail_len);
        for g in block_len..total {
            if full[g..] > full[block_len..] {
                bv.set(total - 1 - g);
            }
        }
        let gt_path = dir.path().join("tail.gt").to_string_lossy().to_string();
        bv.save(&gt_path)?;
        tail_gt.add_file(0, tail_len as u64, &gt_path);

        // Partial SA in extended (full-text) suffix order.
        let mut psa: Vec<u32> = (0..block_len as u32).collect();
        psa.sort_by(|&a, &b| full[a as usize..].cmp(&full[b as usize..]));
        let (bwt, i0) = bwt_from_sa(text, &psa)?;
        let rank = RankSupport::new(bwt);

        let seg_bounds =
            segment_bounds(block_len as u64, total as u64, n_workers);
        let positions: Vec<u64> =
            seg_bounds[1..].iter().map(|&e| e - 1).collect();
        let init_ranks = tail_boundary_ranks(
            &text_path,
            text,
            &psa,
            block_len as u64,
            total as u64,
            &tail_gt,
            &positions,
        )?;

        let gap_prefix = dir.path().join("work").to_string_lossy().to_string();
        let mut gap = GapArray::new(block_len + 1, &gap_prefix);
        let params = StreamParams {
            text_filename: &text_path,
            block_end: block_len as u64,
            text_len: total as u64,
            last_byte: text[block_len - 1],
            i0,
            n_increasers: 3,
            buf_elems: 64,
            random_seed: 42,
            gt_out_prefix: &gap_prefix,
        };
        let entries =
            compute_gap(&rank, &params, &tail_gt, &init_ranks, &seg_bounds, &mut gap)?;

        // Expected gap: insertion rank of every tail suffix.
        let mut expected = vec![0u64; block_len + 1];
        for g in block_len..total {
            let rank_g =
                (0..block_len).filter(|&s| full[s..] < full[g..]).count();
            expected[rank_g] += 1;
        }
        let values = gap.into_values()?;
        assert_eq!(values, expected);
        assert_eq!(values.iter().sum::<u64>(), tail_len as u64);

        // Expected new-tail gt: reference moves to the block's begin.
        let mut new_gt = Multifile::new();
        for (beg, end, file) in entries {
            new_gt.add_file(beg, end, &file);
        }
        let mut reader =
            crate::io::multifile::MultifileBitReader::new(&new_gt, 0)?;
        for g in (block_len..total).rev() {
            let expected_bit = full[g..] > full[0..];
            assert_eq!(reader.next()?, expected_bit, "gt bit at {g}");
        }
        Ok(())
    }

    #[test]
    fn test_stream_small_random() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(9);
        for (block_len, total, workers) in
            [(30usize, 100usize, 1usize), (50, 300, 4), (64, 600, 7)]
        {
            let full: Vec<u8> =
                (0..total).map(|_| rng.gen_range(b'a'..=b'c')).collect();
            run_stream(&full, block_len, workers)?;
        }
        Ok(())
    }

    #[test]
    fn test_stream_repetitive() -> Result<()> {
        // Unary text keeps every step in the same slot and on the
        // fallback partition path.
        let full = vec![b'a'; 800];
        run_stream(&full, 100, 3)?;

        let full: Vec<u8> = std::iter::repeat(b"ab".as_slice())
            .take(300)
            .flatten()
            .copied()
            .collect();
        run_stream(&full, 80, 2)?;
        Ok(())
    }
}
