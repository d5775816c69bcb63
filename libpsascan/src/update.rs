//! Gap updater: drains partitioned buffers into the gap array.
//!
//! One coordinator thread pulls buffers off the full channel; each buffer
//! is applied by parallel tasks, one per super-bucket. The partition
//! guarantees the slot ranges are disjoint, so the counter array is
//! simply split and no byte is ever contended; only the excess paths
//! lock, and only briefly.

use crate::{
    gap_array::{ExcessSink, EXCESS_STAGING},
    gap_buffer::GapBuffer,
};
use anyhow::Result;
use std::sync::{
    mpsc::{Receiver, SyncSender},
    Mutex,
};

// --------------------------------------------------
/// Runs until every worker has dropped its sender and the full channel
/// has drained.
pub fn updater_loop(
    full_rx: Receiver<GapBuffer>,
    empty_tx: SyncSender<GapBuffer>,
    count: &mut [u8],
    sink: ExcessSink<'_>,
) -> Result<()> {
    while let Ok(buf) = full_rx.recv() {
        apply_buffer(&buf, count, sink)?;
        // Near shutdown the workers may already be gone; the buffer is
        // then simply dropped.
        let _ = empty_tx.send(buf);
    }
    Ok(())
}

// --------------------------------------------------
pub fn apply_buffer(
    buf: &GapBuffer,
    count: &mut [u8],
    sink: ExcessSink<'_>,
) -> Result<()> {
    let gap_len = count.len();
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    rayon::scope(|scope| {
        let mut rest = count;
        let mut offset = 0usize;
        for (t, sblock) in buf.sblocks.iter().enumerate() {
            let hi = buf
                .sblocks
                .get(t + 1)
                .map_or(gap_len, |next| next.value_lo.min(gap_len));
            let (chunk, remainder) = rest.split_at_mut(hi - offset);
            rest = remainder;
            let lo = offset;
            offset = hi;

            if sblock.len == 0 {
                continue;
            }
            let seg = &buf.content[sblock.beg..sblock.beg + sblock.len];
            let errors = &first_error;
            scope.spawn(move |_| {
                if let Err(e) = update_sblock(seg, chunk, lo, sink) {
                    let mut guard = errors.lock().unwrap();
                    guard.get_or_insert(e);
                }
            });
        }
    });

    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// --------------------------------------------------
fn update_sblock(
    seg: &[u32],
    chunk: &mut [u8],
    lo: usize,
    sink: ExcessSink<'_>,
) -> Result<()> {
    let mut staged: Vec<u32> = Vec::with_capacity(EXCESS_STAGING.min(1 << 10));
    for &x in seg {
        let slot = &mut chunk[x as usize - lo];
        *slot = slot.wrapping_add(1);
        if *slot == 0 {
            staged.push(x);
            if staged.len() == EXCESS_STAGING {
                sink.spill(&staged)?;
                staged.clear();
            }
        }
    }
    if !staged.is_empty() {
        sink.flush(&staged);
    }
    Ok(())
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::apply_buffer;
    use crate::{
        gap_array::GapArray,
        gap_buffer::{GapBuffer, Partitioner},
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_apply_matches_direct_counting() -> Result<()> {
        let gap_len = 5000usize;
        let mut rng = StdRng::seed_from_u64(4);
        let mut expected = vec![0u64; gap_len];
        let mut gap = GapArray::new_in_memory(gap_len);

        let mut partitioner = Partitioner::new(
            gap_len,
            4,
            2048,
            StdRng::seed_from_u64(5),
        );
        for _ in 0..6 {
            let values: Vec<u32> = (0..2048)
                .map(|_| rng.gen_range(0..gap_len as u32))
                .collect();
            for &v in &values {
                expected[v as usize] += 1;
            }

            partitioner.reset();
            for &v in &values {
                partitioner.note(v);
            }
            let mut buf = GapBuffer::new(2048);
            partitioner.partition(&values, &mut buf);

            let (count, sink) = gap.split_for_update();
            apply_buffer(&buf, count, sink)?;
        }

        assert_eq!(gap.into_values()?, expected);
        Ok(())
    }

    #[test]
    fn test_overflowing_slot() -> Result<()> {
        // One slot takes 70000 hits; the byte counter must wrap into the
        // excess list and reassemble on finalisation.
        let gap_len = 16usize;
        let mut gap = GapArray::new_in_memory(gap_len);
        let mut partitioner =
            Partitioner::new(gap_len, 2, 1024, StdRng::seed_from_u64(6));

        let mut remaining = 70_000usize;
        while remaining > 0 {
            let n = remaining.min(1024);
            let values = vec![9u32; n];
            partitioner.reset();
            for &v in &values {
                partitioner.note(v);
            }
            let mut buf = GapBuffer::new(1024);
            partitioner.partition(&values, &mut buf);
            let (count, sink) = gap.split_for_update();
            apply_buffer(&buf, count, sink)?;
            remaining -= n;
        }

        let values = gap.into_values()?;
        assert_eq!(values[9], 70_000);
        assert_eq!(values.iter().sum::<u64>(), 70_000);
        Ok(())
    }
}
