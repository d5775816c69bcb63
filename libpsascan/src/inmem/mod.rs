//! In-memory sorter for one block: gt bitvectors, renamed sub-block
//! sorting, BWT, rank matrix and the balanced merge, producing the
//! block's partial SA, BWT, i0 and (when requested) its `gt_begin`.

pub mod gap;
pub mod merge;

use crate::{
    bitvector::Bitvector,
    bwt::bwt_from_sa,
    gt::{compute_gt_end, gt_end_to_gt_begin, sub_block_bounds, TailInfo},
    initial_ranks::block_rank_matrix,
    suffix_sort::sort_block,
};
use anyhow::{bail, Result};
use log::{debug, info};
use merge::{balanced_merge, MergeContext, MergeSchedule, SortedRange};
use rayon::prelude::*;
use std::time::Instant;

// --------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct InmemParams {
    pub n_threads: usize,
    pub n_increasers: usize,
    pub buf_elems: usize,
    pub random_seed: u64,
    pub ram_per_input_byte: usize,
}

// --------------------------------------------------
#[derive(Debug)]
pub struct InmemResult {
    pub psa: Vec<u32>,
    pub bwt: Vec<u8>,
    pub i0: usize,
    pub gt_begin: Option<Bitvector>,
}

// --------------------------------------------------
/// Sort one block consistently with its right context. The text is
/// renamed for the sort and restored before returning; any byte 255 in
/// the block is rejected before the first mutation.
pub fn inmem_sufsort(
    text: &mut [u8],
    tail: Option<&TailInfo>,
    need_gt_begin: bool,
    params: &InmemParams,
) -> Result<InmemResult> {
    let len = text.len();
    if len == 0 {
        return Ok(InmemResult {
            psa: vec![],
            bwt: vec![],
            i0: 0,
            gt_begin: need_gt_begin.then(|| Bitvector::new(0)),
        });
    }

    let mut max_sub = len.div_ceil(params.n_threads).max(1);
    while max_sub & 7 != 0 {
        max_sub += 1;
    }
    let bounds = sub_block_bounds(len, max_sub);
    let n_sub = bounds.len();
    debug!("block of {len} bytes in {n_sub} sub-blocks of <= {max_sub}");

    let has_context = n_sub > 1 || tail.is_some();

    // gt over the original text, before any renaming.
    let now = Instant::now();
    let gt_end = if has_context || need_gt_begin {
        Some(compute_gt_end(text, &bounds, tail)?)
    } else {
        None
    };
    let mut gt_begin = match &gt_end {
        Some(gt_end) if n_sub > 1 || need_gt_begin => {
            Some(gt_end_to_gt_begin(text, &bounds, gt_end)?)
        }
        _ => None,
    };
    info!("  gt bitvectors: {:?}", now.elapsed());

    // Rename, sort every sub-block, restore. The 255 guard runs before
    // the first mutation so a rejected text is returned untouched.
    let now = Instant::now();
    if has_context {
        if text.contains(&255) {
            bail!("byte with value 255 detected in the input text");
        }
        rename_blocks(text, &bounds, gt_end.as_ref().unwrap());
    }
    let chunk_bounds: Vec<(usize, usize)> = bounds
        .iter()
        .scan(0usize, |beg, &end| {
            let range = (*beg, end);
            *beg = end;
            Some(range)
        })
        .collect();
    let psas: Vec<Vec<u32>> = {
        // The chunks are read-only during the sort.
        let text = &*text;
        chunk_bounds
            .par_iter()
            .map(|&(beg, end)| sort_block(&text[beg..end]))
            .collect::<Result<_>>()?
    };
    if has_context {
        rerename_blocks(text, &bounds);
    }
    info!("  sub-block sorting: {:?}", now.elapsed());

    // BWT and i0 of every sub-block, over the restored text.
    let now = Instant::now();
    let text_ro: &[u8] = text;
    let bwts: Vec<(Vec<u8>, usize)> = chunk_bounds
        .par_iter()
        .zip(psas.par_iter())
        .map(|(&(beg, end), psa)| bwt_from_sa(&text_ro[beg..end], psa))
        .collect::<Result<_>>()?;

    let matrix = block_rank_matrix(text_ro, &bounds, &psas, tail)?;
    info!("  bwt + rank matrix: {:?}", now.elapsed());

    let mut parts: Vec<Option<SortedRange>> = chunk_bounds
        .iter()
        .zip(psas)
        .zip(bwts)
        .map(|((&(beg, end), psa), (bwt, i0))| {
            Some(SortedRange {
                beg,
                end,
                psa,
                bwt,
                i0,
            })
        })
        .collect();

    let merged = if n_sub == 1 {
        parts[0].take().unwrap()
    } else {
        let now = Instant::now();
        let schedule = MergeSchedule::new(n_sub, params.ram_per_input_byte);
        let ctx = MergeContext {
            text: text_ro,
            tail,
            bounds: &bounds,
            matrix: &matrix,
            schedule,
            n_threads: params.n_threads,
            n_increasers: params.n_increasers,
            buf_elems: params.buf_elems,
            random_seed: params.random_seed,
        };
        let merged = balanced_merge(
            &ctx,
            &mut parts,
            gt_begin.as_mut().unwrap(),
            0,
            n_sub,
            need_gt_begin,
        )?;
        info!("  balanced merge: {:?}", now.elapsed());
        merged
    };

    Ok(InmemResult {
        psa: merged.psa,
        bwt: merged.bwt,
        i0: merged.i0,
        gt_begin: if need_gt_begin { gt_begin } else { None },
    })
}

// --------------------------------------------------
/// Rename every sub-block so a standalone sort of it equals the order of
/// its suffixes extended by the rest of the text: a byte grows by one
/// when it exceeds the sub-block's last byte, or ties with it and the
/// following position's gt_end bit is set.
fn rename_blocks(text: &mut [u8], bounds: &[usize], gt_end: &Bitvector) {
    std::thread::scope(|scope| {
        let mut rest: &mut [u8] = text;
        let mut beg = 0usize;
        for &end in bounds {
            let (chunk, remainder) = rest.split_at_mut(end - beg);
            rest = remainder;
            scope.spawn(move || rename_one(chunk, end, gt_end));
            beg = end;
        }
    });
}

fn rename_one(chunk: &mut [u8], end: usize, gt_end: &Bitvector) {
    let size = chunk.len();
    let last = chunk[size - 1];
    for i in 0..size - 1 {
        let b = chunk[i];
        if b > last || (b == last && gt_end.get(end - 1 - (i + 1))) {
            chunk[i] += 1;
        }
    }
    chunk[size - 1] += 1;
}

// --------------------------------------------------
fn rerename_blocks(text: &mut [u8], bounds: &[usize]) {
    let mut rest: &mut [u8] = text;
    let mut beg = 0usize;
    let mut chunks = vec![];
    for &end in bounds {
        let (chunk, remainder) = rest.split_at_mut(end - beg);
        rest = remainder;
        chunks.push(chunk);
        beg = end;
    }
    chunks.par_iter_mut().for_each(|chunk| {
        let size = chunk.len();
        let last = chunk[size - 1] - 1;
        for b in chunk.iter_mut() {
            if *b > last {
                *b -= 1;
            }
        }
    });
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{inmem_sufsort, InmemParams};
    use crate::{bitvector::Bitvector, gt::TailInfo, io::multifile::Multifile};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tempfile::TempDir;

    fn params(n_threads: usize) -> InmemParams {
        InmemParams {
            n_threads,
            n_increasers: 2,
            buf_elems: 64,
            random_seed: 11,
            ram_per_input_byte: 12,
        }
    }

    // Run the whole in-memory pipeline on the prefix of `full` and check
    // against brute force over the full text.
    fn check(full: &[u8], block_len: usize, n_threads: usize) -> Result<()> {
        let dir = TempDir::new()?;
        let total = full.len();
        let tail_len = total - block_len;

        let mut multifile = Multifile::new();
        if tail_len > 0 {
            let mut bv = Bitvector::new(tail_len);
            for g in block_len..total {
                if full[g..] > full[block_len..] {
                    bv.set(total - 1 - g);
                }
            }
            let path = dir.path().join("t.gt").to_string_lossy().to_string();
            bv.save(&path)?;
            multifile.add_file(0, tail_len as u64, &path);
        }
        let prefix =
            full[block_len..block_len + block_len.min(tail_len)].to_vec();
        let info = TailInfo {
            prefix: &prefix,
            gt: &multifile,
            block_end: block_len as u64,
            text_len: total as u64,
        };
        let tail = (tail_len > 0).then_some(&info);

        let mut text = full[..block_len].to_vec();
        let result =
            inmem_sufsort(&mut text, tail, true, &params(n_threads))?;

        // The text is restored.
        assert_eq!(text, &full[..block_len]);

        // Partial SA in extended suffix order.
        let mut expected: Vec<u32> = (0..block_len as u32).collect();
        expected.sort_by(|&a, &b| {
            full[a as usize..].cmp(&full[b as usize..])
        });
        assert_eq!(result.psa, expected);

        // BWT with the dummy at i0.
        assert_eq!(result.psa[result.i0], 0);
        for (j, &val) in result.psa.iter().enumerate() {
            let want = if val == 0 { 0 } else { full[val as usize - 1] };
            assert_eq!(result.bwt[j], want, "bwt[{j}]");
        }

        // gt_begin, block-reversed, reference = block begin.
        let gt = result.gt_begin.unwrap();
        for p in 0..block_len {
            assert_eq!(
                gt.get_rev(p),
                full[p..] > full[0..],
                "gt_begin[{p}]"
            );
        }
        Ok(())
    }

    #[test]
    fn test_single_subblock() -> Result<()> {
        check(b"mississippi", 11, 1)?;
        check(b"mississippimississippixyz", 11, 1)?;
        Ok(())
    }

    #[test]
    fn test_multi_subblock_no_tail() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(21);
        for n_threads in [2usize, 3, 5] {
            let text: Vec<u8> =
                (0..240).map(|_| rng.gen_range(b'a'..=b'c')).collect();
            check(&text, 240, n_threads)?;
        }
        Ok(())
    }

    #[test]
    fn test_multi_subblock_with_tail() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(22);
        for (block_len, total, n_threads) in
            [(96usize, 300usize, 3usize), (128, 129, 4), (200, 1000, 2)]
        {
            let full: Vec<u8> =
                (0..total).map(|_| rng.gen_range(b'a'..=b'b')).collect();
            check(&full, block_len, n_threads)?;
        }
        Ok(())
    }

    #[test]
    fn test_repetitive_block() -> Result<()> {
        let full = vec![b'z'; 500];
        check(&full, 160, 4)?;
        let full: Vec<u8> = std::iter::repeat(b"abc".as_slice())
            .take(150)
            .flatten()
            .copied()
            .collect();
        check(&full, 128, 3)?;
        Ok(())
    }

    #[test]
    fn test_byte_255_rejected() -> Result<()> {
        let mut text = vec![b'a'; 20];
        text[5] = 255;
        let before = text.clone();
        let res = inmem_sufsort(&mut text, None, false, &params(3));
        assert!(res.is_err());
        // Rejected input is left untouched.
        assert_eq!(text, before);
        Ok(())
    }
}
