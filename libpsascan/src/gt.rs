//! `gt` bitvector computation.
//!
//! For a block cut into sub-blocks, `compute_gt_end` produces for every
//! sub-block [beg, end) the bits gt[p] = [T[p..] > T[end..]], and
//! `gt_end_to_gt_begin` rewrites them against the sub-block's own begin.
//!
//! Storage conventions:
//! - `gt_end`: one bitvector over the block; the bit of position p inside
//!   sub-block [beg, end) sits at index end − 1 − (p − beg) + beg, i.e.
//!   each sub-block's range holds its own bits reversed.
//! - `gt_begin`: one bitvector over the block, reversed globally
//!   (position p at index len − 1 − p), which is exactly the byte layout
//!   of the block's entry in the tail multifile.

use crate::{
    bitvector::{bit_get, bit_set, Bitvector},
    io::multifile::{Multifile, MultifileBitAccess},
};
use anyhow::Result;

// --------------------------------------------------
/// Right context of the block being processed: the first
/// min(block_size, n − block_end) bytes after the block, and the `gt`
/// bits of the old tail (reference = block end).
#[derive(Debug)]
pub struct TailInfo<'a> {
    pub prefix: &'a [u8],
    pub gt: &'a Multifile,

    /// Global offset of the block end (= start of the tail).
    pub block_end: u64,

    /// Length of the whole text; maps a global position g to its
    /// reversed multifile index n − 1 − g.
    pub text_len: u64,
}

impl TailInfo<'_> {
    /// [T[g..] > T[block_end..]] for a global position g in the tail.
    fn gt_bit(&self, access: &mut MultifileBitAccess, g: u64) -> Result<bool> {
        access.access(self.text_len - 1 - g)
    }
}

// --------------------------------------------------
/// Candidate-period state of the matched pattern prefix.
///
/// Invariant on exit: p + s == el and pat[0..s) == pat[p..p+s), so p is a
/// period of pat[0..el). The total work is O(el) because p + s only grows.
#[inline]
fn advance_period<P>(pat: &P, el: usize, s: &mut usize, p: &mut usize)
where
    P: Fn(usize) -> u8,
{
    while *p + *s < el {
        if pat(*s) == pat(*p + *s) {
            *s += 1;
        } else {
            *p += *s + 1;
            *s = 0;
        }
    }
}

// --------------------------------------------------
/// How one comparison against the pattern ended.
enum Verdict {
    Greater,
    Smaller,
    Undecided,
}

// --------------------------------------------------
/// Phase 1 for one sub-block [beg, end) of `text`: decide
/// gt[p] = [T[p..] > T[end..]] where possible, marking the rest undecided.
/// `next_size` is the length of the following sub-block (0 for the last).
/// Comparisons that run past the block end are settled against the tail
/// and are always decided.
///
/// `gt_bits`/`und_bits` are the byte ranges of this sub-block within the
/// shared bitvectors; bit o is local offset o, gt stored reversed
/// (local index size − 1 − o).
#[allow(clippy::too_many_arguments)]
fn partial_gt_end(
    text: &[u8],
    beg: usize,
    end: usize,
    next_size: usize,
    tail: Option<&TailInfo>,
    gt_bits: &mut [u8],
    und_bits: &mut [u8],
) -> Result<bool> {
    let size = end - beg;
    let block_len = text.len();
    let txt = &text[beg..];

    let tail_block_end = tail.map_or(0, |info| info.block_end);
    let tail_len = tail.map_or(0, |info| (info.text_len - info.block_end) as usize);
    let mut tail_access = match tail {
        Some(info) => Some(MultifileBitAccess::new(info.gt)?),
        None => None,
    };

    // Pattern bytes: the text from `end`, continuing into the tail prefix.
    let pat = |idx: usize| -> u8 {
        if end + idx < block_len {
            text[end + idx]
        } else {
            match tail {
                Some(info) => info.prefix[end + idx - block_len],
                None => unreachable!(),
            }
        }
    };

    // Pattern length: within the block the comparison is cut off at the
    // next sub-block's size (the undecided mechanism); past the block end
    // it extends over the tail.
    let in_block_limit = block_len - end;
    let pattern_limit = in_block_limit + tail_len;
    let undecided_limit = if next_size > 0 && end + next_size < block_len {
        Some(next_size)
    } else {
        None
    };

    let mut all_decided = true;
    let mut i = 0usize;
    let mut el = 0usize;
    let mut s = 0usize;
    let mut p = 1usize;
    let mut i_max = 0usize;
    let mut el_max = 0usize;
    let mut s_max = 0usize;
    let mut p_max = 1usize;

    while i < size {
        // Extend the match and decide the bit for position beg + i.
        let verdict = loop {
            if let Some(limit) = undecided_limit {
                if el == limit {
                    break Verdict::Undecided;
                }
            }
            if el == pattern_limit {
                // Pattern exhausted at the end of the whole text.
                break Verdict::Greater;
            }
            if beg + i + el == block_len {
                // The text side crossed into the tail: one old-tail gt bit
                // settles the remaining suffix-vs-suffix comparison.
                let info = tail.unwrap();
                let g = tail_block_end + (end + el - block_len) as u64;
                let bit =
                    info.gt_bit(tail_access.as_mut().unwrap(), g)?;
                break if bit { Verdict::Smaller } else { Verdict::Greater };
            }

            let a = txt[i + el];
            let b = pat(el);
            if a != b {
                break if a > b { Verdict::Greater } else { Verdict::Smaller };
            }
            el += 1;
            advance_period(&pat, el, &mut s, &mut p);
        };

        match verdict {
            Verdict::Greater => bit_set(gt_bits, size - 1 - i),
            Verdict::Smaller => {}
            Verdict::Undecided => {
                bit_set(und_bits, i);
                all_decided = false;
            }
        }

        // Remember the position with the longest match seen so far; bits
        // in its shadow can be copied instead of recomputed.
        let j = i_max;
        if el > el_max {
            std::mem::swap(&mut el, &mut el_max);
            std::mem::swap(&mut s, &mut s_max);
            std::mem::swap(&mut p, &mut p_max);
            i_max = i;
        }

        if el < 100 {
            i += 1;
            el = 0;
            s = 0;
            p = 1;
        } else if p > 0 && (p << 2) <= el && p + s == el {
            // The matched prefix has period p: propagate one period.
            for k in 1..p.min(size - i) {
                if bit_get(und_bits, j + k) {
                    bit_set(und_bits, i + k);
                }
                if bit_get(gt_bits, size - 1 - (j + k)) {
                    bit_set(gt_bits, size - 1 - (i + k));
                }
            }
            i += p;
            el -= p;
            s = el.saturating_sub(p);
        } else {
            let h = (el >> 2) + 1;
            for k in 1..h.min(size - i) {
                if bit_get(und_bits, j + k) {
                    bit_set(und_bits, i + k);
                }
                if bit_get(gt_bits, size - 1 - (j + k)) {
                    bit_set(gt_bits, size - 1 - (i + k));
                }
            }
            i += h;
            el = 0;
            s = 0;
            p = 1;
        }
    }

    Ok(all_decided)
}

// --------------------------------------------------
/// Sub-block layout: ends at multiples of `max_sub_size` (a multiple of 8
/// so parallel workers never share a bitvector byte), last end = len.
pub fn sub_block_bounds(len: usize, max_sub_size: usize) -> Vec<usize> {
    debug_assert!(max_sub_size % 8 == 0 || max_sub_size >= len);
    let mut bounds = vec![];
    let mut end = 0usize;
    while end < len {
        end = (end + max_sub_size).min(len);
        bounds.push(end);
    }
    if bounds.is_empty() {
        bounds.push(0);
    }
    bounds
}

// --------------------------------------------------
/// Shared bitvector bytes for the phase-2 offset-band workers. Each band
/// touches a byte range no other band touches (offsets are multiples of 8
/// and so are all sub-block boundaries), so the raw writes cannot race.
struct SharedBits {
    ptr: *mut u8,
}

unsafe impl Send for SharedBits {}
unsafe impl Sync for SharedBits {}

impl SharedBits {
    unsafe fn get(&self, idx: usize) -> bool {
        *self.ptr.add(idx >> 3) & (1 << (idx & 7)) != 0
    }

    unsafe fn set(&self, idx: usize) {
        *self.ptr.add(idx >> 3) |= 1 << (idx & 7)
    }
}

// --------------------------------------------------
/// Compute `gt_end` over all sub-blocks.
pub fn compute_gt_end(
    text: &[u8],
    bounds: &[usize],
    tail: Option<&TailInfo>,
) -> Result<Bitvector> {
    let len = text.len();
    let mut gt = Bitvector::new(len);
    let mut undecided = Bitvector::new(len);
    let n_blocks = bounds.len();
    let mut all_decided = vec![true; n_blocks];

    // Phase 1: per-sub-block decided bits, in parallel. The bitvectors are
    // split at sub-block boundaries, which are byte-aligned.
    {
        let mut gt_rest: &mut [u8] = gt.as_bytes_mut();
        let mut und_rest: &mut [u8] = undecided.as_bytes_mut();
        let mut workers = vec![];
        let mut beg = 0usize;
        for (idx, &end) in bounds.iter().enumerate() {
            let bytes = if end == len {
                gt_rest.len()
            } else {
                (end - beg) / 8
            };
            let (gt_chunk, gt_tail_rest) = gt_rest.split_at_mut(bytes);
            let (und_chunk, und_tail_rest) = und_rest.split_at_mut(bytes);
            gt_rest = gt_tail_rest;
            und_rest = und_tail_rest;

            let next_size = if idx + 1 < n_blocks {
                bounds[idx + 1] - end
            } else {
                0
            };
            workers.push((beg, end, next_size, gt_chunk, und_chunk));
            beg = end;
        }

        let results: Vec<Result<bool>> = std::thread::scope(|scope| {
            let handles: Vec<_> = workers
                .into_iter()
                .map(|(beg, end, next_size, gt_chunk, und_chunk)| {
                    scope.spawn(move || {
                        partial_gt_end(
                            text, beg, end, next_size, tail, gt_chunk,
                            und_chunk,
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (idx, res) in results.into_iter().enumerate() {
            all_decided[idx] = res?;
        }
    }

    if len == 0 {
        return Ok(gt);
    }

    // Phase 2: resolve undecided bits by copying from the next sub-block
    // at the same offset, right to left. Parallel over offset bands; band
    // boundaries are multiples of 8.
    let max_sub_size = bounds[0];
    let n_threads = rayon::current_num_threads().max(1);
    let mut band = max_sub_size.div_ceil(n_threads);
    while band & 7 != 0 {
        band += 1;
    }
    let n_bands = max_sub_size.div_ceil(band).max(1);

    let gt_shared = SharedBits {
        ptr: gt.as_bytes_mut().as_mut_ptr(),
    };
    let und_shared = SharedBits {
        ptr: undecided.as_bytes_mut().as_mut_ptr(),
    };
    let gt_ref = &gt_shared;
    let und_ref = &und_shared;
    let decided_ref = &all_decided;

    std::thread::scope(|scope| {
        for band_idx in 0..n_bands {
            let mb_beg = band_idx * band;
            let mb_end = ((band_idx + 1) * band).min(max_sub_size);
            scope.spawn(move || {
                let mut next_end = len;
                for idx in (0..n_blocks).rev() {
                    let end = bounds[idx];
                    let beg = if idx == 0 { 0 } else { bounds[idx - 1] };
                    let this_end = mb_end.min(end - beg);
                    if !decided_ref[idx] {
                        for j in mb_beg..this_end {
                            // Safety: this band's writes stay inside the
                            // byte range [beg + mb_beg, beg + mb_end) of
                            // each bitvector; reads target bits this same
                            // thread resolved for the block to the right.
                            unsafe {
                                if und_ref.get(beg + j)
                                    && gt_ref.get(next_end - j - 1)
                                {
                                    gt_ref.set(end - j - 1);
                                }
                            }
                        }
                    }
                    next_end = end;
                }
            });
        }
    });

    Ok(gt)
}

// --------------------------------------------------
/// Rewrite `gt_end` into `gt_begin`: for every sub-block [beg, end) and
/// position p in it, the bit [T[p..] > T[beg..]]. The comparison is a
/// self-match against the pattern at `beg`; once it survives to the
/// sub-block end, the mirrored old `gt_end` bit settles it. The result is
/// stored reversed over the whole block.
pub fn gt_end_to_gt_begin(
    text: &[u8],
    bounds: &[usize],
    gt_end: &Bitvector,
) -> Result<Bitvector> {
    let len = text.len();
    let mut gt_begin = Bitvector::new(len);

    let locals: Vec<Bitvector> = std::thread::scope(|scope| {
        let mut handles = vec![];
        let mut beg = 0usize;
        for &end in bounds {
            handles.push(
                scope.spawn(move || partial_gt_begin(text, beg, end, gt_end)),
            );
            beg = end;
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Assemble: local bit o of sub-block [beg, end) is position beg + o,
    // stored globally reversed.
    let mut beg = 0usize;
    for (local, &end) in locals.iter().zip(bounds) {
        for o in 0..(end - beg) {
            if local.get(o) {
                gt_begin.set(len - 1 - (beg + o));
            }
        }
        beg = end;
    }

    Ok(gt_begin)
}

// --------------------------------------------------
/// gt_begin of one sub-block, forward-indexed by local offset.
fn partial_gt_begin(
    text: &[u8],
    beg: usize,
    end: usize,
    gt_end: &Bitvector,
) -> Bitvector {
    let size = end - beg;
    let mut bits = Bitvector::new(size);
    if size == 0 {
        return bits;
    }
    let txt = &text[beg..end];

    // gt_end bit of local position o, under the per-sub-block reversed
    // layout of `compute_gt_end`.
    let gt_end_at = |o: usize| gt_end.get(end - 1 - o);

    let mut i = 1usize;
    let mut el = 0usize;
    let mut s = 0usize;
    let mut p = 1usize;
    let mut i_max = 1usize;
    let mut el_max = 0usize;
    let mut s_max = 0usize;
    let mut p_max = 1usize;
    let pat = |idx: usize| txt[idx];

    while i < size {
        // lcp(T[beg + i..], T[beg..]) is capped at size − i: surviving to
        // the sub-block end flips the question into an old gt_end bit.
        let greater = loop {
            if el == size - i {
                break !gt_end_at(size - i);
            }
            let a = txt[i + el];
            let b = txt[el];
            if a != b {
                break a > b;
            }
            el += 1;
            advance_period(&pat, el, &mut s, &mut p);
        };

        if greater {
            bits.set(i);
        }

        let j = i_max;
        if el > el_max {
            std::mem::swap(&mut el, &mut el_max);
            std::mem::swap(&mut s, &mut s_max);
            std::mem::swap(&mut p, &mut p_max);
            i_max = i;
        }

        if el < 100 {
            i += 1;
            el = 0;
            s = 0;
            p = 1;
        } else if p > 0 && (p << 2) <= el && p + s == el {
            for k in 1..p.min(size - i) {
                if bits.get(j + k) {
                    bits.set(i + k);
                }
            }
            i += p;
            el -= p;
            s = el.saturating_sub(p);
        } else {
            let h = (el >> 2) + 1;
            for k in 1..h.min(size - i) {
                if bits.get(j + k) {
                    bits.set(i + k);
                }
            }
            i += h;
            el = 0;
            s = 0;
            p = 1;
        }
    }

    bits
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{compute_gt_end, gt_end_to_gt_begin, sub_block_bounds, TailInfo};
    use crate::{bitvector::Bitvector, io::multifile::Multifile};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tempfile::TempDir;

    // gt_end bit of text position p in sub-block [beg, end), as stored.
    fn stored_gt_end(gt: &Bitvector, beg: usize, end: usize, p: usize) -> bool {
        gt.get(end - 1 - (p - beg))
    }

    fn check_block(text: &[u8], full: &[u8], max_sub: usize) -> Result<()> {
        let len = text.len();
        let bounds = sub_block_bounds(len, max_sub);

        // Stage the tail gt on disk when the block has a right context.
        let dir = TempDir::new()?;
        let tail_len = full.len() - len;
        let mut multifile = Multifile::new();
        if tail_len > 0 {
            let mut bv = Bitvector::new(tail_len);
            for g in len..full.len() {
                if full[g..] > full[len..] {
                    bv.set(full.len() - 1 - g);
                }
            }
            let path = dir.path().join("tail.gt").to_string_lossy().to_string();
            bv.save(&path)?;
            multifile.add_file(0, tail_len as u64, &path);
        }
        let prefix = &full[len..(len + len.min(tail_len))];
        let info = TailInfo {
            prefix,
            gt: &multifile,
            block_end: len as u64,
            text_len: full.len() as u64,
        };
        let tail = if tail_len > 0 { Some(&info) } else { None };

        let gt_end = compute_gt_end(text, &bounds, tail)?;
        let mut beg = 0usize;
        for &end in &bounds {
            for p in beg..end {
                let expected = full[p..] > full[end..];
                assert_eq!(
                    stored_gt_end(&gt_end, beg, end, p),
                    expected,
                    "gt_end[{p}] for sub-block [{beg}, {end})"
                );
            }
            beg = end;
        }

        let gt_begin = gt_end_to_gt_begin(text, &bounds, &gt_end)?;
        let mut beg = 0usize;
        for &end in &bounds {
            for p in beg..end {
                let expected = full[p..] > full[beg..];
                assert_eq!(
                    gt_begin.get_rev(p),
                    expected,
                    "gt_begin[{p}] for sub-block [{beg}, {end})"
                );
            }
            beg = end;
        }
        Ok(())
    }

    #[test]
    fn test_no_tail_simple() -> Result<()> {
        check_block(b"mississippi", b"mississippi", 8)?;
        check_block(b"banana", b"banana", 8)?;
        check_block(b"banana", b"banana", 16)?;
        Ok(())
    }

    #[test]
    fn test_no_tail_periodic() -> Result<()> {
        let text: Vec<u8> = std::iter::repeat(b"ab".as_slice())
            .take(300)
            .flatten()
            .copied()
            .collect();
        check_block(&text, &text, 64)?;
        let aaa = vec![b'a'; 700];
        check_block(&aaa, &aaa, 128)?;
        Ok(())
    }

    #[test]
    fn test_with_tail_random() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(33);
        for (len, total, max_sub) in
            [(40usize, 100usize, 16usize), (64, 80, 16), (128, 1000, 32)]
        {
            let full: Vec<u8> =
                (0..total).map(|_| rng.gen_range(b'a'..=b'c')).collect();
            check_block(&full[..len], &full, max_sub)?;
        }
        Ok(())
    }

    #[test]
    fn test_with_tail_periodic() -> Result<()> {
        // Matches that cross the block end and deep into the tail.
        let full = vec![b'a'; 400];
        check_block(&full[..96], &full, 16)?;

        let mut full: Vec<u8> = std::iter::repeat(b"abc".as_slice())
            .take(120)
            .flatten()
            .copied()
            .collect();
        full.push(b'z');
        check_block(&full[..120], &full, 24)?;
        Ok(())
    }
}
