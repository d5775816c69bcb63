//! Initial streaming ranks.
//!
//! Backward search needs, for every worker segment, the rank of the
//! segment's first emitted suffix among the block's suffixes. The
//! comparisons behind those ranks are always decided: text bytes settle
//! them inside the block, the tail prefix carries the pattern past the
//! block end, and the moment the suffix side crosses the block end a
//! single old-tail `gt` bit finishes the job (pattern exhaustion at the
//! end of the text means the pattern is smaller).

use crate::{
    gt::TailInfo,
    io::{chunk_reader::ChunkReader, multifile::{Multifile, MultifileBitAccess}},
};
use anyhow::Result;
use rayon::prelude::*;
use std::cmp::Ordering;

// --------------------------------------------------
/// Compare the pattern T[pat_start..] against the extended block suffix
/// T[suf..], both positions block-local with pat_start > suf. `Greater`
/// means the pattern is larger.
pub fn cmp_pattern_suffix(
    text: &[u8],
    tail: Option<&TailInfo>,
    access: &mut Option<MultifileBitAccess>,
    pat_start: usize,
    suf: usize,
) -> Result<Ordering> {
    debug_assert!(pat_start > suf);
    let len = text.len();
    let tail_len =
        tail.map_or(0, |info| (info.text_len - info.block_end) as usize);

    let mut el = 0usize;
    loop {
        let pat_pos = pat_start + el;
        let suf_pos = suf + el;

        if pat_pos == len + tail_len {
            // Pattern ran off the end of the text.
            return Ok(Ordering::Less);
        }
        if suf_pos == len {
            // Suffix side continues as the whole tail; one gt bit of the
            // old tail (reference = block end) decides.
            let info = tail.unwrap();
            let g = info.block_end + (pat_pos - len) as u64;
            let bit = access.as_mut().unwrap().access(info.text_len - 1 - g)?;
            return Ok(if bit { Ordering::Greater } else { Ordering::Less });
        }

        let pat_byte = if pat_pos < len {
            text[pat_pos]
        } else {
            tail.unwrap().prefix[pat_pos - len]
        };
        let suf_byte = text[suf_pos];
        if pat_byte != suf_byte {
            return Ok(if pat_byte > suf_byte {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        }
        el += 1;
    }
}

// --------------------------------------------------
/// The number of suffixes in `psa` (values relative to `psa_origin`)
/// lexicographically below the pattern T[pat_start..].
fn pattern_rank(
    text: &[u8],
    tail: Option<&TailInfo>,
    psa: &[u32],
    psa_origin: usize,
    pat_start: usize,
) -> Result<u64> {
    let mut access = match tail {
        Some(info) => Some(MultifileBitAccess::new(info.gt)?),
        None => None,
    };

    let mut lo = 0usize;
    let mut hi = psa.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let suf = psa_origin + psa[mid] as usize;
        match cmp_pattern_suffix(text, tail, &mut access, pat_start, suf)? {
            Ordering::Greater => lo = mid + 1,
            _ => hi = mid,
        }
    }
    Ok(lo as u64)
}

// --------------------------------------------------
/// The block rank matrix: M[r][c] = number of suffixes starting in
/// sub-block r that precede the suffix starting at sub-block c's end,
/// for r < c (other entries stay 0). Entries are independent and are
/// computed in parallel.
pub fn block_rank_matrix(
    text: &[u8],
    bounds: &[usize],
    psas: &[Vec<u32>],
    tail: Option<&TailInfo>,
) -> Result<Vec<Vec<u64>>> {
    let n = bounds.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|r| (r + 1..n).map(move |c| (r, c)))
        .collect();

    let entries: Vec<Result<u64>> = pairs
        .par_iter()
        .map(|&(r, c)| {
            let psa_origin = if r == 0 { 0 } else { bounds[r - 1] };
            pattern_rank(text, tail, &psas[r], psa_origin, bounds[c])
        })
        .collect();

    let mut matrix = vec![vec![0u64; n]; n];
    for (&(r, c), entry) in pairs.iter().zip(entries) {
        matrix[r][c] = entry?;
    }
    Ok(matrix)
}

// --------------------------------------------------
/// The rank, among all block suffixes, of each tail pattern in
/// `positions` (global offsets, at or beyond the block end). The pattern
/// text is pulled from disk on demand; the tail `gt` settles comparisons
/// that outlive the block.
#[allow(clippy::too_many_arguments)]
pub fn tail_boundary_ranks(
    text_filename: &str,
    block_text: &[u8],
    psa: &[u32],
    block_end: u64,
    text_len: u64,
    tail_gt: &Multifile,
    positions: &[u64],
) -> Result<Vec<u64>>
{
    let len = block_text.len();

    positions
        .par_iter()
        .map(|&g| -> Result<u64> {
            debug_assert!(g >= block_end && g < text_len);
            let limit = (len as u64 + 1).min(text_len - g) as usize;
            let mut pattern = ChunkReader::new(text_filename, g, limit)?;
            let mut access = MultifileBitAccess::new(tail_gt)?;

            let mut lo = 0usize;
            let mut hi = psa.len();
            while lo < hi {
                let mid = (lo + hi) / 2;
                let suf = psa[mid] as usize;
                match cmp_tail_pattern(
                    block_text,
                    &mut pattern,
                    &mut access,
                    g,
                    block_end,
                    text_len,
                    suf,
                )? {
                    Ordering::Greater => lo = mid + 1,
                    _ => hi = mid,
                }
            }
            Ok(lo as u64)
        })
        .collect()
}

// --------------------------------------------------
/// Compare the tail pattern T[g..] against the extended block suffix at
/// block-local position `suf`.
fn cmp_tail_pattern(
    block_text: &[u8],
    pattern: &mut ChunkReader,
    access: &mut MultifileBitAccess,
    g: u64,
    block_end: u64,
    text_len: u64,
    suf: usize,
) -> Result<Ordering> {
    let len = block_text.len();
    let mut el = 0usize;
    loop {
        if suf + el == len {
            // The suffix crossed the block end while tied with the
            // pattern; the gt bit at the pattern's current position wins.
            let pos = g + el as u64;
            if pos == text_len {
                // Both sides exhausted together cannot happen for
                // distinct suffixes; a pattern ending here is shorter.
                return Ok(Ordering::Less);
            }
            let bit = access.access(text_len - 1 - pos)?;
            return Ok(if bit { Ordering::Greater } else { Ordering::Less });
        }

        let avail = pattern.prefix(el + 1)?;
        if avail.len() <= el {
            // Pattern ran off the end of the text.
            return Ok(Ordering::Less);
        }
        let pat_byte = avail[el];
        let suf_byte = block_text[suf + el];
        if pat_byte != suf_byte {
            return Ok(if pat_byte > suf_byte {
                Ordering::Greater
            } else {
                Ordering::Less
            });
        }
        el += 1;
    }
}

// --------------------------------------------------
/// [T[pat_start..] > T[ref_pos..]] for two block-local positions with
/// pat_start > ref_pos, extended over the whole text.
pub fn position_greater(
    text: &[u8],
    tail: Option<&TailInfo>,
    pat_start: usize,
    ref_pos: usize,
) -> Result<bool> {
    let mut access = match tail {
        Some(info) => Some(MultifileBitAccess::new(info.gt)?),
        None => None,
    };
    Ok(matches!(
        cmp_pattern_suffix(text, tail, &mut access, pat_start, ref_pos)?,
        Ordering::Greater
    ))
}
