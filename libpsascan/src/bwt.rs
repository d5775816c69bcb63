//! BWT of a block from its partial suffix array.

use anyhow::{bail, Result};
use rayon::prelude::*;

// --------------------------------------------------
/// Fill `bwt` with `text[sa[j] - 1]` and return i0, the position holding
/// the suffix 0 (its slot is written as 0). Work is split into equal
/// ranges; i0 falls out of a parallel reduction.
pub fn bwt_from_sa_into(text: &[u8], sa: &[u32], bwt: &mut [u8]) -> Result<usize> {
    debug_assert_eq!(text.len(), sa.len());
    debug_assert_eq!(text.len(), bwt.len());

    let chunk = sa.len().div_ceil(rayon::current_num_threads()).max(1);
    let i0 = bwt
        .par_chunks_mut(chunk)
        .zip(sa.par_chunks(chunk))
        .enumerate()
        .map(|(chunk_idx, (out, sa_chunk))| {
            let mut i0 = None;
            for (j, (&val, slot)) in sa_chunk.iter().zip(out.iter_mut()).enumerate() {
                if val == 0 {
                    i0 = Some(chunk_idx * chunk + j);
                    *slot = 0;
                } else {
                    *slot = text[val as usize - 1];
                }
            }
            i0
        })
        .reduce(|| None, |a, b| a.or(b));

    match i0 {
        Some(i0) => Ok(i0),
        None => {
            if sa.is_empty() {
                Ok(0)
            } else {
                bail!("suffix 0 is missing from the partial suffix array")
            }
        }
    }
}

// --------------------------------------------------
pub fn bwt_from_sa(text: &[u8], sa: &[u32]) -> Result<(Vec<u8>, usize)> {
    let mut bwt = vec![0u8; sa.len()];
    let i0 = bwt_from_sa_into(text, sa, &mut bwt)?;
    Ok((bwt, i0))
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::bwt_from_sa;
    use crate::suffix_sort::sort_block;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_banana() -> Result<()> {
        let text = b"banana";
        let sa = sort_block(text)?;
        let (bwt, i0) = bwt_from_sa(text, &sa)?;
        // Sorted suffixes: a, ana, anana, banana, na, nana.
        assert_eq!(bwt, vec![b'n', b'n', b'b', 0, b'a', b'a']);
        assert_eq!(i0, 3);
        Ok(())
    }

    #[test]
    fn test_single_char() -> Result<()> {
        let (bwt, i0) = bwt_from_sa(b"x", &[0])?;
        assert_eq!(bwt, vec![0]);
        assert_eq!(i0, 0);
        Ok(())
    }
}
