//! Sparse inverse suffix array.
//!
//! ISA values are stored only at positions divisible by 2^k; any other
//! position is answered by walking left with the LF mapping until a sampled
//! position is met. Used to refine streaming start ranks when bounded text
//! comparison leaves a nontrivial range.

use crate::{rank::RankSupport, types::SPARSE_ISA_RATE_LOG};

// --------------------------------------------------
#[derive(Debug)]
pub struct SparseIsa<'a> {
    psa: &'a [u32],
    text: &'a [u8],
    rank: &'a RankSupport,
    i0: usize,
    count: [u64; 256],
    sparse: Vec<u32>,
    last_isa: u32,
}

impl<'a> SparseIsa<'a> {
    pub fn new(
        psa: &'a [u32],
        text: &'a [u8],
        i0: usize,
        rank: &'a RankSupport,
    ) -> Self {
        let rate_mask = (1u32 << SPARSE_ISA_RATE_LOG) - 1;
        let len = psa.len();
        let mut sparse =
            vec![0u32; (len >> SPARSE_ISA_RATE_LOG) + 2];
        let mut last_isa = 0u32;
        for (j, &sa_j) in psa.iter().enumerate() {
            if sa_j & rate_mask == 0 {
                sparse[(sa_j >> SPARSE_ISA_RATE_LOG) as usize] = j as u32;
            }
            if sa_j as usize == len - 1 {
                last_isa = j as u32;
            }
        }

        SparseIsa {
            psa,
            text,
            rank,
            i0,
            count: rank.bwt_count_table(text[text.len() - 1]),
            sparse,
            last_isa,
        }
    }

    // --------------------------------------------------
    /// The rank of suffix `j` among the block suffixes.
    pub fn query(&self, j: usize) -> usize {
        let rate = 1usize << SPARSE_ISA_RATE_LOG;
        let len = self.psa.len();

        let mut i = (j + rate - 1) >> SPARSE_ISA_RATE_LOG;
        let mut isa_i;
        if (i << SPARSE_ISA_RATE_LOG) < len {
            isa_i = self.sparse[i] as i64;
            i <<= SPARSE_ISA_RATE_LOG;
        } else {
            isa_i = self.last_isa as i64;
            i = len - 1;
        }

        // Walk ISA[i] -> ISA[i - 1] down to j. The scan after the LF step
        // recovers from the dummy-symbol slot at i0.
        while i != j {
            let c = self.text[i - 1];
            let delta = (isa_i > self.i0 as i64 && c == 0) as i64;
            isa_i = self.count[c as usize] as i64
                + self.rank.rank(isa_i as usize, c) as i64
                - delta;
            while isa_i < 0 || self.psa[isa_i as usize] as usize != i - 1 {
                isa_i += 1;
            }
            i -= 1;
        }

        isa_i as usize
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::SparseIsa;
    use crate::{bwt::bwt_from_sa, rank::RankSupport, suffix_sort::sort_block};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn check(text: &[u8]) -> Result<()> {
        let psa = sort_block(text)?;
        let (bwt, i0) = bwt_from_sa(text, &psa)?;
        let rank = RankSupport::new(bwt);
        let isa = SparseIsa::new(&psa, text, i0, &rank);

        let mut full_isa = vec![0usize; text.len()];
        for (j, &val) in psa.iter().enumerate() {
            full_isa[val as usize] = j;
        }
        for j in 0..text.len() {
            assert_eq!(isa.query(j), full_isa[j], "isa({j})");
        }
        Ok(())
    }

    #[test]
    fn test_simple_texts() -> Result<()> {
        check(b"banana")?;
        check(b"mississippi")?;
        check(b"aaaaaaaaaaaaaaaa")?;
        check(&[0, 0, 1, 0, 0, 0, 1, 0])?;
        Ok(())
    }

    #[test]
    fn test_random_beyond_sampling_rate() -> Result<()> {
        // Longer than 2^12 so unsampled positions actually walk.
        let mut rng = StdRng::seed_from_u64(11);
        let text: Vec<u8> = (0..9000).map(|_| rng.gen_range(0..4u8)).collect();
        check(&text)
    }
}
