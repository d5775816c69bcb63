/* Copyright 2021 Google LLC
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

/* This sorter is based on the SA-IS implementation of suffix by Andrew
 * Gallant (BurntSushi), originally published under the MIT license, as
 * modified by Google for the tokengrams project. It has been retyped for
 * this crate:
 *
 * 1. The text is a byte block rather than a u16 token sequence, so the
 *    two text kinds the recursion sees are `u8` and lexical-name `u32`
 *    slices.
 *
 * 2. Suffix indices are `u32` (blocks of 2 GiB and above are rejected
 *    before sorting), which halves the working space of the original
 *    u64 version.
 *
 * When the comments below contradict these two statements, that's why.
 */

//! Base in-memory suffix sorter: SA-IS over a byte block.
//!
//! Works on arbitrary byte content without a sentinel; the block boundary
//! acts as a virtual smallest character. Blocks of 2 GiB and above are
//! rejected so that `u32` suffix indices always suffice.

use crate::types::MAX_BLOCK_SIZE;
use anyhow::{bail, Result};
use rayon::prelude::*;

use self::SuffixType::{Ascending, Descending, Valley};

// --------------------------------------------------
/// The block-local suffix array of `text`.
pub fn sort_block(text: &[u8]) -> Result<Vec<u32>> {
    if text.len() > MAX_BLOCK_SIZE {
        bail!(
            "block of {} bytes is too large for the in-memory sorter",
            text.len()
        );
    }
    let mut sa = vec![0u32; text.len()];
    let mut stypes = SuffixTypes::new(text.len());
    let mut bins = Bins::new();
    sais(&mut sa, &mut stypes, &mut bins, &Bytes(text));
    Ok(sa)
}

// --------------------------------------------------
fn sais<T: Text + ?Sized>(
    sa: &mut [u32],
    stypes: &mut SuffixTypes,
    bins: &mut Bins,
    text: &T,
) {
    match text.len() {
        0 => return,
        1 => {
            sa[0] = 0;
            return;
        }
        _ => {}
    }
    sa.fill(0);

    stypes.compute(text);
    bins.find_sizes((0..text.len()).map(|i| text.char_at(i)));
    bins.find_tail_pointers();

    // Insert the valley suffixes.
    for i in 0..text.len() {
        if stypes.is_valley(i) {
            bins.tail_insert(sa, i as u32, text.char_at(i));
        }
    }

    // Induce the descending suffixes from the valleys...
    bins.find_head_pointers();
    let (lasti, lastc) = text.prev(text.len());
    if stypes.is_desc(lasti) {
        bins.head_insert(sa, lasti as u32, lastc);
    }
    for i in 0..sa.len() {
        let sufi = sa[i];
        if sufi > 0 {
            let (lasti, lastc) = text.prev(sufi as usize);
            if stypes.is_desc(lasti) {
                bins.head_insert(sa, lasti as u32, lastc);
            }
        }
    }

    // ... and the ascending suffixes from the back.
    bins.find_tail_pointers();
    for i in (0..sa.len()).rev() {
        let sufi = sa[i];
        if sufi > 0 {
            let (lasti, lastc) = text.prev(sufi as usize);
            if stypes.is_asc(lasti) {
                bins.tail_insert(sa, lasti as u32, lastc);
            }
        }
    }

    // Move the now-sorted wstrings to the front.
    let mut num_wstrs = 0usize;
    for i in 0..sa.len() {
        let sufi = sa[i];
        if stypes.is_valley(sufi as usize) {
            sa[num_wstrs] = sufi;
            num_wstrs += 1;
        }
    }
    // No sentinel, so there need not be any wstring at all.
    if num_wstrs == 0 {
        num_wstrs = 1;
    }

    let mut prev_sufi = 0u32; // the first suffix can never be a valley
    let mut name = 0u32;
    sa[num_wstrs..].fill(u32::MAX);
    for i in 0..num_wstrs {
        let cur_sufi = sa[i];
        if prev_sufi == 0
            || !text.wstring_equal(stypes, cur_sufi as usize, prev_sufi as usize)
        {
            name += 1;
            prev_sufi = cur_sufi;
        }
        // Two wstrings never start adjacently, so half the array suffices
        // for the sparse name buffer.
        sa[num_wstrs + (cur_sufi as usize / 2)] = name - 1;
    }

    // Compact the sparse names to the end of `sa`.
    let mut j = sa.len();
    for i in (num_wstrs..sa.len()).rev() {
        if sa[i] != u32::MAX {
            j -= 1;
            sa[j] = sa[i];
        }
    }

    // Fewer names than wstrings means ties remain; sort them recursively.
    if (name as usize) < num_wstrs {
        let split_at = sa.len() - num_wstrs;
        let (r_sa, r_text) = sa.split_at_mut(split_at);
        sais(&mut r_sa[..num_wstrs], stypes, bins, &LexNames(r_text));
        stypes.compute(text);
    } else {
        for i in 0..num_wstrs {
            let reducedi = sa[sa.len() - num_wstrs + i];
            sa[reducedi as usize] = i as u32;
        }
    }

    // Map the sorted reduced suffixes back to wstring positions.
    bins.find_sizes((0..text.len()).map(|i| text.char_at(i)));
    let mut j = sa.len() - num_wstrs;
    for i in 0..text.len() {
        if stypes.is_valley(i) {
            sa[j] = i as u32;
            j += 1;
        }
    }
    for i in 0..num_wstrs {
        let sufi = sa[i];
        sa[i] = sa[sa.len() - num_wstrs + sufi as usize];
    }
    sa[num_wstrs..].fill(0);

    // Final induction from the sorted wstrings.
    bins.find_tail_pointers();
    for i in (0..num_wstrs).rev() {
        let sufi = sa[i];
        sa[i] = 0;
        bins.tail_insert(sa, sufi, text.char_at(sufi as usize));
    }

    bins.find_head_pointers();
    let (lasti, lastc) = text.prev(text.len());
    if stypes.is_desc(lasti) {
        bins.head_insert(sa, lasti as u32, lastc);
    }
    for i in 0..sa.len() {
        let sufi = sa[i];
        if sufi > 0 {
            let (lasti, lastc) = text.prev(sufi as usize);
            if stypes.is_desc(lasti) {
                bins.head_insert(sa, lasti as u32, lastc);
            }
        }
    }

    bins.find_tail_pointers();
    for i in (0..sa.len()).rev() {
        let sufi = sa[i];
        if sufi > 0 {
            let (lasti, lastc) = text.prev(sufi as usize);
            if stypes.is_asc(lasti) {
                bins.tail_insert(sa, lasti as u32, lastc);
            }
        }
    }
}

// --------------------------------------------------
struct SuffixTypes {
    types: Vec<SuffixType>,
}

#[derive(Clone, Copy, Debug, Eq)]
enum SuffixType {
    Ascending,
    Descending,
    Valley,
}

impl SuffixTypes {
    fn new(len: usize) -> SuffixTypes {
        SuffixTypes {
            types: vec![Ascending; len],
        }
    }

    fn compute<T: Text + ?Sized>(&mut self, text: &T) {
        if text.len() == 0 {
            return;
        }

        let mut lasti = text.len() - 1;
        let mut lastc = text.char_at(lasti);
        self.types[lasti] = Descending;

        for i in (0..text.len() - 1).rev() {
            let c = text.char_at(i);
            if c < lastc {
                self.types[i] = Ascending;
            } else if c > lastc {
                self.types[i] = Descending;
            } else {
                self.types[i] = self.types[lasti].inherit();
            }
            if self.types[i].is_desc() && self.types[lasti].is_asc() {
                self.types[lasti] = Valley;
            }
            lastc = c;
            lasti = i;
        }
    }

    #[inline]
    fn is_asc(&self, i: usize) -> bool {
        self.types[i].is_asc()
    }

    #[inline]
    fn is_desc(&self, i: usize) -> bool {
        self.types[i].is_desc()
    }

    #[inline]
    fn is_valley(&self, i: usize) -> bool {
        self.types[i].is_valley()
    }

    #[inline]
    fn equal(&self, i: usize, j: usize) -> bool {
        self.types[i] == self.types[j]
    }
}

impl SuffixType {
    #[inline]
    fn is_asc(&self) -> bool {
        matches!(*self, Ascending | Valley)
    }

    #[inline]
    fn is_desc(&self) -> bool {
        matches!(*self, Descending)
    }

    #[inline]
    fn is_valley(&self) -> bool {
        matches!(*self, Valley)
    }

    fn inherit(&self) -> SuffixType {
        match *self {
            Valley => Ascending,
            _ => *self,
        }
    }
}

impl PartialEq for SuffixType {
    #[inline]
    fn eq(&self, other: &SuffixType) -> bool {
        (self.is_asc() && other.is_asc()) || (self.is_desc() && other.is_desc())
    }
}

// --------------------------------------------------
struct Bins {
    alphas: Vec<u32>,
    sizes: Vec<u32>,
    ptrs: Vec<u32>,
}

impl Bins {
    fn new() -> Bins {
        Bins {
            alphas: Vec::with_capacity(256),
            sizes: Vec::with_capacity(256),
            ptrs: Vec::new(),
        }
    }

    fn find_sizes<I>(&mut self, chars: I)
    where
        I: Iterator<Item = u32>,
    {
        self.alphas.clear();
        self.sizes.fill(0);
        for c in chars {
            self.inc_size(c);
            if self.size(c) == 1 {
                self.alphas.push(c);
            }
        }
        self.alphas.par_sort_unstable();

        let ptrs_len = self.alphas[self.alphas.len() - 1] + 1;
        self.ptrs = vec![0u32; ptrs_len as usize];
    }

    fn find_head_pointers(&mut self) {
        let mut sum = 0u32;
        for &c in self.alphas.iter() {
            self.ptrs[c as usize] = sum;
            sum += self.size(c);
        }
    }

    fn find_tail_pointers(&mut self) {
        let mut sum = 0u32;
        for &c in self.alphas.iter() {
            sum += self.size(c);
            self.ptrs[c as usize] = sum - 1;
        }
    }

    #[inline]
    fn head_insert(&mut self, sa: &mut [u32], i: u32, c: u32) {
        let ptr = &mut self.ptrs[c as usize];
        sa[*ptr as usize] = i;
        *ptr += 1;
    }

    #[inline]
    fn tail_insert(&mut self, sa: &mut [u32], i: u32, c: u32) {
        let ptr = &mut self.ptrs[c as usize];
        sa[*ptr as usize] = i;
        if *ptr > 0 {
            *ptr -= 1;
        }
    }

    #[inline]
    fn inc_size(&mut self, c: u32) {
        if c as usize >= self.sizes.len() {
            self.sizes.resize(1 + c as usize, 0);
        }
        self.sizes[c as usize] += 1;
    }

    #[inline]
    fn size(&self, c: u32) -> u32 {
        self.sizes[c as usize]
    }
}

// --------------------------------------------------
/// Indexing over the two text kinds the recursion sees: raw bytes at the
/// top level, lexical names below.
trait Text {
    fn len(&self) -> usize;
    fn char_at(&self, i: usize) -> u32;
    fn prev(&self, i: usize) -> (usize, u32);
    fn wstring_equal(&self, stypes: &SuffixTypes, w1: usize, w2: usize) -> bool;
}

struct Bytes<'a>(&'a [u8]);

impl Text for Bytes<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    fn char_at(&self, i: usize) -> u32 {
        self.0[i] as u32
    }

    #[inline]
    fn prev(&self, i: usize) -> (usize, u32) {
        (i - 1, self.0[i - 1] as u32)
    }

    fn wstring_equal(&self, stypes: &SuffixTypes, w1: usize, w2: usize) -> bool {
        wstring_equal_impl(
            stypes,
            w1,
            w2,
            self.0.len(),
            |i| self.0[i] as u32,
        )
    }
}

struct LexNames<'a>(&'a [u32]);

impl Text for LexNames<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    fn char_at(&self, i: usize) -> u32 {
        self.0[i]
    }

    #[inline]
    fn prev(&self, i: usize) -> (usize, u32) {
        (i - 1, self.0[i - 1])
    }

    fn wstring_equal(&self, stypes: &SuffixTypes, w1: usize, w2: usize) -> bool {
        wstring_equal_impl(stypes, w1, w2, self.0.len(), |i| self.0[i])
    }
}

// --------------------------------------------------
fn wstring_equal_impl<F>(
    stypes: &SuffixTypes,
    w1: usize,
    w2: usize,
    len: usize,
    char_at: F,
) -> bool
where
    F: Fn(usize) -> u32,
{
    for offset in 0.. {
        let (i1, i2) = (w1 + offset, w2 + offset);
        if i1 >= len || i2 >= len {
            // One wstring ran into the virtual sentinel; since w1 != w2
            // the wstrings cannot be equal.
            return false;
        }
        if char_at(i1) != char_at(i2) || !stypes.equal(i1, i2) {
            return false;
        }
        if offset > 0 && (stypes.is_valley(i1) || stypes.is_valley(i2)) {
            return true;
        }
    }
    unreachable!()
}

// --------------------------------------------------
/// Brute-force reference used by tests throughout the crate.
#[cfg(test)]
pub(crate) fn sort_naive(text: &[u8]) -> Vec<u32> {
    let mut sa: Vec<u32> = (0..text.len() as u32).collect();
    sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
    sa
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::{sort_block, sort_naive};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_known_suffix_arrays() -> Result<()> {
        assert_eq!(sort_block(b"")?, Vec::<u32>::new());
        assert_eq!(sort_block(b"a")?, vec![0]);
        assert_eq!(sort_block(b"banana")?, vec![5, 3, 1, 0, 4, 2]);
        assert_eq!(
            sort_block(b"mississippi")?,
            vec![10, 7, 4, 1, 0, 9, 8, 6, 3, 5, 2]
        );
        Ok(())
    }

    #[test]
    fn test_degenerate_inputs() -> Result<()> {
        assert_eq!(sort_block(b"aaaaaaaa")?, vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(sort_block(b"abababab")?, sort_naive(b"abababab"));
        assert_eq!(sort_block(&[0, 0, 255, 0, 0])?, sort_naive(&[0, 0, 255, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_random_small_alphabet() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(5);
        for len in [2usize, 3, 10, 100, 1000, 4096] {
            let text: Vec<u8> =
                (0..len).map(|_| rng.gen_range(b'a'..=b'b')).collect();
            assert_eq!(sort_block(&text)?, sort_naive(&text), "len {len}");
        }
        Ok(())
    }

    #[test]
    fn test_random_full_alphabet() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(99);
        for len in [17usize, 255, 1024, 10_000] {
            let text: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert_eq!(sort_block(&text)?, sort_naive(&text), "len {len}");
        }
        Ok(())
    }
}
