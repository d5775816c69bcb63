//! Streaming buffers and their partition into updater super-buckets.
//!
//! A worker fills a buffer with gap indices and hands it over already
//! partitioned: each of the `n_increasers` super-buckets holds the values
//! of one disjoint slot range, so the updaters can split the counter
//! array and work without locks. The quick path agglomerates a fixed
//! power-of-two bucket histogram; when that comes out too lopsided the
//! worker redoes the split from a random sample.

use rand::{rngs::StdRng, Rng};

const MAX_BUCKETS: usize = 4092;
const SAMPLE_SIZE: usize = 512;

// --------------------------------------------------
#[derive(Debug)]
pub struct SuperBucket {
    /// Offset of this super-bucket inside `content`.
    pub beg: usize,
    pub len: usize,

    /// Smallest slot value this super-bucket may hold; the next
    /// super-bucket's `value_lo` (or the gap length) bounds it above.
    pub value_lo: usize,
}

// --------------------------------------------------
#[derive(Debug)]
pub struct GapBuffer {
    pub content: Vec<u32>,
    pub filled: usize,
    pub sblocks: Vec<SuperBucket>,
}

impl GapBuffer {
    pub fn new(capacity: usize) -> Self {
        GapBuffer {
            content: vec![0u32; capacity],
            filled: 0,
            sblocks: vec![],
        }
    }
}

// --------------------------------------------------
/// Per-worker partition state, reused across buffers.
#[derive(Debug)]
pub struct Partitioner {
    gap_range: usize,
    n_increasers: usize,
    bucket_size_bits: u32,
    n_buckets: usize,
    bucket_count: Vec<u32>,
    sblock_of_bucket: Vec<u16>,
    oracle: Vec<u32>,
    rng: StdRng,
}

impl Partitioner {
    pub fn new(
        gap_range: usize,
        n_increasers: usize,
        buf_elems: usize,
        rng: StdRng,
    ) -> Self {
        let mut bucket_size_bits = 0u32;
        while gap_range.div_ceil(1 << bucket_size_bits) > MAX_BUCKETS {
            bucket_size_bits += 1;
        }
        let n_buckets = gap_range.div_ceil(1 << bucket_size_bits).max(1);

        Partitioner {
            gap_range,
            n_increasers,
            bucket_size_bits,
            n_buckets,
            bucket_count: vec![0u32; n_buckets],
            sblock_of_bucket: vec![0u16; n_buckets],
            oracle: vec![0u32; buf_elems],
            rng,
        }
    }

    pub fn reset(&mut self) {
        self.bucket_count.fill(0);
    }

    /// Record one produced value into the histogram.
    #[inline(always)]
    pub fn note(&mut self, val: u32) {
        self.bucket_count[(val >> self.bucket_size_bits) as usize] += 1;
    }

    // --------------------------------------------------
    /// Partition `temp[..filled]` into `buf`.
    pub fn partition(&mut self, temp: &[u32], buf: &mut GapBuffer) {
        let filled = temp.len();
        buf.filled = filled;
        buf.sblocks.clear();

        let ideal = filled.div_ceil(self.n_increasers);

        // Agglomerate buckets left-to-right into super-buckets of about
        // `ideal` elements each, tracking the largest one.
        let mut max_sbucket = 0usize;
        let mut bucket_id_beg = 0usize;
        for t in 0..self.n_increasers {
            let mut bucket_id_end = bucket_id_beg;
            let mut size = 0usize;
            while bucket_id_end < self.n_buckets && size < ideal {
                size += self.bucket_count[bucket_id_end] as usize;
                bucket_id_end += 1;
            }
            max_sbucket = max_sbucket.max(size);
            for id in bucket_id_beg..bucket_id_end {
                self.sblock_of_bucket[id] = t as u16;
            }
            buf.sblocks.push(SuperBucket {
                beg: 0,
                len: size,
                value_lo: (bucket_id_beg << self.bucket_size_bits)
                    .min(self.gap_range),
            });
            bucket_id_beg = bucket_id_end;
        }

        if max_sbucket < 4 * ideal {
            // Quick path: the agglomeration is even enough.
            let mut ptr = vec![0usize; self.n_increasers];
            let mut cur = 0usize;
            for (t, sblock) in buf.sblocks.iter_mut().enumerate() {
                sblock.beg = cur;
                ptr[t] = cur;
                cur += sblock.len;
            }

            for (i, &val) in temp.iter().enumerate() {
                let id = (val >> self.bucket_size_bits) as usize;
                let sblock_id = self.sblock_of_bucket[id] as usize;
                self.oracle[i] = ptr[sblock_id] as u32;
                ptr[sblock_id] += 1;
            }
            for (i, &val) in temp.iter().enumerate() {
                buf.content[self.oracle[i] as usize] = val;
            }
        } else {
            // Fallback: derive the super-bucket bounds from a sample.
            self.sampled_partition(temp, buf);
        }

        debug_assert!(buf
            .sblocks
            .windows(2)
            .all(|w| w[0].value_lo <= w[1].value_lo));
    }

    // --------------------------------------------------
    fn sampled_partition(&mut self, temp: &[u32], buf: &mut GapBuffer) {
        let filled = temp.len();
        let mut samples: Vec<u32> = (0..SAMPLE_SIZE)
            .map(|_| temp[self.rng.gen_range(0..filled)])
            .collect();
        samples.sort_unstable();
        samples.dedup();

        let mut lbound = vec![self.gap_range; self.n_increasers + 1];
        lbound[0] = 0;
        let step = samples.len().div_ceil(self.n_increasers);
        let mut t = 1;
        let mut p = step;
        while p < samples.len() {
            lbound[t] = (samples[p - 1] as usize + samples[p] as usize + 1) / 2;
            t += 1;
            p += step;
        }

        buf.sblocks.clear();
        let mut sizes = vec![0usize; self.n_increasers];
        for (i, &val) in temp.iter().enumerate() {
            let mut id = self.n_increasers;
            while lbound[id] > val as usize {
                id -= 1;
            }
            self.oracle[i] = id as u32;
            sizes[id] += 1;
        }

        let mut ptr = vec![0usize; self.n_increasers];
        let mut cur = 0usize;
        for (t, &size) in sizes.iter().enumerate() {
            buf.sblocks.push(SuperBucket {
                beg: cur,
                len: size,
                value_lo: lbound[t],
            });
            ptr[t] = cur;
            cur += size;
        }

        for i in 0..filled {
            let sblock_id = self.oracle[i] as usize;
            self.oracle[i] = ptr[sblock_id] as u32;
            ptr[sblock_id] += 1;
        }
        for (i, &val) in temp.iter().enumerate() {
            buf.content[self.oracle[i] as usize] = val;
        }
    }
}
