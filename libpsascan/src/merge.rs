//! Final merge: streams every block's partial SA and gap file into the
//! output suffix array.
//!
//! At each output position the leftmost block whose running gap head is
//! zero supplies the next value. Blocks are grouped into ~sqrt(n_blocks)
//! superblocks, each caching (min gap head, pending decrement), so the
//! zero search touches one superblock plus the superblock directory
//! instead of every block.

use crate::{
    io::{
        self,
        scatterfile::{Scatterfile, ScatterfileReader},
        stream_writer::AsyncStreamWriter,
        vbyte::VbyteReader,
    },
    types::Int,
};
use anyhow::{anyhow, Result};
use log::info;
use std::time::Instant;

// --------------------------------------------------
/// Everything the merge needs to know about one processed block.
#[derive(Debug)]
pub struct BlockInfo {
    pub beg: u64,
    pub end: u64,
    pub psa: Scatterfile,
    pub catalog_filename: String,

    /// v-byte gap stream; absent only for the rightmost block.
    pub gap_filename: Option<String>,
}

// --------------------------------------------------
pub fn merge<W>(
    output_filename: &str,
    ram_use: usize,
    mut blocks: Vec<BlockInfo>,
) -> Result<u64>
where
    W: Int,
{
    blocks.sort_by_key(|b| b.beg);
    let result = merge_streams::<W>(output_filename, ram_use, &blocks);

    // The intermediates have served their purpose, whichever way the
    // merge went.
    for block in &blocks {
        if let Some(name) = &block.gap_filename {
            io::delete_file(name);
        }
        io::delete_file(&block.catalog_filename);
        block.psa.destroy();
    }

    result
}

// --------------------------------------------------
fn merge_streams<W>(
    output_filename: &str,
    ram_use: usize,
    blocks: &[BlockInfo],
) -> Result<u64>
where
    W: Int,
{
    let n_blocks = blocks.len();
    let text_length: u64 = blocks.iter().map(|b| b.end - b.beg).sum();

    // One buffer per open stream, sized to share the budget.
    let pieces = 5 * n_blocks - 1 + W::RECORD_SIZE;
    let buffer_size = (ram_use / pieces).clamp(1 << 12, 64 << 20);
    info!(
        "merging {n_blocks} block{} with {buffer_size}-byte stream buffers",
        if n_blocks == 1 { "" } else { "s" }
    );

    let mut output: AsyncStreamWriter<W> =
        AsyncStreamWriter::new(output_filename, buffer_size * W::RECORD_SIZE)?;
    let mut psa_readers: Vec<ScatterfileReader<u32>> = blocks
        .iter()
        .map(|b| ScatterfileReader::new(&b.psa, buffer_size * 4))
        .collect::<Result<_>>()?;
    let mut gap_readers: Vec<Option<VbyteReader>> = blocks
        .iter()
        .map(|b| -> Result<Option<VbyteReader>> {
            match &b.gap_filename {
                Some(name) => Ok(Some(VbyteReader::new(name, buffer_size)?)),
                None => Ok(None),
            }
        })
        .collect::<Result<_>>()?;

    let mut gap_head = vec![0u64; n_blocks];
    for j in 0..n_blocks - 1 {
        gap_head[j] = gap_readers[j].as_mut().unwrap().read()?;
    }

    // Superblock directory: largest power of two not above sqrt(n).
    let tmp = (n_blocks as f64).sqrt() as u64;
    let mut sblock_size = 1usize;
    let mut sblock_size_log = 0u32;
    while sblock_size * 2 <= tmp as usize {
        sblock_size *= 2;
        sblock_size_log += 1;
    }
    let n_sblocks = n_blocks.div_ceil(sblock_size);
    let mut sblock_info: Vec<(u64, u64)> = (0..n_sblocks)
        .map(|k| {
            let beg = k * sblock_size;
            let end = n_blocks.min(beg + sblock_size);
            let min_head =
                gap_head[beg..end].iter().copied().min().unwrap();
            (min_head, 0u64)
        })
        .collect();

    let merge_start = Instant::now();
    for _ in 0..text_length {
        // Find the superblock holding an effective zero, decrementing the
        // cached minima on the way.
        let mut k = 0usize;
        while sblock_info[k].0 != 0 {
            sblock_info[k].0 -= 1;
            sblock_info[k].1 += 1;
            k += 1;
        }

        // Linear scan only inside that superblock; heads lag behind by
        // the superblock's pending decrement.
        let sblock_beg = k << sblock_size_log;
        let sblock_end = n_blocks.min(sblock_beg + sblock_size);
        let pending = sblock_info[k].1;
        let mut new_min = u64::MAX;
        let mut j = sblock_beg;
        while gap_head[j] != pending {
            gap_head[j] -= pending + 1;
            new_min = new_min.min(gap_head[j]);
            j += 1;
        }

        let sa_val = psa_readers[j]
            .read()?
            .ok_or_else(|| anyhow!("partial suffix array ended early"))?;
        output.write(W::from_u64(sa_val as u64 + blocks[j].beg))?;

        if j + 1 != n_blocks {
            gap_head[j] = gap_readers[j].as_mut().unwrap().read()?;
        } else {
            gap_head[j] = 0;
        }
        new_min = new_min.min(gap_head[j]);
        j += 1;

        while j < sblock_end {
            gap_head[j] -= pending;
            new_min = new_min.min(gap_head[j]);
            j += 1;
        }
        sblock_info[k] = (new_min, 0);
    }

    let written = output.finish()?;
    info!(
        "merged {text_length} positions in {:?}",
        merge_start.elapsed()
    );
    Ok(written)
}
