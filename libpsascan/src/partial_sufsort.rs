//! The block driver: walk the text right to left, sort each block in
//! memory, stream the tail through it to build the block's gap array and
//! the next iteration's tail `gt`, and leave the partial SA behind as a
//! scatterfile.

use crate::{
    gap_array::GapArray,
    gt::TailInfo,
    inmem::{inmem_sufsort, InmemParams},
    initial_ranks::tail_boundary_ranks,
    io::{
        self,
        multifile::Multifile,
        scatterfile::ScatterfileWriter,
    },
    merge::BlockInfo,
    rank::RankSupport,
    stream::{compute_gap, segment_bounds, StreamParams},
    types::{random_hash, BuilderArgs, RAM_PER_INPUT_BYTE},
};
use anyhow::{bail, Result};
use log::info;
use std::time::Instant;

// --------------------------------------------------
/// Process every block; returns the merge inputs, leftmost block first
/// not guaranteed (the caller sorts).
pub fn partial_sufsort(
    args: &BuilderArgs,
    text_len: u64,
    max_block_size: u64,
) -> Result<Vec<BlockInfo>> {
    let n_blocks = text_len.div_ceil(max_block_size);
    info!(
        "{text_len} bytes in {n_blocks} block{} of <= {max_block_size}",
        if n_blocks == 1 { "" } else { "s" }
    );

    let mut tail_gt: Option<Multifile> = None;
    let mut blocks = vec![];
    for block_id in (0..n_blocks).rev() {
        let block_beg = block_id * max_block_size;
        let block_end = (block_beg + max_block_size).min(text_len);
        info!(
            "process block {}/{n_blocks} [{block_beg}..{block_end}):",
            n_blocks - block_id
        );

        let new_tail_gt = match process_block(
            args,
            block_beg,
            block_end,
            text_len,
            tail_gt.as_ref(),
            &mut blocks,
        ) {
            Ok(new_tail_gt) => new_tail_gt,
            Err(e) => {
                // Best-effort cleanup of everything staged so far.
                if let Some(old) = tail_gt.take() {
                    old.destroy();
                }
                for block in &blocks {
                    if let Some(name) = &block.gap_filename {
                        io::delete_file(name);
                    }
                    io::delete_file(&block.catalog_filename);
                    block.psa.destroy();
                }
                return Err(e);
            }
        };

        if let Some(old) = tail_gt.take() {
            old.destroy();
        }
        tail_gt = new_tail_gt;
    }
    if let Some(tail) = tail_gt.take() {
        tail.destroy();
    }

    Ok(blocks)
}

// --------------------------------------------------
fn process_block(
    args: &BuilderArgs,
    block_beg: u64,
    block_end: u64,
    text_len: u64,
    tail_gt: Option<&Multifile>,
    blocks: &mut Vec<BlockInfo>,
) -> Result<Option<Multifile>> {
    let block_size = (block_end - block_beg) as usize;
    if block_end != text_len && block_size <= 1 {
        bail!("any block other than the last one has to be of length at least two");
    }
    let has_tail = block_end < text_len;
    let first_block = block_beg == 0;

    // Read the block and as much of the tail as comparisons can need.
    let now = Instant::now();
    let mut text = io::read_at(&args.input, block_beg, block_size)?;
    let tail_prefix_len =
        (block_size as u64).min(text_len - block_end) as usize;
    let tail_prefix = if has_tail {
        io::read_at(&args.input, block_end, tail_prefix_len)?
    } else {
        vec![]
    };
    info!("  read block + tail prefix: {:?}", now.elapsed());

    let tail_info = tail_gt.map(|gt| TailInfo {
        prefix: &tail_prefix,
        gt,
        block_end,
        text_len,
    });

    // Sort the block, consistent with its right context.
    let now = Instant::now();
    let inmem_params = InmemParams {
        n_threads: args.max_threads,
        n_increasers: args.max_threads,
        buf_elems: (args.stream_buf_size / 4).max(64),
        random_seed: args.random_seed,
        ram_per_input_byte: RAM_PER_INPUT_BYTE,
    };
    let result =
        inmem_sufsort(&mut text, tail_info.as_ref(), !first_block, &inmem_params)?;
    info!("  internal memory sufsort: {:?}", now.elapsed());

    // Partial SA to disk as a scatterfile.
    let now = Instant::now();
    let max_part_length = (args.mem_bytes as u64 / 20).max(4);
    let mut psa_writer: ScatterfileWriter<u32> = ScatterfileWriter::new(
        &args.output,
        max_part_length,
        args.stream_buf_size,
    )?;
    psa_writer.write(&result.psa)?;
    let scatterfile = psa_writer.finish()?;
    let catalog_filename = format!("{}.cat.{}", args.output, random_hash());
    scatterfile.save_catalog(&catalog_filename)?;
    info!(
        "  write partial SA to disk ({} records): {:?}",
        scatterfile.total_records(),
        now.elapsed()
    );

    // The new tail gt starts with the block's own bits.
    let mut new_tail_gt = (!first_block).then(Multifile::new);
    if let (Some(multifile), Some(gt_begin)) =
        (new_tail_gt.as_mut(), &result.gt_begin)
    {
        let filename = format!("{}.{}", args.output, random_hash());
        gt_begin.save(&filename)?;
        multifile.add_file(
            text_len - block_end,
            text_len - block_beg,
            &filename,
        );
    }

    let gap_filename = if has_tail {
        // Seed one streaming segment per thread, then walk the whole
        // tail through the block's rank structure.
        let now = Instant::now();
        let seg_bounds = segment_bounds(block_end, text_len, args.max_threads);
        let positions: Vec<u64> =
            seg_bounds[1..].iter().map(|&e| e - 1).collect();
        let init_ranks = tail_boundary_ranks(
            &args.input,
            &text,
            &result.psa,
            block_end,
            text_len,
            tail_gt.unwrap(),
            &positions,
        )?;
        info!("  initial tail ranks: {:?}", now.elapsed());

        let last_byte = text[block_size - 1];
        drop(text);
        drop(result.psa);

        let now = Instant::now();
        let rank = RankSupport::new(result.bwt);
        info!("  construct rank: {:?}", now.elapsed());

        let now = Instant::now();
        let mut gap = GapArray::new(block_size + 1, &args.gap_prefix);
        let params = StreamParams {
            text_filename: &args.input,
            block_end,
            text_len,
            last_byte,
            i0: result.i0,
            n_increasers: args.max_threads,
            buf_elems: (args.stream_buf_size / 4).max(64),
            random_seed: args.random_seed,
            gt_out_prefix: &args.output,
        };
        let gt_entries = compute_gap(
            &rank,
            &params,
            tail_gt.unwrap(),
            &init_ranks,
            &seg_bounds,
            &mut gap,
        )?;
        info!("  stream: {:?}", now.elapsed());

        if let Some(multifile) = new_tail_gt.as_mut() {
            for (beg, end, filename) in &gt_entries {
                multifile.add_file(*beg, *end, filename);
            }
        } else {
            for (_, _, filename) in &gt_entries {
                io::delete_file(filename);
            }
        }

        let now = Instant::now();
        let gap_filename =
            format!("{}.gap.{}", args.gap_prefix, random_hash());
        let bytes = gap
            .into_2n()?
            .save_vbyte(&gap_filename, args.stream_buf_size)?;
        info!("  gap save ({bytes} bytes): {:?}", now.elapsed());
        Some(gap_filename)
    } else {
        None
    };

    blocks.push(BlockInfo {
        beg: block_beg,
        end: block_end,
        psa: scatterfile,
        catalog_filename,
        gap_filename,
    });
    Ok(new_tail_gt)
}
