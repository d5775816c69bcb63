//! External-memory parallel suffix array construction.
//!
//! Given a raw byte file of length n and a RAM budget, writes the suffix
//! array as fixed-width little-endian records. The text is cut into
//! blocks sized by the budget; each block is sorted in memory (renamed
//! sub-block sorting plus a balanced merge), the rest of the text is
//! streamed right-to-left through a rank structure over the block's BWT
//! to produce a gap array, and a final disk merge interleaves all the
//! partial suffix arrays.
//!
//! ```no_run
//! use libpsascan::{types::{BuilderArgs, Uint40}, write_suffix_array};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut args = BuilderArgs::new("input.txt", "input.txt.sa5");
//!     args.max_threads = 8;
//!     write_suffix_array::<Uint40>(&args)?;
//!     Ok(())
//! }
//! ```

pub mod bitvector;
pub mod bwt;
pub mod gap_array;
pub mod gap_buffer;
pub mod gt;
pub mod initial_ranks;
pub mod inmem;
pub mod io;
pub mod merge;
pub mod partial_sufsort;
pub mod rank;
pub mod sparse_isa;
pub mod stream;
pub mod suffix_sort;
pub mod types;
pub mod update;

use anyhow::{bail, Result};
use log::info;
use std::time::Instant;
use types::{BuilderArgs, Int};

// --------------------------------------------------
/// Length of the input text, from the file size.
pub fn read_text_length(filename: &str) -> Result<u64> {
    io::file_size(filename)
}

// --------------------------------------------------
/// Build the suffix array of `args.input` and write it to `args.output`
/// as `W` records.
pub fn write_suffix_array<W>(args: &BuilderArgs) -> Result<u64>
where
    W: Int,
{
    let text_len = read_text_length(&args.input)?;
    if text_len == 0 {
        bail!("{}: empty input", args.input);
    }
    if text_len > W::MAX {
        bail!(
            "{}: text of {text_len} bytes exceeds the {}-byte output \
             record range",
            args.input,
            W::RECORD_SIZE
        );
    }

    let max_block_size = (args.max_block_size()? as u64)
        .min(text_len)
        .max(2u64.min(text_len));

    let total = Instant::now();
    let blocks =
        partial_sufsort::partial_sufsort(args, text_len, max_block_size)?;
    let written = merge::merge::<W>(&args.output, args.mem_bytes, blocks)?;
    info!(
        "wrote {written} bytes to '{}' in {:?}",
        args.output,
        total.elapsed()
    );
    Ok(written)
}
