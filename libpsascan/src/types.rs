//! Common types

use anyhow::{bail, Result};
use std::fmt::{self, Debug, Display};

// --------------------------------------------------
/// Largest block the in-memory sorter accepts. Partial suffix arrays are
/// addressed with `u32`, so a block must stay below 2 GiB.
pub const MAX_BLOCK_SIZE: usize = (1 << 31) - 1;

/// RAM charged per input byte of a block: text (1) + SA/BWT arena (5) +
/// merge output (5) + gt bitvectors and slack (1).
pub const RAM_PER_INPUT_BYTE: usize = 12;

/// Sampling rate (log2) of the sparse inverse suffix array.
pub const SPARSE_ISA_RATE_LOG: u32 = 12;

// --------------------------------------------------
/// A fixed-width little-endian integer record, as stored in suffix array,
/// gap and excess files. `Uint40` gives the default 5-byte output records;
/// `u64` is used for texts of 2^40 bytes and more.
pub trait Int:
    Debug + Default + Display + Copy + Clone + Ord + Send + Sync
{
    const RECORD_SIZE: usize;
    const MAX: u64;

    fn from_u64(val: u64) -> Self;
    fn to_u64(&self) -> u64;

    /// Write the record into `buf[..RECORD_SIZE]`, little-endian.
    fn write_le(&self, buf: &mut [u8]);

    /// Read a record from `buf[..RECORD_SIZE]`, little-endian.
    fn read_le(buf: &[u8]) -> Self;

    fn to_usize(&self) -> usize {
        self.to_u64() as usize
    }

    fn from_usize(val: usize) -> Self {
        Self::from_u64(val as u64)
    }
}

// --------------------------------------------------
impl Int for u8 {
    const RECORD_SIZE: usize = 1;
    const MAX: u64 = u8::MAX as u64;

    fn from_u64(val: u64) -> Self {
        val as u8
    }

    fn to_u64(&self) -> u64 {
        *self as u64
    }

    fn write_le(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }

    fn read_le(buf: &[u8]) -> Self {
        buf[0]
    }
}

// --------------------------------------------------
impl Int for u32 {
    const RECORD_SIZE: usize = 4;
    const MAX: u64 = u32::MAX as u64;

    fn from_u64(val: u64) -> Self {
        val as u32
    }

    fn to_u64(&self) -> u64 {
        *self as u64
    }

    fn write_le(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Self {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }
}

// --------------------------------------------------
impl Int for u64 {
    const RECORD_SIZE: usize = 8;
    const MAX: u64 = u64::MAX;

    fn from_u64(val: u64) -> Self {
        val
    }

    fn to_u64(&self) -> u64 {
        *self
    }

    fn write_le(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Self {
        u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ])
    }
}

// --------------------------------------------------
/// A 40-bit unsigned integer packed as 5 little-endian bytes. Text offsets
/// up to 2^40 − 1 fit, which keeps the output file at 5 bytes per position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Uint40([u8; 5]);

// The packed bytes are little-endian, so the derived lexicographic order
// would be wrong; compare as integers.
impl Ord for Uint40 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_u64().cmp(&other.to_u64())
    }
}

impl PartialOrd for Uint40 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Int for Uint40 {
    const RECORD_SIZE: usize = 5;
    const MAX: u64 = (1 << 40) - 1;

    fn from_u64(val: u64) -> Self {
        let b = val.to_le_bytes();
        Uint40([b[0], b[1], b[2], b[3], b[4]])
    }

    fn to_u64(&self) -> u64 {
        let b = self.0;
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], 0, 0, 0])
    }

    fn write_le(&self, buf: &mut [u8]) {
        buf[..5].copy_from_slice(&self.0);
    }

    fn read_le(buf: &[u8]) -> Self {
        Uint40([buf[0], buf[1], buf[2], buf[3], buf[4]])
    }
}

impl Display for Uint40 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_u64())
    }
}

// --------------------------------------------------
/// The arguments for building a suffix array on disk.
#[derive(Debug, Clone)]
pub struct BuilderArgs {
    /// Path to the input text (a raw byte file).
    pub input: String,

    /// Path of the output suffix array file.
    pub output: String,

    /// Prefix for the working gap files. The directory must be writable.
    pub gap_prefix: String,

    /// RAM budget in bytes.
    pub mem_bytes: usize,

    /// Number of worker threads used by every parallel phase.
    pub max_threads: usize,

    /// Size in bytes of one streaming buffer. The streamer keeps
    /// `2 * max_threads` of these alive.
    pub stream_buf_size: usize,

    /// Seed for the sampled partition fallback. A fixed seed makes two runs
    /// over the same input produce identical intermediate files.
    pub random_seed: u64,
}

// --------------------------------------------------
impl BuilderArgs {
    pub fn new(input: &str, output: &str) -> Self {
        BuilderArgs {
            input: input.to_string(),
            output: output.to_string(),
            gap_prefix: output.to_string(),
            mem_bytes: 3072 << 20,
            max_threads: 1,
            stream_buf_size: 1 << 21,
            random_seed: 0,
        }
    }

    /// Largest block the configured budget allows.
    pub fn max_block_size(&self) -> Result<usize> {
        let block = (self.mem_bytes / RAM_PER_INPUT_BYTE).min(MAX_BLOCK_SIZE);
        if block == 0 {
            bail!("RAM budget {} is too small", self.mem_bytes);
        }
        Ok(block)
    }
}

// --------------------------------------------------
/// Generate a random hex hash used to name intermediate files.
pub fn random_hash() -> String {
    use rand::Rng;
    let val: u64 = rand::thread_rng().gen();
    format!("{val:016x}")
}
