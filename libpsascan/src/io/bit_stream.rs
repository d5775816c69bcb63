//! Bit stream writer: bits packed little-endian within bytes, written
//! through the async byte stream. Used for the per-segment `gt` files the
//! streamer leaves behind for the next block iteration.

use super::stream_writer::AsyncStreamWriter;
use anyhow::Result;

// --------------------------------------------------
#[derive(Debug)]
pub struct BitStreamWriter {
    inner: AsyncStreamWriter<u8>,
    pending: u8,
    filled: u32,
}

impl BitStreamWriter {
    pub fn new(filename: &str, buf_size: usize) -> Result<Self> {
        Ok(BitStreamWriter {
            inner: AsyncStreamWriter::new(filename, buf_size)?,
            pending: 0,
            filled: 0,
        })
    }

    pub fn write(&mut self, bit: bool) -> Result<()> {
        if bit {
            self.pending |= 1 << self.filled;
        }
        self.filled += 1;
        if self.filled == 8 {
            self.inner.write(self.pending)?;
            self.pending = 0;
            self.filled = 0;
        }
        Ok(())
    }

    /// Pad the last byte with zeros and close the file.
    pub fn finish(mut self) -> Result<u64> {
        if self.filled > 0 {
            self.inner.write(self.pending)?;
        }
        self.inner.finish()
    }
}
