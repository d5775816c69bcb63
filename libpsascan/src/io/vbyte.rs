//! v-byte codec: 7 data bits per byte, high bit marks continuation.

use super::{stream_reader::AsyncStreamReader, stream_writer::AsyncStreamWriter};
use anyhow::{bail, Result};

// --------------------------------------------------
pub fn encode(mut val: u64, out: &mut Vec<u8>) {
    while val > 127 {
        out.push((val & 0x7f) as u8 | 0x80);
        val >>= 7;
    }
    out.push(val as u8);
}

// --------------------------------------------------
pub fn decode(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut val = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        val |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    bail!("truncated v-byte value");
}

// --------------------------------------------------
/// Streaming v-byte writer over the async byte stream.
#[derive(Debug)]
pub struct VbyteWriter {
    inner: AsyncStreamWriter<u8>,
    scratch: Vec<u8>,
}

impl VbyteWriter {
    pub fn new(filename: &str, buf_size: usize) -> Result<Self> {
        Ok(VbyteWriter {
            inner: AsyncStreamWriter::new(filename, buf_size)?,
            scratch: Vec::with_capacity(10),
        })
    }

    pub fn write(&mut self, val: u64) -> Result<()> {
        self.scratch.clear();
        encode(val, &mut self.scratch);
        for i in 0..self.scratch.len() {
            self.inner.write(self.scratch[i])?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<u64> {
        self.inner.finish()
    }
}

// --------------------------------------------------
/// Streaming v-byte reader over the async byte stream. Running off the end
/// of the file mid-stream is an error: gap files always hold exactly the
/// values the merge asks for.
#[derive(Debug)]
pub struct VbyteReader {
    inner: AsyncStreamReader<u8>,
}

impl VbyteReader {
    pub fn new(filename: &str, buf_size: usize) -> Result<Self> {
        Ok(VbyteReader {
            inner: AsyncStreamReader::new(filename, buf_size)?,
        })
    }

    pub fn read(&mut self) -> Result<u64> {
        let mut val = 0u64;
        let mut shift = 0;
        loop {
            match self.inner.read()? {
                Some(byte) => {
                    val |= ((byte & 0x7f) as u64) << shift;
                    if byte & 0x80 == 0 {
                        return Ok(val);
                    }
                    shift += 7;
                }
                None => bail!("truncated v-byte stream"),
            }
        }
    }
}
