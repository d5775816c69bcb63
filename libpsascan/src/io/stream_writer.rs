//! Asynchronous record stream writer, the mirror image of the reader:
//! the caller fills one buffer while a background thread writes the other.

use crate::types::Int;
use anyhow::{anyhow, bail, Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    marker::PhantomData,
    mem,
    sync::mpsc::{sync_channel, Receiver, SyncSender},
    thread::JoinHandle,
};

// --------------------------------------------------
#[derive(Debug)]
pub struct AsyncStreamWriter<T>
where
    T: Int,
{
    tx_full: Option<SyncSender<Vec<u8>>>,
    rx_empty: Receiver<Vec<u8>>,
    handle: Option<JoinHandle<Result<u64>>>,
    buf: Vec<u8>,
    cap: usize,
    _marker: PhantomData<T>,
}

impl<T> AsyncStreamWriter<T>
where
    T: Int,
{
    pub fn new(filename: &str, buf_size: usize) -> Result<Self> {
        let file =
            File::create(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        let path = filename.to_string();
        let cap = (buf_size / 2).max(T::RECORD_SIZE) / T::RECORD_SIZE
            * T::RECORD_SIZE;

        let (tx_full, rx_full) = sync_channel::<Vec<u8>>(2);
        let (tx_empty, rx_empty) = sync_channel::<Vec<u8>>(2);
        tx_empty.send(Vec::with_capacity(cap)).unwrap();

        let handle = std::thread::spawn(move || -> Result<u64> {
            let mut out = BufWriter::new(file);
            let mut written = 0u64;
            while let Ok(buf) = rx_full.recv() {
                out.write_all(&buf).map_err(|e| anyhow!("{path}: {e}"))?;
                written += buf.len() as u64;
                let mut buf = buf;
                buf.clear();
                let _ = tx_empty.send(buf);
            }
            out.flush().map_err(|e| anyhow!("{path}: {e}"))?;
            Ok(written)
        });

        Ok(AsyncStreamWriter {
            tx_full: Some(tx_full),
            rx_empty,
            handle: Some(handle),
            buf: Vec::with_capacity(cap),
            cap,
            _marker: PhantomData,
        })
    }

    // --------------------------------------------------
    pub fn write(&mut self, val: T) -> Result<()> {
        let mut record = [0u8; 8];
        val.write_le(&mut record);
        self.buf.extend_from_slice(&record[..T::RECORD_SIZE]);
        if self.buf.len() >= self.cap {
            self.swap_buffers()?;
        }
        Ok(())
    }

    // --------------------------------------------------
    fn swap_buffers(&mut self) -> Result<()> {
        let next = self
            .rx_empty
            .recv()
            .map_err(|_| anyhow!("stream writer thread terminated early"))?;
        let full = mem::replace(&mut self.buf, next);
        if let Some(tx) = &self.tx_full {
            if tx.send(full).is_err() {
                bail!("stream writer thread terminated early");
            }
        }
        Ok(())
    }

    // --------------------------------------------------
    /// Flush the tail, close the file, and return the bytes written.
    pub fn finish(mut self) -> Result<u64> {
        if !self.buf.is_empty() {
            let full = mem::take(&mut self.buf);
            if let Some(tx) = &self.tx_full {
                if tx.send(full).is_err() {
                    bail!("stream writer thread terminated early");
                }
            }
        }
        self.tx_full.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("stream writer thread panicked"))?,
            None => bail!("stream writer already finished"),
        }
    }
}

impl<T> Drop for AsyncStreamWriter<T>
where
    T: Int,
{
    fn drop(&mut self) {
        self.tx_full.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::AsyncStreamWriter;
    use crate::{io::stream_reader::AsyncStreamReader, types::Uint40};
    use crate::types::Int;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_then_read_back() -> Result<()> {
        let file = NamedTempFile::new()?;
        let path = file.path().to_string_lossy().to_string();

        let vals: Vec<u64> = (0..5000).map(|v| v * 31).collect();
        let mut writer: AsyncStreamWriter<Uint40> =
            AsyncStreamWriter::new(&path, 128)?;
        for &v in &vals {
            writer.write(Uint40::from_u64(v))?;
        }
        let written = writer.finish()?;
        assert_eq!(written, 5 * vals.len() as u64);

        let mut reader: AsyncStreamReader<Uint40> =
            AsyncStreamReader::new(&path, 256)?;
        let mut got = vec![];
        while let Some(v) = reader.read()? {
            got.push(v.to_u64());
        }
        assert_eq!(got, vals);
        Ok(())
    }
}
