//! Asynchronous record stream reader.
//!
//! A background thread prefetches the next buffer while the caller drains
//! the current one. The two directions of the classic pool (empty/full) are
//! two bounded channels; the reader thread exits when the file is exhausted
//! or the consumer hangs up. Reads past EOF yield `None`, never an error.

use crate::types::Int;
use anyhow::{anyhow, Result};
use std::{
    fs::File,
    io::Read,
    marker::PhantomData,
    mem,
    sync::mpsc::{sync_channel, Receiver, SyncSender},
    thread::JoinHandle,
};

// --------------------------------------------------
#[derive(Debug)]
pub struct AsyncStreamReader<T>
where
    T: Int,
{
    rx_full: Receiver<Result<(Vec<u8>, usize)>>,
    tx_empty: Option<SyncSender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    buf: Vec<u8>,
    filled: usize,
    pos: usize,
    done: bool,
    _marker: PhantomData<T>,
}

impl<T> AsyncStreamReader<T>
where
    T: Int,
{
    pub fn new(filename: &str, buf_size: usize) -> Result<Self> {
        let mut file =
            File::open(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        let path = filename.to_string();

        // Each buffer holds a whole number of records.
        let chunk = (buf_size / 2).max(T::RECORD_SIZE) / T::RECORD_SIZE
            * T::RECORD_SIZE;

        let (tx_full, rx_full) = sync_channel::<Result<(Vec<u8>, usize)>>(2);
        let (tx_empty, rx_empty) = sync_channel::<Vec<u8>>(2);
        for _ in 0..2 {
            tx_empty.send(vec![0u8; chunk]).unwrap();
        }

        let handle = std::thread::spawn(move || {
            while let Ok(mut buf) = rx_empty.recv() {
                let mut filled = 0;
                loop {
                    match file.read(&mut buf[filled..]) {
                        Ok(0) => break,
                        Ok(count) => filled += count,
                        Err(e) => {
                            let _ = tx_full.send(Err(anyhow!("{path}: {e}")));
                            return;
                        }
                    }
                    if filled == buf.len() {
                        break;
                    }
                }
                let short = filled < buf.len();
                if tx_full.send(Ok((buf, filled))).is_err() {
                    return;
                }
                if short {
                    return;
                }
            }
        });

        Ok(AsyncStreamReader {
            rx_full,
            tx_empty: Some(tx_empty),
            handle: Some(handle),
            buf: vec![],
            filled: 0,
            pos: 0,
            done: false,
            _marker: PhantomData,
        })
    }

    // --------------------------------------------------
    /// The next record, or `None` at EOF.
    pub fn read(&mut self) -> Result<Option<T>> {
        if self.pos + T::RECORD_SIZE > self.filled {
            if !self.receive_new_buffer()? {
                return Ok(None);
            }
        }
        let val = T::read_le(&self.buf[self.pos..]);
        self.pos += T::RECORD_SIZE;
        Ok(Some(val))
    }

    // --------------------------------------------------
    fn receive_new_buffer(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        // Hand the drained buffer back so the I/O thread can refill it.
        if !self.buf.is_empty() {
            let old = mem::take(&mut self.buf);
            if let Some(tx) = &self.tx_empty {
                let _ = tx.send(old);
            }
        }

        match self.rx_full.recv() {
            Ok(Ok((buf, filled))) => {
                self.buf = buf;
                self.filled = filled / T::RECORD_SIZE * T::RECORD_SIZE;
                self.pos = 0;
                if self.filled == 0 {
                    self.done = true;
                    return Ok(false);
                }
                Ok(true)
            }
            Ok(Err(e)) => {
                self.done = true;
                Err(e)
            }
            Err(_) => {
                self.done = true;
                Ok(false)
            }
        }
    }
}

impl<T> Drop for AsyncStreamReader<T>
where
    T: Int,
{
    fn drop(&mut self) {
        self.tx_empty.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
