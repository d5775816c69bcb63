//! Backward chunk reader: hands out the text of a file range right-to-left,
//! one chunk at a time, with the preceding chunk prefetched in the
//! background. This is how streaming workers walk their tail segment.

use anyhow::{anyhow, Result};
use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    sync::mpsc::{sync_channel, Receiver, SyncSender},
    thread::JoinHandle,
};

// --------------------------------------------------
#[derive(Debug)]
pub struct BackwardChunkReader {
    rx_full: Receiver<Result<Vec<u8>>>,
    tx_empty: Option<SyncSender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
    done: bool,
}

impl BackwardChunkReader {
    /// Stream the byte range [beg, end) of `filename` right-to-left in
    /// chunks of at most `chunk_size` bytes.
    pub fn new(
        filename: &str,
        beg: u64,
        end: u64,
        chunk_size: usize,
    ) -> Result<Self> {
        let mut file =
            File::open(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        let path = filename.to_string();
        let chunk_size = chunk_size.max(1);

        let (tx_full, rx_full) = sync_channel::<Result<Vec<u8>>>(2);
        let (tx_empty, rx_empty) = sync_channel::<Vec<u8>>(2);
        for _ in 0..2 {
            tx_empty.send(Vec::with_capacity(chunk_size)).unwrap();
        }

        let handle = std::thread::spawn(move || {
            let mut cur = end;
            while cur > beg {
                let mut buf = match rx_empty.recv() {
                    Ok(buf) => buf,
                    Err(_) => return,
                };
                let size = chunk_size.min((cur - beg) as usize);
                buf.resize(size, 0);

                let res = file
                    .seek(SeekFrom::Start(cur - size as u64))
                    .and_then(|_| file.read_exact(&mut buf));
                match res {
                    Ok(()) => {
                        cur -= size as u64;
                        if tx_full.send(Ok(buf)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx_full.send(Err(anyhow!("{path}: {e}")));
                        return;
                    }
                }
            }
        });

        Ok(BackwardChunkReader {
            rx_full,
            tx_empty: Some(tx_empty),
            handle: Some(handle),
            done: false,
        })
    }

    // --------------------------------------------------
    /// The next chunk to the left, or `None` once the range is exhausted.
    /// Chunks must be recycled with `recycle` to keep the prefetch going.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        match self.rx_full.recv() {
            Ok(Ok(buf)) => Ok(Some(buf)),
            Ok(Err(e)) => {
                self.done = true;
                Err(e)
            }
            Err(_) => {
                self.done = true;
                Ok(None)
            }
        }
    }

    pub fn recycle(&mut self, buf: Vec<u8>) {
        if let Some(tx) = &self.tx_empty {
            let _ = tx.send(buf);
        }
    }
}

impl Drop for BackwardChunkReader {
    fn drop(&mut self) {
        self.tx_empty.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// --------------------------------------------------
#[cfg(test)]
mod tests {
    use super::BackwardChunkReader;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_backward_chunks() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        file.write_all(&data)?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut reader = BackwardChunkReader::new(&path, 100, 900, 64)?;

        let mut rebuilt = vec![];
        while let Some(chunk) = reader.next_chunk()? {
            let mut piece = chunk.clone();
            piece.extend_from_slice(&rebuilt);
            rebuilt = piece;
            reader.recycle(chunk);
        }
        assert_eq!(rebuilt, data[100..900].to_vec());
        Ok(())
    }

    #[test]
    fn test_empty_range() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"abc")?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut reader = BackwardChunkReader::new(&path, 2, 2, 16)?;
        assert_eq!(reader.next_chunk()?, None);
        Ok(())
    }
}
