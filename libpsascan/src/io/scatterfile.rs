//! Scatterfile: one logical record file stored as bounded-size named parts.
//!
//! Partial suffix arrays are written once, sequentially, while a block is
//! processed, and read back once during the final merge. The catalog
//! listing (beg, end, filename) per part is a small bincode file so the
//! merge can reopen everything without in-process handles.

use super::{stream_reader::AsyncStreamReader, stream_writer::AsyncStreamWriter};
use crate::types::{random_hash, Int};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::{fs, marker::PhantomData};

// --------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScatterPart {
    /// First record held by this part.
    pub beg: u64,

    /// One past the last record held by this part.
    pub end: u64,

    pub filename: String,
}

// --------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Scatterfile {
    pub parts: Vec<ScatterPart>,
}

impl Scatterfile {
    pub fn total_records(&self) -> u64 {
        self.parts.last().map_or(0, |p| p.end)
    }

    pub fn save_catalog(&self, filename: &str) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        fs::write(filename, bytes).map_err(|e| anyhow!("{filename}: {e}"))?;
        Ok(())
    }

    pub fn load_catalog(filename: &str) -> Result<Self> {
        let bytes = fs::read(filename).map_err(|e| anyhow!("{filename}: {e}"))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Delete the part files, best-effort.
    pub fn destroy(&self) {
        for part in &self.parts {
            super::delete_file(&part.filename);
        }
    }
}

// --------------------------------------------------
#[derive(Debug)]
pub struct ScatterfileWriter<T>
where
    T: Int,
{
    prefix: String,
    max_part_records: u64,
    parts: Vec<ScatterPart>,
    current: Option<AsyncStreamWriter<T>>,
    current_records: u64,
    written: u64,
    buf_size: usize,
}

impl<T> ScatterfileWriter<T>
where
    T: Int,
{
    /// Parts are rolled over after `max_part_length` bytes; any value of at
    /// least one record is legal and produces identical logical contents.
    pub fn new(prefix: &str, max_part_length: u64, buf_size: usize) -> Result<Self> {
        if (max_part_length as usize) < T::RECORD_SIZE {
            bail!(
                "scatterfile part length {max_part_length} is below the \
                 record size {}",
                T::RECORD_SIZE
            );
        }
        Ok(ScatterfileWriter {
            prefix: prefix.to_string(),
            max_part_records: max_part_length / T::RECORD_SIZE as u64,
            parts: vec![],
            current: None,
            current_records: 0,
            written: 0,
            buf_size,
        })
    }

    // --------------------------------------------------
    pub fn write(&mut self, values: &[T]) -> Result<()> {
        for &val in values {
            if self.current.is_none() {
                let filename = format!("{}.{}", self.prefix, random_hash());
                self.parts.push(ScatterPart {
                    beg: self.written,
                    end: self.written,
                    filename: filename.clone(),
                });
                self.current =
                    Some(AsyncStreamWriter::new(&filename, self.buf_size)?);
                self.current_records = 0;
            }

            self.current.as_mut().unwrap().write(val)?;
            self.current_records += 1;
            self.written += 1;

            if self.current_records == self.max_part_records {
                self.roll_part()?;
            }
        }
        Ok(())
    }

    fn roll_part(&mut self) -> Result<()> {
        if let Some(writer) = self.current.take() {
            writer.finish()?;
            self.parts.last_mut().unwrap().end = self.written;
        }
        Ok(())
    }

    // --------------------------------------------------
    pub fn finish(mut self) -> Result<Scatterfile> {
        self.roll_part()?;
        Ok(Scatterfile {
            parts: std::mem::take(&mut self.parts),
        })
    }
}

// --------------------------------------------------
#[derive(Debug)]
pub struct ScatterfileReader<T>
where
    T: Int,
{
    parts: Vec<ScatterPart>,
    part_idx: usize,
    current: Option<AsyncStreamReader<T>>,
    remaining_in_part: u64,
    buf_size: usize,
    _marker: PhantomData<T>,
}

impl<T> ScatterfileReader<T>
where
    T: Int,
{
    pub fn new(scatterfile: &Scatterfile, buf_size: usize) -> Result<Self> {
        Ok(ScatterfileReader {
            parts: scatterfile.parts.clone(),
            part_idx: 0,
            current: None,
            remaining_in_part: 0,
            buf_size,
            _marker: PhantomData,
        })
    }

    // --------------------------------------------------
    pub fn read(&mut self) -> Result<Option<T>> {
        while self.remaining_in_part == 0 {
            if self.part_idx == self.parts.len() {
                return Ok(None);
            }
            let part = &self.parts[self.part_idx];
            self.current =
                Some(AsyncStreamReader::new(&part.filename, self.buf_size)?);
            self.remaining_in_part = part.end - part.beg;
            self.part_idx += 1;
        }

        match self.current.as_mut().unwrap().read()? {
            Some(val) => {
                self.remaining_in_part -= 1;
                Ok(Some(val))
            }
            None => {
                let part = &self.parts[self.part_idx - 1];
                bail!(
                    "{}: part ended {} records early",
                    part.filename,
                    self.remaining_in_part
                )
            }
        }
    }
}
