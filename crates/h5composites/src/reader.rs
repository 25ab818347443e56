//! Reading datasets row by row through a cache.
//!
//! Rows run along the first axis. Each row of a one-dimensional dataset
//! is one element of the dataset's type; rows of higher-dimensional
//! datasets are arrays over the remaining axes.

use std::marker::PhantomData;

use crate::buffer::{ElementBlock, H5BufferConstView};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::file::DataSet;
use crate::traits::BufferRead;

/// Rows read at once when the dataset is not chunked.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// Buffered reader of one dataset.
pub struct Reader {
    dataset: DataSet,
    dtype: DType,
    cache_size: usize,
    n_rows: u64,
    /// Index of the next row [`Reader::next`] returns.
    position: u64,
    cache: ElementBlock,
    cache_start: u64,
    /// Extent of the dataset beyond the first axis.
    row_dims: Vec<u64>,
}

impl Reader {
    /// Read `dataset` caching `cache_size` rows at once; by default as
    /// many rows as a chunk holds.
    pub fn new(dataset: &DataSet, cache_size: Option<usize>) -> Result<Self> {
        let dims = dataset.dims()?;
        let Some((&n_rows, row_dims)) = dims.split_first() else {
            return Err(Error::InvalidState(format!(
                "Cannot read rows of the scalar dataset {}",
                dataset.path()
            )));
        };
        let base = dataset.dtype()?;
        let dtype = if row_dims.is_empty() {
            base
        } else {
            let row: Vec<u32> = row_dims.iter().map(|&d| d as u32).collect();
            DType::array(base, &row)
        };
        let cache_size = match cache_size {
            Some(n) => n,
            None => dataset
                .chunk()?
                .and_then(|c| c.first().copied())
                .map_or(DEFAULT_CACHE_SIZE, |c| c as usize),
        }
        .max(1);
        Ok(Self {
            dataset: dataset.clone(),
            cache: ElementBlock::empty(dtype.clone()),
            dtype,
            cache_size,
            n_rows,
            position: 0,
            cache_start: 0,
            row_dims: row_dims.to_vec(),
        })
    }

    /// Type of one row.
    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn dataset(&self) -> &DataSet {
        &self.dataset
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn n_rows(&self) -> u64 {
        self.n_rows
    }

    /// Index of the next row to read.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn n_remaining(&self) -> u64 {
        self.n_rows.saturating_sub(self.position)
    }

    /// Whether a row is left to read.
    pub fn is_valid(&self) -> bool {
        self.position < self.n_rows
    }

    /// Move to `row`; seeking to the end is allowed.
    pub fn seek(&mut self, row: u64) -> Result<()> {
        if row > self.n_rows {
            return Err(Error::InvalidState(format!(
                "Cannot seek to row {row} of {}",
                self.n_rows
            )));
        }
        self.position = row;
        Ok(())
    }

    fn cached(&self, row: u64) -> bool {
        row >= self.cache_start && row < self.cache_start + self.cache.len() as u64
    }

    fn load_cache_from(&mut self, row: u64) -> Result<()> {
        let n = (self.cache_size as u64).min(self.n_rows - row);
        let mut start = vec![0; self.row_dims.len() + 1];
        start[0] = row;
        let mut count = vec![n];
        count.extend_from_slice(&self.row_dims);
        let block = self.dataset.read_hyperslab(&start, &count)?;
        let (_, data, heap) = block.into_parts();
        self.cache = ElementBlock::new(self.dtype.clone(), n as usize, data, heap)?;
        self.cache_start = row;
        Ok(())
    }

    /// The next row without moving past it.
    pub fn current(&mut self) -> Result<H5BufferConstView<'_>> {
        if !self.is_valid() {
            return Err(Error::InvalidState(
                "Attempting to read from invalid reader!".into(),
            ));
        }
        if !self.cached(self.position) {
            self.load_cache_from(self.position)?;
        }
        let index = (self.position - self.cache_start) as usize;
        self.cache
            .get(index)
            .ok_or_else(|| Error::InvalidState("Reader cache is inconsistent".into()))
    }

    /// The next row, or `None` once every row has been read.
    pub fn next(&mut self) -> Result<Option<H5BufferConstView<'_>>> {
        if !self.is_valid() {
            return Ok(None);
        }
        if !self.cached(self.position) {
            self.load_cache_from(self.position)?;
        }
        let index = (self.position - self.cache_start) as usize;
        self.position += 1;
        Ok(self.cache.get(index))
    }

    /// The next row read as a Rust value.
    pub fn read_into<T: BufferRead>(&mut self) -> Result<Option<T>> {
        match self.next()? {
            Some(row) => row.read().map(Some),
            None => Ok(None),
        }
    }

    /// Up to `n` further rows.
    pub fn read_n<T: BufferRead>(&mut self, n: usize) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(n.min(self.n_remaining() as usize));
        while out.len() < n {
            match self.read_into()? {
                Some(value) => out.push(value),
                None => break,
            }
        }
        Ok(out)
    }
}

/// [`Reader`] producing values of one Rust type.
pub struct TypedReader<T> {
    reader: Reader,
    _marker: PhantomData<fn() -> T>,
}

impl<T: BufferRead> TypedReader<T> {
    pub fn new(dataset: &DataSet, cache_size: Option<usize>) -> Result<Self> {
        Ok(Self {
            reader: Reader::new(dataset, cache_size)?,
            _marker: PhantomData,
        })
    }

    pub fn dtype(&self) -> &DType {
        self.reader.dtype()
    }

    pub fn dataset(&self) -> &DataSet {
        self.reader.dataset()
    }

    pub fn reader_mut(&mut self) -> &mut Reader {
        &mut self.reader
    }
}

impl<T: BufferRead> Iterator for TypedReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_into().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.reader.n_remaining() as usize;
        (n, Some(n))
    }
}
