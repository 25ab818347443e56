//! Appending rows to extendible one-dimensional datasets.
//!
//! A [`Writer`] collects rows in a cache and appends the cache to its
//! dataset whenever it fills up, when [`Writer::flush`] is called and
//! when the writer is dropped.

use std::marker::PhantomData;

use h5composites_format::vl_data::VlenHeap;
use h5composites_format::UNLIMITED;
use tracing::{debug, error};

use crate::buffer::{H5BufferConstView, H5BufferView};
use crate::dtype::{DType, DTypeExt};
use crate::error::{Error, Result};
use crate::file::{DataSet, Group};
use crate::traits::{to_buffer, BufferWrite, FLString, FLVector, StaticH5DType};

/// Rows cached before a flush unless told otherwise.
pub const DEFAULT_CACHE_SIZE: usize = 2048;

/// Buffered writer of one dataset.
pub struct Writer {
    dtype: DType,
    cache_size: usize,
    dataset: DataSet,
    /// Rows already in the dataset.
    offset: u64,
    n_in_buffer: usize,
    buffer: Vec<u8>,
    heap: VlenHeap,
}

impl Writer {
    /// Create the dataset `name` in `group` with the default cache.
    pub fn new(group: &Group, name: &str, dtype: DType) -> Result<Self> {
        Self::with_sizes(group, name, dtype, DEFAULT_CACHE_SIZE, None)
    }

    /// Create the dataset `name` in `group`, caching `cache_size` rows.
    /// The chunk length defaults to the cache size.
    pub fn with_sizes(
        group: &Group,
        name: &str,
        dtype: DType,
        cache_size: usize,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if group.contains(name) {
            return Err(Error::InvalidState(format!(
                "{name} already exists in H5 group"
            )));
        }
        if cache_size == 0 {
            return Err(Error::InvalidState("Writer cache size must be positive".into()));
        }
        let chunk = chunk_size.unwrap_or(cache_size).max(1) as u64;
        let dataset = group.create_dataset(
            name,
            dtype.clone(),
            vec![0],
            Some(vec![UNLIMITED]),
            Some(vec![chunk]),
        )?;
        let buffer = vec![0u8; cache_size * dtype.size()];
        Ok(Self {
            dtype,
            cache_size,
            dataset,
            offset: 0,
            n_in_buffer: 0,
            buffer,
            heap: VlenHeap::new(),
        })
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn dataset(&self) -> &DataSet {
        &self.dataset
    }

    /// Rows already written to the dataset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Rows waiting in the cache.
    pub fn n_in_buffer(&self) -> usize {
        self.n_in_buffer
    }

    fn slot(&mut self) -> Result<H5BufferView<'_>> {
        let size = self.dtype.size();
        let start = self.n_in_buffer * size;
        H5BufferView::new(
            &self.dtype,
            &mut self.buffer[start..start + size],
            &mut self.heap,
        )
    }

    fn advance(&mut self) -> Result<()> {
        self.n_in_buffer += 1;
        if self.n_in_buffer == self.cache_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Append a buffer, converting it to the dataset type.
    pub fn write_buffer(&mut self, value: &H5BufferConstView<'_>) -> Result<()> {
        self.slot()?.assign(value)?;
        self.advance()
    }

    /// Append a value, converting it to the dataset type.
    pub fn write<T: BufferWrite + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.slot()?.write(value)?;
        self.advance()
    }

    pub fn write_all<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: BufferWrite,
    {
        for value in values {
            self.write(&value)?;
        }
        Ok(())
    }

    /// Append the cached rows to the dataset.
    pub fn flush(&mut self) -> Result<()> {
        if self.n_in_buffer == 0 {
            return Ok(());
        }
        let n = self.n_in_buffer as u64;
        self.dataset.extend(&[self.offset + n])?;
        let len = self.n_in_buffer * self.dtype.size();
        self.dataset
            .write_hyperslab(&[self.offset], &[n], &self.buffer[..len], &self.heap)?;
        self.offset += n;
        debug!(dataset = self.dataset.path(), rows = n, total = self.offset, "flushed writer");
        self.clear();
        Ok(())
    }

    /// Discard the cached rows.
    pub fn clear(&mut self) {
        self.n_in_buffer = 0;
        self.buffer.fill(0);
        self.heap.clear();
    }

    /// Name the index variable of the dataset.
    pub fn set_index(&self, name: &str) -> Result<()> {
        let value = to_buffer(&FLString::from(name))?;
        self.set_attribute("index", &value.view())
    }

    /// Name several index variables of the dataset.
    pub fn set_index_many(&self, names: &[&str]) -> Result<()> {
        let names = FLVector(names.iter().map(|n| FLString::from(*n)).collect());
        let value = to_buffer(&names)?;
        self.set_attribute("index", &value.view())
    }

    pub fn set_attribute(&self, name: &str, value: &H5BufferConstView<'_>) -> Result<()> {
        self.dataset.set_attribute(name, value)
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(dataset = self.dataset.path(), "failed to flush writer: {e}");
        }
    }
}

/// [`Writer`] of the values of one Rust type.
pub struct TypedWriter<T> {
    writer: Writer,
    _marker: PhantomData<fn(&T)>,
}

impl<T: StaticH5DType + BufferWrite> TypedWriter<T> {
    pub fn new(group: &Group, name: &str) -> Result<Self> {
        Self::with_cache_size(group, name, DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(group: &Group, name: &str, cache_size: usize) -> Result<Self> {
        Ok(Self {
            writer: Writer::with_sizes(group, name, T::static_h5_dtype(), cache_size, None)?,
            _marker: PhantomData,
        })
    }

    pub fn write(&mut self, value: &T) -> Result<()> {
        self.writer.write(value)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut Writer {
        &mut self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::H5File;

    #[test]
    fn rows_flush_when_cache_fills() {
        let dir = tempfile::tempdir().unwrap();
        let file = H5File::create(dir.path().join("w.h5"), true).unwrap();
        let root = file.root();
        let mut writer = Writer::with_sizes(&root, "v", DType::native_i64(), 2, None).unwrap();
        writer.write(&1i64).unwrap();
        assert_eq!(writer.n_in_buffer(), 1);
        writer.write(&2u8).unwrap();
        assert_eq!(writer.offset(), 2);
        writer.write(&3.9f64).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.dataset().dims().unwrap(), [3]);
        let values: Vec<i64> = writer
            .dataset()
            .read_all()
            .unwrap()
            .iter()
            .map(|v| v.read().unwrap())
            .collect();
        assert_eq!(values, [1, 2, 3]);
        assert_eq!(writer.dataset().chunk().unwrap(), Some(vec![2]));

        let err = Writer::new(&root, "v", DType::native_u8()).err().unwrap();
        assert_eq!(err.to_string(), "v already exists in H5 group");
    }

    #[test]
    fn cleared_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = H5File::create(dir.path().join("c.h5"), true).unwrap();
        let root = file.root();
        {
            let mut writer = TypedWriter::<String>::new(&root, "names").unwrap();
            writer.write(&"gone".to_string()).unwrap();
            writer.writer_mut().clear();
            writer.write(&"kept".to_string()).unwrap();
            writer.writer().set_index("name").unwrap();
        }
        let ds = root.dataset("names").unwrap();
        let names: Vec<String> = ds.read_all().unwrap().iter().map(|v| v.read().unwrap()).collect();
        assert_eq!(names, ["kept"]);
        assert_eq!(ds.attribute("index").unwrap().read::<String>().unwrap(), "name");
    }

    #[test]
    fn index_lists_are_fixed_length() {
        let dir = tempfile::tempdir().unwrap();
        let file = H5File::create(dir.path().join("i.h5"), true).unwrap();
        let writer = Writer::new(&file.root(), "x", DType::native_f32()).unwrap();
        writer.set_index_many(&["run", "event"]).unwrap();
        let attr = writer.dataset().attribute("index").unwrap();
        assert_eq!(
            attr.dtype(),
            &DType::array(DType::fixed_string(5), &[2])
        );
        let names: Vec<String> = attr.read().unwrap();
        assert_eq!(names, ["run", "event"]);
    }
}
