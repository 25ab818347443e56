//! HDF5 files and the objects inside them.
//!
//! An [`H5File`] loads the whole object tree into memory. [`Group`],
//! [`DataSet`] and [`CommittedType`] are cheap handles addressing an
//! object of that tree by path; they share the file, so changes made
//! through one handle are visible through every other. Writable files are
//! written back by [`H5File::flush`] and when the last handle goes away.
//!
//! ```no_run
//! use h5composites::file::H5File;
//! use h5composites::DType;
//!
//! let file = H5File::create("points.h5", true).unwrap();
//! let root = file.root();
//! let ds = root
//!     .create_dataset("x", DType::native_f64(), vec![3], None, None)
//!     .unwrap();
//! ds.write_hyperslab(&[0], &[3], &[0u8; 24], &Default::default()).unwrap();
//! file.flush().unwrap();
//! ```

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use h5composites_format::tree::element_count;
use h5composites_format::{read_file, write_file, AttributeNode, DatasetNode, GroupNode, Node};
use h5composites_format::vl_data::VlenHeap;
use tracing::{debug, error, info};

use crate::buffer::{ElementBlock, H5Buffer, H5BufferConstView};
use crate::conversion::{convert, convert_block};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::traits::BufferRead;

struct FileState {
    path: PathBuf,
    root: GroupNode,
    writable: bool,
    dirty: bool,
}

impl FileState {
    fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly(self.path.clone()));
        }
        let bytes = write_file(&self.root)?;
        std::fs::write(&self.path, &bytes)?;
        self.dirty = false;
        debug!(path = %self.path.display(), bytes = bytes.len(), "flushed file");
        Ok(())
    }
}

impl Drop for FileState {
    fn drop(&mut self) {
        if self.writable && self.dirty {
            if let Err(e) = self.flush() {
                error!(path = %self.path.display(), "failed to write file on close: {e}");
            }
        }
    }
}

type Shared = Rc<RefCell<FileState>>;

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_owned()
    } else {
        format!("{path}/{name}")
    }
}

fn last_component(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(feature = "mmap")]
fn load(path: &Path) -> Result<GroupNode> {
    let file = std::fs::File::open(path)?;
    // The map is dropped before this function returns.
    let map = unsafe { memmap2::Mmap::map(&file)? };
    Ok(read_file(&map)?)
}

#[cfg(not(feature = "mmap"))]
fn load(path: &Path) -> Result<GroupNode> {
    let bytes = std::fs::read(path)?;
    Ok(read_file(&bytes)?)
}

/// Kind of object linked from a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Group,
    Dataset,
    DataType,
}

impl ObjectType {
    fn of(node: &Node) -> ObjectType {
        match node {
            Node::Group(_) => ObjectType::Group,
            Node::Dataset(_) => ObjectType::Dataset,
            Node::DataType(_) => ObjectType::DataType,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectType::Group => "group",
            ObjectType::Dataset => "dataset",
            ObjectType::DataType => "datatype",
        })
    }
}

/// An open HDF5 file.
#[derive(Clone)]
pub struct H5File {
    state: Shared,
}

impl H5File {
    /// Create an empty file, replacing an existing one only if
    /// `overwrite` is set.
    pub fn create<P: AsRef<Path>>(path: P, overwrite: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() && !overwrite {
            return Err(Error::FileExists(path));
        }
        let mut state = FileState {
            path,
            root: GroupNode::new(),
            writable: true,
            dirty: true,
        };
        state.flush()?;
        info!(path = %state.path.display(), "created file");
        Ok(Self {
            state: Rc::new(RefCell::new(state)),
        })
    }

    /// Open an existing file.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = load(&path)?;
        info!(path = %path.display(), writable, "opened file");
        Ok(Self {
            state: Rc::new(RefCell::new(FileState {
                path,
                root,
                writable,
                dirty: false,
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.state.borrow().path.clone()
    }

    pub fn is_writable(&self) -> bool {
        self.state.borrow().writable
    }

    pub fn root(&self) -> Group {
        Group {
            state: Rc::clone(&self.state),
            path: String::new(),
        }
    }

    /// Write the object tree to disk.
    pub fn flush(&self) -> Result<()> {
        self.state.borrow_mut().flush()
    }
}

impl fmt::Debug for H5File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("H5File")
            .field("path", &state.path)
            .field("writable", &state.writable)
            .finish()
    }
}

fn with_node<R>(
    state: &Shared,
    path: &str,
    f: impl FnOnce(&Node) -> Result<R>,
) -> Result<R> {
    let state = state.borrow();
    let node = state
        .root
        .lookup(path)
        .ok_or_else(|| Error::NotFound(path.to_owned()))?;
    f(node)
}

fn with_node_mut<R>(
    state: &Shared,
    path: &str,
    f: impl FnOnce(&mut Node) -> Result<R>,
) -> Result<R> {
    let mut state = state.borrow_mut();
    if !state.writable {
        return Err(Error::ReadOnly(state.path.clone()));
    }
    state.dirty = true;
    let node = state
        .root
        .lookup_mut(path)
        .ok_or_else(|| Error::NotFound(path.to_owned()))?;
    f(node)
}

fn wrong_type(path: &str, expected: &'static str) -> Error {
    Error::WrongObjectType {
        name: path.to_owned(),
        expected,
    }
}

fn attribute_node(name: &str, value: &H5BufferConstView<'_>) -> Result<AttributeNode> {
    Ok(AttributeNode::scalar(
        name,
        value.dtype().clone(),
        value.bytes(),
        value.heap(),
    )?)
}

/// A group of a file.
#[derive(Clone)]
pub struct Group {
    state: Shared,
    path: String,
}

impl Group {
    fn with<R>(&self, f: impl FnOnce(&GroupNode) -> Result<R>) -> Result<R> {
        let state = self.state.borrow();
        let group = state
            .root
            .group_at(&self.path)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        f(group)
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut GroupNode) -> Result<R>) -> Result<R> {
        let mut state = self.state.borrow_mut();
        if !state.writable {
            return Err(Error::ReadOnly(state.path.clone()));
        }
        state.dirty = true;
        let group = state
            .root
            .group_at_mut(&self.path)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        f(group)
    }

    fn child_path(&self, name: &str) -> String {
        join(&self.path, name)
    }

    /// Path from the root, empty for the root group.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        last_component(&self.path)
    }

    pub fn file(&self) -> H5File {
        H5File {
            state: Rc::clone(&self.state),
        }
    }

    pub fn is_writable(&self) -> bool {
        self.state.borrow().writable
    }

    pub fn contains(&self, name: &str) -> bool {
        self.with(|g| Ok(g.contains(name))).unwrap_or(false)
    }

    pub fn object_type(&self, name: &str) -> Result<ObjectType> {
        self.with(|g| {
            g.get(name)
                .map(ObjectType::of)
                .ok_or_else(|| Error::NotFound(join(&self.path, name)))
        })
    }

    /// Names of the linked objects, in link order.
    pub fn names(&self) -> Result<Vec<String>> {
        self.with(|g| Ok(g.names().map(str::to_owned).collect()))
    }

    pub fn len(&self) -> Result<usize> {
        self.with(|g| Ok(g.links.len()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|n| n == 0)
    }

    pub fn create_group(&self, name: &str) -> Result<Group> {
        self.with_mut(|g| Ok(g.insert(name, Node::Group(GroupNode::new())).map(|_| ())?))?;
        Ok(Group {
            state: Rc::clone(&self.state),
            path: self.child_path(name),
        })
    }

    pub fn group(&self, name: &str) -> Result<Group> {
        let path = self.child_path(name);
        with_node(&self.state, &path, |node| match node {
            Node::Group(_) => Ok(()),
            _ => Err(wrong_type(&path, "group")),
        })?;
        Ok(Group {
            state: Rc::clone(&self.state),
            path,
        })
    }

    /// Create a zero-filled dataset. Datasets with a `max_dims` larger
    /// than `dims` need a `chunk` shape.
    pub fn create_dataset(
        &self,
        name: &str,
        dtype: DType,
        dims: Vec<u64>,
        max_dims: Option<Vec<u64>>,
        chunk: Option<Vec<u64>>,
    ) -> Result<DataSet> {
        let node = DatasetNode::new(dtype, dims, max_dims, chunk)?;
        self.with_mut(|g| Ok(g.insert(name, Node::Dataset(node)).map(|_| ())?))?;
        debug!(path = %self.child_path(name), "created dataset");
        Ok(DataSet {
            state: Rc::clone(&self.state),
            path: self.child_path(name),
        })
    }

    pub fn dataset(&self, name: &str) -> Result<DataSet> {
        let path = self.child_path(name);
        with_node(&self.state, &path, |node| match node {
            Node::Dataset(_) => Ok(()),
            _ => Err(wrong_type(&path, "dataset")),
        })?;
        Ok(DataSet {
            state: Rc::clone(&self.state),
            path,
        })
    }

    /// Store `dtype` as a named datatype object.
    pub fn commit_dtype(&self, name: &str, dtype: DType) -> Result<CommittedType> {
        self.with_mut(|g| Ok(g.insert(name, Node::DataType(dtype)).map(|_| ())?))?;
        Ok(CommittedType {
            state: Rc::clone(&self.state),
            path: self.child_path(name),
        })
    }

    pub fn dtype_named(&self, name: &str) -> Result<CommittedType> {
        let path = self.child_path(name);
        with_node(&self.state, &path, |node| match node {
            Node::DataType(_) => Ok(()),
            _ => Err(wrong_type(&path, "datatype")),
        })?;
        Ok(CommittedType {
            state: Rc::clone(&self.state),
            path,
        })
    }

    /// Add or replace a scalar attribute.
    pub fn set_attribute(&self, name: &str, value: &H5BufferConstView<'_>) -> Result<()> {
        let attr = attribute_node(name, value)?;
        self.with_mut(|g| {
            g.set_attribute(attr);
            Ok(())
        })
    }

    pub fn attribute(&self, name: &str) -> Result<Attribute> {
        self.with(|g| {
            g.attribute(name)
                .cloned()
                .map(Attribute)
                .ok_or_else(|| Error::NotFound(name.to_owned()))
        })
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.with(|g| Ok(g.attribute(name).is_some()))
            .unwrap_or(false)
    }

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.with(|g| Ok(g.attributes.iter().map(|a| a.name.clone()).collect()))
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group").field("path", &self.path).finish()
    }
}

/// A dataset of a file.
#[derive(Clone)]
pub struct DataSet {
    state: Shared,
    path: String,
}

impl DataSet {
    fn with<R>(&self, f: impl FnOnce(&DatasetNode) -> Result<R>) -> Result<R> {
        with_node(&self.state, &self.path, |node| match node {
            Node::Dataset(ds) => f(ds),
            _ => Err(wrong_type(&self.path, "dataset")),
        })
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut DatasetNode) -> Result<R>) -> Result<R> {
        with_node_mut(&self.state, &self.path, |node| match node {
            Node::Dataset(ds) => f(ds),
            _ => Err(wrong_type(&self.path, "dataset")),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        last_component(&self.path)
    }

    pub fn dtype(&self) -> Result<DType> {
        self.with(|ds| Ok(ds.dtype.clone()))
    }

    /// Current extent; empty for scalar datasets.
    pub fn dims(&self) -> Result<Vec<u64>> {
        self.with(|ds| Ok(ds.dims.clone()))
    }

    pub fn max_dims(&self) -> Result<Vec<u64>> {
        self.with(|ds| Ok(ds.max_dims.clone()))
    }

    pub fn chunk(&self) -> Result<Option<Vec<u64>>> {
        self.with(|ds| Ok(ds.chunk.clone()))
    }

    pub fn is_scalar(&self) -> Result<bool> {
        self.with(|ds| Ok(ds.is_scalar()))
    }

    pub fn num_elements(&self) -> Result<u64> {
        self.with(|ds| Ok(ds.num_elements()))
    }

    /// Change the extent within the maximum dimensions.
    pub fn extend(&self, dims: &[u64]) -> Result<()> {
        self.with_mut(|ds| Ok(ds.resize(dims)?))
    }

    /// Elements of the box at `start` with extent `count`, in row-major
    /// order.
    pub fn read_hyperslab(&self, start: &[u64], count: &[u64]) -> Result<ElementBlock> {
        self.with(|ds| {
            let mut heap = VlenHeap::new();
            let data = ds.read_hyperslab(start, count, &mut heap)?;
            ElementBlock::new(
                ds.dtype.clone(),
                element_count(count) as usize,
                data,
                heap,
            )
        })
    }

    /// Overwrite a box with elements of the dataset's type whose payloads
    /// live in `heap`.
    pub fn write_hyperslab(
        &self,
        start: &[u64],
        count: &[u64],
        data: &[u8],
        heap: &VlenHeap,
    ) -> Result<()> {
        self.with_mut(|ds| Ok(ds.write_hyperslab(start, count, data, heap)?))
    }

    /// Overwrite a box with a block, converting it to the dataset's type.
    pub fn write_block(&self, start: &[u64], count: &[u64], block: &ElementBlock) -> Result<()> {
        let dtype = self.dtype()?;
        let block = convert_block(block, &dtype)?;
        self.write_hyperslab(start, count, block.bytes(), block.heap())
    }

    pub fn read_all(&self) -> Result<ElementBlock> {
        let dims = self.dims()?;
        self.read_hyperslab(&vec![0; dims.len()], &dims)
    }

    /// The value of a scalar dataset.
    pub fn read_scalar(&self) -> Result<H5Buffer> {
        self.with(|ds| {
            if !ds.is_scalar() {
                return Err(Error::DType(format!("{} is not a scalar dataset", self.path)));
            }
            let mut heap = VlenHeap::new();
            let data = ds.read_hyperslab(&[], &[], &mut heap)?;
            H5Buffer::from_parts(ds.dtype.clone(), data, heap)
        })
    }

    /// Replace the value of a scalar dataset, converting as needed.
    pub fn write_scalar(&self, value: &H5BufferConstView<'_>) -> Result<()> {
        let dtype = self.dtype()?;
        let converted;
        let value = if value.dtype() == &dtype {
            *value
        } else {
            converted = convert(value, &dtype)?;
            converted.view()
        };
        self.write_hyperslab(&[], &[], value.bytes(), value.heap())
    }

    pub fn set_attribute(&self, name: &str, value: &H5BufferConstView<'_>) -> Result<()> {
        let attr = attribute_node(name, value)?;
        self.with_mut(|ds| {
            ds.set_attribute(attr);
            Ok(())
        })
    }

    pub fn attribute(&self, name: &str) -> Result<Attribute> {
        self.with(|ds| {
            ds.attribute(name)
                .cloned()
                .map(Attribute)
                .ok_or_else(|| Error::NotFound(name.to_owned()))
        })
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.with(|ds| Ok(ds.attribute(name).is_some()))
            .unwrap_or(false)
    }

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.with(|ds| Ok(ds.attributes.iter().map(|a| a.name.clone()).collect()))
    }
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSet").field("path", &self.path).finish()
    }
}

/// A named datatype stored in a file.
#[derive(Clone)]
pub struct CommittedType {
    state: Shared,
    path: String,
}

impl CommittedType {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        last_component(&self.path)
    }

    pub fn dtype(&self) -> Result<DType> {
        with_node(&self.state, &self.path, |node| match node {
            Node::DataType(dtype) => Ok(dtype.clone()),
            _ => Err(wrong_type(&self.path, "datatype")),
        })
    }
}

impl fmt::Debug for CommittedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedType").field("path", &self.path).finish()
    }
}

/// Snapshot of an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute(AttributeNode);

impl Attribute {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn dtype(&self) -> &DType {
        &self.0.dtype
    }

    pub fn dims(&self) -> &[u64] {
        &self.0.dims
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_scalar()
    }

    /// The value as one buffer; non-scalar attributes become arrays.
    pub fn value(&self) -> Result<H5Buffer> {
        let dtype = if self.is_scalar() {
            self.0.dtype.clone()
        } else {
            let dims = self
                .0
                .dims
                .iter()
                .map(|&d| {
                    u32::try_from(d).map_err(|_| {
                        Error::DType(format!(
                            "Attribute {} dimension {d} is too large for an array type",
                            self.0.name
                        ))
                    })
                })
                .collect::<Result<Vec<u32>>>()?;
            DType::array(self.0.dtype.clone(), &dims)
        };
        H5Buffer::from_parts(dtype, self.0.data.clone(), self.0.heap.clone())
    }

    pub fn read<T: BufferRead>(&self) -> Result<T> {
        self.value()?.view().read()
    }
}
