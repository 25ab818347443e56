//! In-memory object tree of an HDF5 file.
//!
//! Dataset and attribute values are stored row-major in their in-memory
//! form: variable-length values are slots into the node's own [`VlenHeap`].
//! An empty `dims` vector means a scalar dataspace.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use crate::datatype::Datatype;
use crate::dataspace::UNLIMITED;
use crate::error::FormatError;
use crate::vl_data::{copy_elements, release_elements, VlenHeap};

/// A named attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeNode {
    pub name: String,
    pub dtype: Datatype,
    pub dims: Vec<u64>,
    pub data: Vec<u8>,
    pub heap: VlenHeap,
}

impl AttributeNode {
    /// A scalar attribute holding one element whose payloads live in `heap`.
    pub fn scalar(
        name: &str,
        dtype: Datatype,
        element: &[u8],
        heap: &VlenHeap,
    ) -> Result<Self, FormatError> {
        Self::new(name, dtype, Vec::new(), element, heap)
    }

    pub fn new(
        name: &str,
        dtype: Datatype,
        dims: Vec<u64>,
        data: &[u8],
        heap: &VlenHeap,
    ) -> Result<Self, FormatError> {
        let expected = element_count(&dims) as usize * dtype.type_size() as usize;
        if data.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let mut own = VlenHeap::new();
        let data = copy_elements(&dtype, data, heap, &mut own)?;
        Ok(AttributeNode {
            name: String::from(name),
            dtype,
            dims,
            data,
            heap: own,
        })
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }
}

/// A dataset: typed N-dimensional (or scalar) data.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetNode {
    pub dtype: Datatype,
    pub dims: Vec<u64>,
    /// Maximum extent; [`UNLIMITED`] marks unbounded axes.
    pub max_dims: Vec<u64>,
    /// Chunk extent for chunked storage.
    pub chunk: Option<Vec<u64>>,
    pub data: Vec<u8>,
    pub heap: VlenHeap,
    pub attributes: Vec<AttributeNode>,
}

/// A group: ordered named links plus attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupNode {
    pub links: Vec<(String, Node)>,
    pub attributes: Vec<AttributeNode>,
}

/// Any object a group can link to.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
    /// A committed (named) datatype.
    DataType(Datatype),
}

/// Number of elements in an extent; 1 for scalars.
pub fn element_count(dims: &[u64]) -> u64 {
    dims.iter().product()
}

// ---- Attribute lists ----

fn find_attribute<'a>(list: &'a [AttributeNode], name: &str) -> Option<&'a AttributeNode> {
    list.iter().find(|a| a.name == name)
}

fn put_attribute(list: &mut Vec<AttributeNode>, attr: AttributeNode) {
    match list.iter_mut().find(|a| a.name == attr.name) {
        Some(existing) => *existing = attr,
        None => list.push(attr),
    }
}

impl Node {
    pub fn attributes(&self) -> &[AttributeNode] {
        match self {
            Node::Group(g) => &g.attributes,
            Node::Dataset(d) => &d.attributes,
            Node::DataType(_) => &[],
        }
    }
}

impl GroupNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.links.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.links
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Link `node` under `name`; fails if the name is taken.
    pub fn insert(&mut self, name: &str, node: Node) -> Result<&mut Node, FormatError> {
        if self.contains(name) {
            return Err(FormatError::ObjectExists(String::from(name)));
        }
        self.links.push((String::from(name), node));
        let last = self.links.len() - 1;
        Ok(&mut self.links[last].1)
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let pos = self.links.iter().position(|(n, _)| n == name)?;
        Some(self.links.remove(pos).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|(n, _)| n.as_str())
    }

    /// Resolve a '/'-separated path relative to this group.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut node = self.get(first)?;
        for part in parts {
            match node {
                Node::Group(g) => node = g.get(part)?,
                _ => return None,
            }
        }
        Some(node)
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut node = self.get_mut(first)?;
        for part in parts {
            match node {
                Node::Group(g) => node = g.get_mut(part)?,
                _ => return None,
            }
        }
        Some(node)
    }

    /// The group at `path`, where an empty path is this group.
    pub fn group_at(&self, path: &str) -> Option<&GroupNode> {
        if path.split('/').all(str::is_empty) {
            return Some(self);
        }
        match self.lookup(path)? {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn group_at_mut(&mut self, path: &str) -> Option<&mut GroupNode> {
        if path.split('/').all(str::is_empty) {
            return Some(self);
        }
        match self.lookup_mut(path)? {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        find_attribute(&self.attributes, name)
    }

    /// Add or replace an attribute.
    pub fn set_attribute(&mut self, attr: AttributeNode) {
        put_attribute(&mut self.attributes, attr);
    }
}

// ---- Hyperslab copying ----

fn check_selection(dims: &[u64], start: &[u64], count: &[u64]) -> Result<(), FormatError> {
    if start.len() != dims.len() || count.len() != dims.len() {
        return Err(FormatError::SelectionOutOfBounds);
    }
    for ((s, c), d) in start.iter().zip(count).zip(dims) {
        match s.checked_add(*c) {
            Some(end) if end <= *d => {}
            _ => return Err(FormatError::SelectionOutOfBounds),
        }
    }
    Ok(())
}

fn strides(dims: &[u64]) -> Vec<u64> {
    let mut out = vec![1u64; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        out[i] = out[i + 1] * dims[i + 1];
    }
    out
}

/// Copy the box `count` at `src_start` of a row-major `src_dims` array to
/// `dst_start` of a row-major `dst_dims` array.
#[allow(clippy::too_many_arguments)]
pub fn copy_region(
    src: &[u8],
    src_dims: &[u64],
    src_start: &[u64],
    dst: &mut [u8],
    dst_dims: &[u64],
    dst_start: &[u64],
    count: &[u64],
    elem_size: usize,
) {
    let rank = count.len();
    if rank == 0 {
        dst[..elem_size].copy_from_slice(&src[..elem_size]);
        return;
    }
    if count.iter().any(|&c| c == 0) {
        return;
    }
    let ss = strides(src_dims);
    let ds = strides(dst_dims);
    let run = count[rank - 1] as usize * elem_size;
    let mut idx = vec![0u64; rank - 1];
    loop {
        let mut so = src_start[rank - 1];
        let mut d_o = dst_start[rank - 1];
        for k in 0..rank - 1 {
            so += (src_start[k] + idx[k]) * ss[k];
            d_o += (dst_start[k] + idx[k]) * ds[k];
        }
        let so = so as usize * elem_size;
        let d_o = d_o as usize * elem_size;
        dst[d_o..d_o + run].copy_from_slice(&src[so..so + run]);

        // odometer over all but the last axis
        let mut k = rank - 1;
        loop {
            if k == 0 {
                return;
            }
            k -= 1;
            idx[k] += 1;
            if idx[k] < count[k] {
                break;
            }
            idx[k] = 0;
        }
    }
}

impl DatasetNode {
    /// A zero-filled dataset.
    pub fn new(
        dtype: Datatype,
        dims: Vec<u64>,
        max_dims: Option<Vec<u64>>,
        chunk: Option<Vec<u64>>,
    ) -> Result<Self, FormatError> {
        let max_dims = max_dims.unwrap_or_else(|| dims.clone());
        if max_dims.len() != dims.len() || dims.iter().zip(&max_dims).any(|(d, m)| d > m) {
            return Err(FormatError::ExtentExceedsMaximum);
        }
        let extendible = max_dims.iter().zip(&dims).any(|(m, d)| m != d);
        if let Some(c) = &chunk {
            if c.len() != dims.len() || c.iter().any(|&v| v == 0) {
                return Err(FormatError::UnsupportedFeature("chunk shape must match rank"));
            }
        } else if extendible {
            return Err(FormatError::UnsupportedFeature(
                "extendible datasets must be chunked",
            ));
        }
        let size = element_count(&dims) as usize * dtype.type_size() as usize;
        Ok(DatasetNode {
            dtype,
            dims,
            max_dims,
            chunk,
            data: vec![0u8; size],
            heap: VlenHeap::new(),
            attributes: Vec::new(),
        })
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn element_size(&self) -> usize {
        self.dtype.type_size() as usize
    }

    pub fn num_elements(&self) -> u64 {
        element_count(&self.dims)
    }

    /// Read a box of elements; payloads are copied into `dst_heap`.
    pub fn read_hyperslab(
        &self,
        start: &[u64],
        count: &[u64],
        dst_heap: &mut VlenHeap,
    ) -> Result<Vec<u8>, FormatError> {
        check_selection(&self.dims, start, count)?;
        let es = self.element_size();
        let mut out = vec![0u8; element_count(count) as usize * es];
        let zero = vec![0u64; count.len()];
        copy_region(&self.data, &self.dims, start, &mut out, count, &zero, count, es);
        copy_elements(&self.dtype, &out, &self.heap, dst_heap)
    }

    /// Overwrite a box of elements with `data` whose payloads live in `src_heap`.
    pub fn write_hyperslab(
        &mut self,
        start: &[u64],
        count: &[u64],
        data: &[u8],
        src_heap: &VlenHeap,
    ) -> Result<(), FormatError> {
        check_selection(&self.dims, start, count)?;
        let es = self.element_size();
        let expected = element_count(count) as usize * es;
        if data.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let zero = vec![0u64; count.len()];
        let dims = self.dims.clone();
        if self.dtype.contains_vlen() {
            let mut old = vec![0u8; expected];
            copy_region(&self.data, &dims, start, &mut old, count, &zero, count, es);
            release_elements(&self.dtype, &old, &mut self.heap)?;
        }
        let own = copy_elements(&self.dtype, data, src_heap, &mut self.heap)?;
        copy_region(&own, count, &zero, &mut self.data, &dims, start, count, es);
        Ok(())
    }

    /// Change the extent, keeping the overlapping data in place.
    pub fn resize(&mut self, new_dims: &[u64]) -> Result<(), FormatError> {
        if new_dims.len() != self.dims.len() {
            return Err(FormatError::SelectionOutOfBounds);
        }
        if new_dims
            .iter()
            .zip(&self.max_dims)
            .any(|(&n, &m)| m != UNLIMITED && n > m)
        {
            return Err(FormatError::ExtentExceedsMaximum);
        }
        let es = self.element_size();
        let new_len = element_count(new_dims) as usize * es;
        if new_dims.get(1..) == self.dims.get(1..) {
            // Row-major data stays in place when only the outer extent changes.
            if new_len < self.data.len() && self.dtype.contains_vlen() {
                release_elements(&self.dtype, &self.data[new_len..], &mut self.heap)?;
            }
            self.data.resize(new_len, 0);
            self.dims = new_dims.to_vec();
            return Ok(());
        }
        let mut data = vec![0u8; new_len];
        let overlap: Vec<u64> = self.dims.iter().zip(new_dims).map(|(a, b)| *a.min(b)).collect();
        let zero = vec![0u64; overlap.len()];
        copy_region(&self.data, &self.dims, &zero, &mut data, new_dims, &zero, &overlap, es);
        if self.dtype.contains_vlen() {
            let mut heap = VlenHeap::new();
            data = copy_elements(&self.dtype, &data, &self.heap, &mut heap)?;
            self.heap = heap;
        }
        self.data = data;
        self.dims = new_dims.to_vec();
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeNode> {
        find_attribute(&self.attributes, name)
    }

    pub fn set_attribute(&mut self, attr: AttributeNode) {
        put_attribute(&mut self.attributes, attr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vl_data::{make_slot, read_slot, slot_payload};

    fn i32_dataset(dims: &[u64], max: Option<&[u64]>, chunk: Option<&[u64]>) -> DatasetNode {
        DatasetNode::new(
            Datatype::native_i32(),
            dims.to_vec(),
            max.map(|m| m.to_vec()),
            chunk.map(|c| c.to_vec()),
        )
        .unwrap()
    }

    fn ints(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn paths_resolve_through_groups() {
        let mut root = GroupNode::new();
        let inner = root.insert("a", Node::Group(GroupNode::new())).unwrap();
        if let Node::Group(g) = inner {
            g.insert("b", Node::DataType(Datatype::native_u8())).unwrap();
        }
        assert!(matches!(root.lookup("/a/b"), Some(Node::DataType(_))));
        assert!(root.lookup("a/c").is_none());
        assert!(root.group_at("").is_some());
        assert!(root.group_at("a/b").is_none());
        assert_eq!(
            root.insert("a", Node::Group(GroupNode::new())).unwrap_err(),
            FormatError::ObjectExists(String::from("a"))
        );
    }

    #[test]
    fn hyperslab_write_then_read() {
        let mut ds = i32_dataset(&[3, 4], None, None);
        let heap = VlenHeap::new();
        ds.write_hyperslab(&[1, 1], &[2, 2], &ints(&[1, 2, 3, 4]), &heap)
            .unwrap();
        let all = ds.read_hyperslab(&[0, 0], &[3, 4], &mut VlenHeap::new()).unwrap();
        assert_eq!(all, ints(&[0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0]));
        let col = ds.read_hyperslab(&[0, 2], &[3, 1], &mut VlenHeap::new()).unwrap();
        assert_eq!(col, ints(&[0, 2, 4]));
    }

    #[test]
    fn out_of_bounds_selection() {
        let ds = i32_dataset(&[4], None, None);
        assert_eq!(
            ds.read_hyperslab(&[3], &[2], &mut VlenHeap::new()),
            Err(FormatError::SelectionOutOfBounds)
        );
    }

    #[test]
    fn resize_keeps_overlap() {
        let mut ds = i32_dataset(&[2, 2], Some(&[UNLIMITED, 3]), Some(&[2, 2]));
        ds.write_hyperslab(&[0, 0], &[2, 2], &ints(&[1, 2, 3, 4]), &VlenHeap::new())
            .unwrap();
        ds.resize(&[3, 3]).unwrap();
        assert_eq!(ds.data, ints(&[1, 2, 0, 3, 4, 0, 0, 0, 0]));
        assert_eq!(ds.resize(&[3, 4]), Err(FormatError::ExtentExceedsMaximum));
    }

    #[test]
    fn outer_resize_keeps_rows_in_place() {
        let mut ds = i32_dataset(&[2], Some(&[UNLIMITED]), Some(&[2]));
        ds.write_hyperslab(&[0], &[2], &ints(&[7, 8]), &VlenHeap::new())
            .unwrap();
        ds.resize(&[4]).unwrap();
        assert_eq!(ds.data, ints(&[7, 8, 0, 0]));
        ds.resize(&[1]).unwrap();
        assert_eq!(ds.data, ints(&[7]));

        let mut grid = i32_dataset(&[1, 2], Some(&[UNLIMITED, 2]), Some(&[1, 2]));
        grid.write_hyperslab(&[0, 0], &[1, 2], &ints(&[1, 2]), &VlenHeap::new())
            .unwrap();
        grid.resize(&[3, 2]).unwrap();
        assert_eq!(grid.data, ints(&[1, 2, 0, 0, 0, 0]));
    }

    #[test]
    fn overwritten_payloads_are_released() {
        let mut ds = DatasetNode::new(Datatype::variable_string(), Vec::new(), None, None).unwrap();
        for i in 0..50 {
            let mut heap = VlenHeap::new();
            let text = format!("value {i}");
            let slot = make_slot(&mut heap, text.len() as u64, text.into_bytes());
            ds.write_hyperslab(&[], &[], &slot, &heap).unwrap();
        }
        assert_eq!(ds.heap.len(), 1);
        let read = ds.read_hyperslab(&[], &[], &mut VlenHeap::new()).unwrap();
        assert_eq!(ds.heap.get(read_slot(&ds.data).unwrap().1).unwrap(), b"value 49");
        assert_eq!(read.len(), 16);

        let words = Datatype::vlen(Datatype::variable_string());
        let mut seq = DatasetNode::new(words, vec![2], Some(vec![UNLIMITED]), Some(vec![2])).unwrap();
        let mut heap = VlenHeap::new();
        let a = make_slot(&mut heap, 1, b"a".to_vec());
        let b = make_slot(&mut heap, 2, b"bc".to_vec());
        let row = make_slot(&mut heap, 2, [a, b].concat());
        let rows = [row, row].concat();
        seq.write_hyperslab(&[0], &[2], &rows, &heap).unwrap();
        seq.write_hyperslab(&[0], &[2], &rows, &heap).unwrap();
        assert_eq!(seq.heap.live_len(), 6);
        seq.resize(&[1]).unwrap();
        assert_eq!(seq.heap.live_len(), 3);
    }

    #[test]
    fn extendible_requires_chunks() {
        assert!(DatasetNode::new(Datatype::native_u8(), vec![0], Some(vec![UNLIMITED]), None).is_err());
    }

    #[test]
    fn scalar_dataset_and_vlen_payloads() {
        let mut ds = DatasetNode::new(Datatype::variable_string(), Vec::new(), None, None).unwrap();
        assert!(ds.is_scalar());
        let mut heap = VlenHeap::new();
        let slot = make_slot(&mut heap, 5, b"hello".to_vec());
        ds.write_hyperslab(&[], &[], &slot, &heap).unwrap();
        let mut out_heap = VlenHeap::new();
        let read = ds.read_hyperslab(&[], &[], &mut out_heap).unwrap();
        assert_eq!(slot_payload(&out_heap, &read).unwrap(), b"hello");
    }

    #[test]
    fn attributes_are_replaced_by_name() {
        let heap = VlenHeap::new();
        let mut g = GroupNode::new();
        g.set_attribute(AttributeNode::scalar("x", Datatype::native_u8(), &[1], &heap).unwrap());
        g.set_attribute(AttributeNode::scalar("x", Datatype::native_u8(), &[2], &heap).unwrap());
        assert_eq!(g.attributes.len(), 1);
        assert_eq!(g.attribute("x").unwrap().data, [2]);
        assert!(AttributeNode::scalar("y", Datatype::native_u16(), &[1], &heap).is_err());
    }
}
