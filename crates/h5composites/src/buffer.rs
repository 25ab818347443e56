//! Typed memory holding HDF5 data.
//!
//! An [`H5Buffer`] owns the bytes of one element of a datatype together
//! with the [`VlenHeap`] that its variable-length slots point into.
//! [`H5BufferConstView`] and [`H5BufferView`] borrow a buffer, or any part
//! of one: a compound member, an array element or an element of a
//! variable-length sequence.

use h5composites_format::datatype::{Datatype, StringPadding, VlenKind};
use h5composites_format::error::FormatError;
use h5composites_format::vl_data::{self, copy_elements, read_slot, VlenHeap};

use crate::dtype::{DType, DTypeClass, DTypeExt};
use crate::error::{Error, Result};
use crate::traits::{BufferRead, BufferWrite};

fn check_size(dtype: &DType, data: &[u8]) -> Result<()> {
    if data.len() != dtype.size() {
        return Err(FormatError::DataSizeMismatch {
            expected: dtype.size(),
            actual: data.len(),
        }
        .into());
    }
    Ok(())
}

fn scalar_has_no_size() -> Error {
    Error::DType("Scalar type has no size".into())
}

fn out_of_range(index: usize, size: usize) -> Error {
    Error::DType(format!("Index {index} out of range for size {size}"))
}

/// An owned element of a datatype.
#[derive(Debug, Clone)]
pub struct H5Buffer {
    dtype: DType,
    data: Vec<u8>,
    heap: VlenHeap,
}

impl H5Buffer {
    /// A zero-filled buffer. Zeroed variable-length slots are empty values.
    pub fn new(dtype: DType) -> Self {
        let data = vec![0u8; dtype.size()];
        Self {
            dtype,
            data,
            heap: VlenHeap::new(),
        }
    }

    pub fn from_parts(dtype: DType, data: Vec<u8>, heap: VlenHeap) -> Result<Self> {
        check_size(&dtype, &data)?;
        Ok(Self { dtype, data, heap })
    }

    pub fn into_parts(self) -> (DType, Vec<u8>, VlenHeap) {
        (self.dtype, self.data, self.heap)
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn heap(&self) -> &VlenHeap {
        &self.heap
    }

    pub fn view(&self) -> H5BufferConstView<'_> {
        H5BufferConstView {
            dtype: &self.dtype,
            data: &self.data,
            heap: &self.heap,
        }
    }

    pub fn view_mut(&mut self) -> H5BufferView<'_> {
        H5BufferView {
            dtype: &self.dtype,
            data: &mut self.data,
            heap: &mut self.heap,
        }
    }

    /// Bytes of the element plus every payload it references.
    pub fn footprint(&self) -> Result<usize> {
        self.view().footprint()
    }

    /// Drop payloads no longer referenced by the element.
    pub fn compact(&mut self) -> Result<()> {
        let mut heap = VlenHeap::new();
        self.data = copy_elements(&self.dtype, &self.data, &self.heap, &mut heap)?;
        self.heap = heap;
        Ok(())
    }
}

/// A read-only view of one element.
#[derive(Debug, Clone, Copy)]
pub struct H5BufferConstView<'a> {
    dtype: &'a DType,
    data: &'a [u8],
    heap: &'a VlenHeap,
}

impl<'a> H5BufferConstView<'a> {
    pub fn new(dtype: &'a DType, data: &'a [u8], heap: &'a VlenHeap) -> Result<Self> {
        check_size(dtype, data)?;
        Ok(Self { dtype, data, heap })
    }

    fn child(&self, dtype: &'a DType, start: usize) -> Result<Self> {
        let end = start + dtype.size();
        let data = self
            .data
            .get(start..end)
            .ok_or(FormatError::UnexpectedEof {
                expected: end,
                available: self.data.len(),
            })?;
        Ok(Self {
            dtype,
            data,
            heap: self.heap,
        })
    }

    pub fn dtype(&self) -> &'a DType {
        self.dtype
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn heap(&self) -> &'a VlenHeap {
        self.heap
    }

    /// False for strings, compounds, sequences and arrays.
    pub fn is_scalar(&self) -> bool {
        self.dtype.is_atomic()
    }

    /// Number of children: string bytes, compound members, sequence or
    /// array elements.
    pub fn size(&self) -> Result<usize> {
        match self.dtype {
            Datatype::String { size, .. } => Ok(*size as usize),
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => Ok(vl_data::slot_payload(self.heap, self.data)?.len()),
            Datatype::VariableLength { .. } => Ok(read_slot(self.data)?.0 as usize),
            Datatype::Compound { members, .. } => Ok(members.len()),
            Datatype::Array { .. } => Ok(self.dtype.array_len().unwrap_or(0) as usize),
            _ => Err(scalar_has_no_size()),
        }
    }

    /// Member `index` of a compound.
    pub fn member(&self, index: usize) -> Result<Self> {
        if self.dtype.class() != DTypeClass::Compound {
            return Err(Error::DType("Only compound types have members".into()));
        }
        let members = self.dtype.members();
        let m = members
            .get(index)
            .ok_or_else(|| out_of_range(index, members.len()))?;
        self.child(&m.datatype, m.byte_offset as usize)
    }

    /// Compound member called `name`.
    pub fn member_named(&self, name: &str) -> Result<Self> {
        let index = self
            .dtype
            .member_index(name)
            .ok_or_else(|| Error::DType(format!("No compound member named '{name}'")))?;
        self.member(index)
    }

    /// Element `index` of an array (row-major over all dimensions) or of
    /// a variable-length sequence.
    pub fn element(&self, index: usize) -> Result<Self> {
        match self.dtype {
            Datatype::Array { base_type, .. } => {
                let len = self.size()?;
                if index >= len {
                    return Err(out_of_range(index, len));
                }
                self.child(base_type, index * base_type.size())
            }
            Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type,
            } => {
                let len = self.size()?;
                if index >= len {
                    return Err(out_of_range(index, len));
                }
                let payload = vl_data::slot_payload(self.heap, self.data)?;
                let view = Self {
                    dtype: self.dtype,
                    data: payload,
                    heap: self.heap,
                };
                view.child(base_type, index * base_type.size())
            }
            _ => Err(Error::DType(
                "Only array and variable-length types have elements".into(),
            )),
        }
    }

    /// Every child view: members, array elements or sequence elements.
    pub fn children(&self) -> Result<Vec<Self>> {
        let n = self.size()?;
        match self.dtype.class() {
            DTypeClass::Compound => (0..n).map(|i| self.member(i)).collect(),
            DTypeClass::Array | DTypeClass::VarLen => (0..n).map(|i| self.element(i)).collect(),
            _ => Err(Error::DType("Strings have no child buffers".into())),
        }
    }

    pub fn iter(&self) -> Result<std::vec::IntoIter<Self>> {
        Ok(self.children()?.into_iter())
    }

    /// Byte `index` of a string.
    pub fn char_at(&self, index: usize) -> Result<u8> {
        let bytes = self.raw_string()?;
        bytes
            .get(index)
            .copied()
            .ok_or_else(|| out_of_range(index, bytes.len()))
    }

    fn raw_string(&self) -> Result<&'a [u8]> {
        match self.dtype {
            Datatype::String { .. } => Ok(self.data),
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => Ok(vl_data::slot_payload(self.heap, self.data)?),
            _ => Err(Error::DType("Not a string type".into())),
        }
    }

    /// Content of a string without its padding.
    pub fn string_bytes(&self) -> Result<&'a [u8]> {
        let raw = self.raw_string()?;
        let padding = match self.dtype {
            Datatype::String { padding, .. } => *padding,
            Datatype::VariableLength {
                kind: VlenKind::String { padding, .. },
                ..
            } => *padding,
            _ => StringPadding::NullTerminate,
        };
        let end = match padding {
            StringPadding::SpacePad => raw.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1),
            _ => raw.iter().position(|&b| b == 0).unwrap_or(raw.len()),
        };
        Ok(&raw[..end])
    }

    pub fn as_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.string_bytes()?).map_err(|_| FormatError::InvalidUtf8.into())
    }

    /// Bytes of the element plus every payload it references.
    pub fn footprint(&self) -> Result<usize> {
        Ok(vl_data::footprint(self.dtype, self.data, self.heap)?)
    }

    /// Deep copy into an owned buffer.
    pub fn to_buffer(&self) -> Result<H5Buffer> {
        let mut heap = VlenHeap::new();
        let data = copy_elements(self.dtype, self.data, self.heap, &mut heap)?;
        Ok(H5Buffer {
            dtype: self.dtype.clone(),
            data,
            heap,
        })
    }

    /// Read a Rust value, converting from this buffer's type if needed.
    pub fn read<T: BufferRead>(&self) -> Result<T> {
        T::read_buffer(self)
    }
}

/// A mutable view of one element.
#[derive(Debug)]
pub struct H5BufferView<'a> {
    dtype: &'a DType,
    data: &'a mut [u8],
    heap: &'a mut VlenHeap,
}

impl<'a> H5BufferView<'a> {
    pub fn new(dtype: &'a DType, data: &'a mut [u8], heap: &'a mut VlenHeap) -> Result<Self> {
        check_size(dtype, data)?;
        Ok(Self { dtype, data, heap })
    }

    pub fn dtype(&self) -> &'a DType {
        self.dtype
    }

    pub fn bytes(&self) -> &[u8] {
        &*self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    pub fn heap_mut(&mut self) -> &mut VlenHeap {
        &mut *self.heap
    }

    /// Both halves of the view at once.
    pub fn parts_mut(&mut self) -> (&mut [u8], &mut VlenHeap) {
        (&mut *self.data, &mut *self.heap)
    }

    pub fn as_const(&self) -> H5BufferConstView<'_> {
        H5BufferConstView {
            dtype: self.dtype,
            data: &*self.data,
            heap: &*self.heap,
        }
    }

    pub fn reborrow(&mut self) -> H5BufferView<'_> {
        H5BufferView {
            dtype: self.dtype,
            data: &mut *self.data,
            heap: &mut *self.heap,
        }
    }

    fn child_mut(&mut self, dtype: &'a DType, start: usize) -> Result<H5BufferView<'_>> {
        let end = start + dtype.size();
        let available = self.data.len();
        let data = self
            .data
            .get_mut(start..end)
            .ok_or(FormatError::UnexpectedEof {
                expected: end,
                available,
            })?;
        Ok(H5BufferView {
            dtype,
            data,
            heap: &mut *self.heap,
        })
    }

    pub fn member_mut(&mut self, index: usize) -> Result<H5BufferView<'_>> {
        let dtype = self.dtype;
        if dtype.class() != DTypeClass::Compound {
            return Err(Error::DType("Only compound types have members".into()));
        }
        let members = dtype.members();
        let m = members
            .get(index)
            .ok_or_else(|| out_of_range(index, members.len()))?;
        self.child_mut(&m.datatype, m.byte_offset as usize)
    }

    pub fn member_named_mut(&mut self, name: &str) -> Result<H5BufferView<'_>> {
        let index = self
            .dtype
            .member_index(name)
            .ok_or_else(|| Error::DType(format!("No compound member named '{name}'")))?;
        self.member_mut(index)
    }

    /// Element `index` of an array. Sequence elements live in the heap and
    /// are replaced as a whole through [`H5BufferView::write`].
    pub fn element_mut(&mut self, index: usize) -> Result<H5BufferView<'_>> {
        let dtype = self.dtype;
        match dtype {
            Datatype::Array { base_type, .. } => {
                let len = dtype.array_len().unwrap_or(0) as usize;
                if index >= len {
                    return Err(out_of_range(index, len));
                }
                self.child_mut(base_type, index * base_type.size())
            }
            _ => Err(Error::DType("Only array elements can be modified in place".into())),
        }
    }

    /// Copy `src` into this view, converting when the types differ.
    pub fn assign(&mut self, src: &H5BufferConstView<'_>) -> Result<()> {
        if src.dtype() == self.dtype {
            let data = copy_elements(self.dtype, src.bytes(), src.heap(), &mut *self.heap)?;
            self.data.copy_from_slice(&data);
            Ok(())
        } else {
            crate::conversion::convert_into(src, self)
        }
    }

    /// Store a Rust value, converting into this view's type if needed.
    pub fn write<T: BufferWrite + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.write_buffer(self)
    }
}

/// Several consecutive elements of one datatype, as read from a dataset.
#[derive(Debug, Clone)]
pub struct ElementBlock {
    dtype: DType,
    len: usize,
    data: Vec<u8>,
    heap: VlenHeap,
}

impl ElementBlock {
    pub fn new(dtype: DType, len: usize, data: Vec<u8>, heap: VlenHeap) -> Result<Self> {
        let expected = len * dtype.size();
        if data.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                expected,
                actual: data.len(),
            }
            .into());
        }
        Ok(Self {
            dtype,
            len,
            data,
            heap,
        })
    }

    pub fn empty(dtype: DType) -> Self {
        Self {
            dtype,
            len: 0,
            data: Vec::new(),
            heap: VlenHeap::new(),
        }
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn heap(&self) -> &VlenHeap {
        &self.heap
    }

    pub fn into_parts(self) -> (DType, Vec<u8>, VlenHeap) {
        (self.dtype, self.data, self.heap)
    }

    pub fn get(&self, index: usize) -> Option<H5BufferConstView<'_>> {
        if index >= self.len {
            return None;
        }
        let size = self.dtype.size();
        Some(H5BufferConstView {
            dtype: &self.dtype,
            data: &self.data[index * size..(index + 1) * size],
            heap: &self.heap,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = H5BufferConstView<'_>> {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::packed_compound;
    use crate::traits::to_buffer;

    #[test]
    fn zeroed_buffer_holds_empty_values() {
        let buf = H5Buffer::new(DType::variable_string());
        assert_eq!(buf.view().size().unwrap(), 0);
        assert_eq!(buf.view().as_str().unwrap(), "");
        assert_eq!(buf.footprint().unwrap(), 16);
    }

    #[test]
    fn sizes_by_class() {
        let fixed = to_buffer(&crate::traits::FLString::from("abc")).unwrap();
        assert_eq!(fixed.view().size().unwrap(), 3);
        let seq = to_buffer(&vec![1u16, 2, 3, 4]).unwrap();
        assert_eq!(seq.view().size().unwrap(), 4);
        let arr = to_buffer(&[[1i8; 2]; 3]).unwrap();
        assert_eq!(arr.view().size().unwrap(), 3);
        let n = to_buffer(&5i32).unwrap();
        let err = n.view().size().unwrap_err();
        assert_eq!(err.to_string(), "Scalar type has no size");
        assert!(n.view().is_scalar());
        assert!(!seq.view().is_scalar());
    }

    #[test]
    fn compound_members_by_index_and_name() {
        let buf = to_buffer(&(7u8, 2.5f64, String::from("hi"))).unwrap();
        let v = buf.view();
        assert_eq!(v.size().unwrap(), 3);
        assert_eq!(v.member(0).unwrap().read::<u8>().unwrap(), 7);
        assert_eq!(v.member_named("element1").unwrap().read::<f64>().unwrap(), 2.5);
        assert_eq!(v.member(2).unwrap().as_str().unwrap(), "hi");
        assert!(v.member(3).is_err());
        assert!(v.member_named("nope").is_err());
    }

    #[test]
    fn sequence_and_string_elements() {
        let buf = to_buffer(&vec![String::from("ab"), String::from("cde")]).unwrap();
        let v = buf.view();
        let second = v.element(1).unwrap();
        assert_eq!(second.char_at(2).unwrap(), b'e');
        assert!(second.char_at(3).is_err());
        let all: Vec<String> = v.iter().unwrap().map(|e| e.read().unwrap()).collect();
        assert_eq!(all, ["ab", "cde"]);
        assert_eq!(v.footprint().unwrap(), 16 + 32 + 2 + 3);
    }

    #[test]
    fn mutable_member_write() {
        let dt = packed_compound([("a", DType::native_i32()), ("b", DType::variable_string())]);
        let mut buf = H5Buffer::new(dt);
        {
            let mut view = buf.view_mut();
            view.member_named_mut("a").unwrap().write(&-4i32).unwrap();
            view.member_mut(1).unwrap().write("text").unwrap();
        }
        let v = buf.view();
        assert_eq!(v.member(0).unwrap().read::<i32>().unwrap(), -4);
        assert_eq!(v.member(1).unwrap().read::<String>().unwrap(), "text");
    }

    #[test]
    fn fixed_strings_drop_padding() {
        let dt = Datatype::String {
            size: 6,
            padding: StringPadding::SpacePad,
            charset: h5composites_format::datatype::CharacterSet::Ascii,
        };
        let heap = VlenHeap::new();
        let view = H5BufferConstView::new(&dt, b"ab    ", &heap).unwrap();
        assert_eq!(view.as_str().unwrap(), "ab");
        let nul = DType::fixed_string(4);
        let view = H5BufferConstView::new(&nul, b"x\0\0\0", &heap).unwrap();
        assert_eq!(view.as_str().unwrap(), "x");
        assert!(H5BufferConstView::new(&nul, b"x", &heap).is_err());
    }

    #[test]
    fn blocks_split_into_elements() {
        let block = ElementBlock::new(
            DType::native_u16(),
            3,
            vec![1, 0, 2, 0, 3, 0],
            VlenHeap::new(),
        )
        .unwrap();
        let values: Vec<u16> = block.iter().map(|v| v.read().unwrap()).collect();
        assert_eq!(values, [1, 2, 3]);
        assert!(block.get(3).is_none());
        assert!(ElementBlock::new(DType::native_u16(), 2, vec![0; 3], VlenHeap::new()).is_err());
    }
}
