//! In-memory storage of variable-length data.
//!
//! A buffer holding a variable-length type stores a 16-byte slot per value:
//! a `u64` element count followed by a `u64` index into a [`VlenHeap`].
//! A count of zero or index [`EMPTY_VLEN`] marks a value without payload,
//! so zero-filled buffers hold empty values. For strings the count is the
//! number of bytes, for sequences the number of base elements.

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeSet, vec::Vec};
#[cfg(feature = "std")]
use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::datatype::{Datatype, VlenKind, VLEN_SLOT_SIZE};
use crate::error::FormatError;

/// Heap index of a slot without payload.
pub const EMPTY_VLEN: u64 = u64::MAX;

/// Arena owning the payloads referenced by vlen slots.
///
/// Released entries are emptied and their indices handed out again by
/// [`VlenHeap::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VlenHeap {
    entries: Vec<Vec<u8>>,
    free: BTreeSet<u64>,
}

impl VlenHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload and return its index.
    pub fn push(&mut self, payload: Vec<u8>) -> u64 {
        if let Some(index) = self.free.pop_first() {
            self.entries[index as usize] = payload;
            return index;
        }
        self.entries.push(payload);
        (self.entries.len() - 1) as u64
    }

    /// Drop the payload at `index` and make the index reusable.
    pub fn release(&mut self, index: u64) {
        if let Some(entry) = self.entries.get_mut(index as usize) {
            *entry = Vec::new();
            self.free.insert(index);
        }
    }

    /// Entries holding a payload that has not been released.
    pub fn live_len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn get(&self, index: u64) -> Result<&[u8], FormatError> {
        self.entries
            .get(index as usize)
            .map(|e| e.as_slice())
            .ok_or(FormatError::InvalidVlenReference(index))
    }

    pub fn get_mut(&mut self, index: u64) -> Result<&mut Vec<u8>, FormatError> {
        self.entries
            .get_mut(index as usize)
            .ok_or(FormatError::InvalidVlenReference(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
    }

    /// Bytes held by every entry, reachable or not.
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }
}

/// Decode an in-memory slot into `(count, heap index)`.
pub fn read_slot(slot: &[u8]) -> Result<(u64, u64), FormatError> {
    if slot.len() < VLEN_SLOT_SIZE as usize {
        return Err(FormatError::UnexpectedEof {
            expected: VLEN_SLOT_SIZE as usize,
            available: slot.len(),
        });
    }
    Ok((
        LittleEndian::read_u64(&slot[0..8]),
        LittleEndian::read_u64(&slot[8..16]),
    ))
}

/// Encode an in-memory slot.
pub fn write_slot(slot: &mut [u8], count: u64, index: u64) {
    LittleEndian::write_u64(&mut slot[0..8], count);
    LittleEndian::write_u64(&mut slot[8..16], index);
}

/// Bytes per counted unit of a variable-length type's payload.
pub fn payload_unit(vlen: &Datatype) -> usize {
    match vlen {
        Datatype::VariableLength {
            kind: VlenKind::String { .. },
            ..
        } => 1,
        Datatype::VariableLength { base_type, .. } => base_type.type_size() as usize,
        _ => 0,
    }
}

/// Whether a decoded slot has no payload.
pub fn is_empty_slot(count: u64, index: u64) -> bool {
    count == 0 || index == EMPTY_VLEN
}

/// Payload referenced by `slot`, empty for slots without payload.
pub fn slot_payload<'a>(heap: &'a VlenHeap, slot: &[u8]) -> Result<&'a [u8], FormatError> {
    let (count, index) = read_slot(slot)?;
    if is_empty_slot(count, index) {
        return Ok(&[]);
    }
    heap.get(index)
}

/// Store `payload` holding `count` units in `heap` and return the slot bytes.
pub fn make_slot(heap: &mut VlenHeap, count: u64, payload: Vec<u8>) -> [u8; 16] {
    let mut slot = [0u8; 16];
    let index = if count == 0 && payload.is_empty() {
        EMPTY_VLEN
    } else {
        heap.push(payload)
    };
    write_slot(&mut slot, count, index);
    slot
}

/// Call `f` with every variable-length slot directly inside one element.
///
/// Slots nested inside vlen payloads are not visited; `f` receives the
/// variable-length type and its 16 slot bytes.
pub fn visit_vlen_slots<F>(dtype: &Datatype, element: &mut [u8], f: &mut F) -> Result<(), FormatError>
where
    F: FnMut(&Datatype, &mut [u8]) -> Result<(), FormatError>,
{
    match dtype {
        Datatype::VariableLength { .. } => f(dtype, &mut element[..VLEN_SLOT_SIZE as usize]),
        Datatype::Compound { members, .. } => {
            for m in members {
                if !m.datatype.contains_vlen() {
                    continue;
                }
                let start = m.byte_offset as usize;
                let end = start + m.datatype.type_size() as usize;
                let part = element.get_mut(start..end).ok_or(FormatError::UnexpectedEof {
                    expected: end,
                    available: start,
                })?;
                visit_vlen_slots(&m.datatype, part, f)?;
            }
            Ok(())
        }
        Datatype::Array { base_type, .. } if base_type.contains_vlen() => {
            let size = base_type.type_size() as usize;
            for chunk in element.chunks_exact_mut(size) {
                visit_vlen_slots(base_type, chunk, f)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Read-only walk over the vlen slots of every element in `data`.
pub fn for_each_slot<F>(dtype: &Datatype, data: &[u8], f: &mut F) -> Result<(), FormatError>
where
    F: FnMut(&Datatype, &[u8]) -> Result<(), FormatError>,
{
    if !dtype.contains_vlen() {
        return Ok(());
    }
    let size = dtype.type_size() as usize;
    let mut scratch = Vec::with_capacity(size);
    for element in data.chunks_exact(size) {
        scratch.clear();
        scratch.extend_from_slice(element);
        visit_vlen_slots(dtype, &mut scratch, &mut |t, slot| f(t, slot))?;
    }
    Ok(())
}

/// Copy `data` (whole elements of `dtype`) whose payloads live in `src`
/// into a new byte vector whose payloads live in `dst`.
pub fn copy_elements(
    dtype: &Datatype,
    data: &[u8],
    src: &VlenHeap,
    dst: &mut VlenHeap,
) -> Result<Vec<u8>, FormatError> {
    let mut out = data.to_vec();
    if !dtype.contains_vlen() {
        return Ok(out);
    }
    let size = dtype.type_size() as usize;
    if size == 0 {
        return Ok(out);
    }
    for element in out.chunks_exact_mut(size) {
        rehome(dtype, element, src, dst)?;
    }
    Ok(out)
}

fn rehome(
    dtype: &Datatype,
    element: &mut [u8],
    src: &VlenHeap,
    dst: &mut VlenHeap,
) -> Result<(), FormatError> {
    visit_vlen_slots(dtype, element, &mut |vt, slot| {
        let (count, index) = read_slot(slot)?;
        if is_empty_slot(count, index) {
            write_slot(slot, 0, EMPTY_VLEN);
            return Ok(());
        }
        let payload = match vt {
            Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type,
            } => copy_elements(base_type, src.get(index)?, src, dst)?,
            _ => src.get(index)?.to_vec(),
        };
        let new_index = dst.push(payload);
        write_slot(slot, count, new_index);
        Ok(())
    })
}

/// Release every payload reachable from the elements in `data`,
/// including payloads nested inside sequences.
pub fn release_elements(
    dtype: &Datatype,
    data: &[u8],
    heap: &mut VlenHeap,
) -> Result<(), FormatError> {
    let mut indices = Vec::new();
    reachable_payloads(dtype, data, heap, &mut indices)?;
    for index in indices {
        heap.release(index);
    }
    Ok(())
}

fn reachable_payloads(
    dtype: &Datatype,
    data: &[u8],
    heap: &VlenHeap,
    out: &mut Vec<u64>,
) -> Result<(), FormatError> {
    for_each_slot(dtype, data, &mut |vt, slot| {
        let (count, index) = read_slot(slot)?;
        if is_empty_slot(count, index) {
            return Ok(());
        }
        if let Datatype::VariableLength {
            kind: VlenKind::Sequence,
            base_type,
        } = vt
        {
            reachable_payloads(base_type, heap.get(index)?, heap, out)?;
        }
        out.push(index);
        Ok(())
    })
}

/// Bytes of `data` plus every payload reachable from it.
pub fn footprint(dtype: &Datatype, data: &[u8], heap: &VlenHeap) -> Result<usize, FormatError> {
    let mut total = data.len();
    for_each_slot(dtype, data, &mut |vt, slot| {
        let payload = slot_payload(heap, slot)?;
        total += match vt {
            Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type,
            } => footprint(base_type, payload, heap)?,
            _ => payload.len(),
        };
        Ok(())
    })?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_builders::CompoundTypeBuilder;

    fn string_slot(heap: &mut VlenHeap, s: &str) -> [u8; 16] {
        make_slot(heap, s.len() as u64, s.as_bytes().to_vec())
    }

    #[test]
    fn heap_push_and_get() {
        let mut heap = VlenHeap::new();
        let i = heap.push(vec![1, 2]);
        assert_eq!(heap.get(i).unwrap(), &[1, 2]);
        assert_eq!(heap.get(5), Err(FormatError::InvalidVlenReference(5)));
        assert_eq!(heap.total_bytes(), 2);
    }

    #[test]
    fn empty_values_have_no_payload() {
        let mut heap = VlenHeap::new();
        let slot = make_slot(&mut heap, 0, Vec::new());
        assert_eq!(read_slot(&slot).unwrap(), (0, EMPTY_VLEN));
        assert!(slot_payload(&heap, &slot).unwrap().is_empty());
        assert!(heap.is_empty());
    }

    #[test]
    fn copy_compound_with_nested_sequences() {
        let dtype = CompoundTypeBuilder::new()
            .field("id", Datatype::native_u16())
            .field("name", Datatype::variable_string())
            .field(
                "tags",
                Datatype::vlen(Datatype::variable_string()),
            )
            .build();

        let mut src = VlenHeap::new();
        let name = string_slot(&mut src, "alpha");
        let t1 = string_slot(&mut src, "x");
        let t2 = string_slot(&mut src, "yz");
        let tags = make_slot(&mut src, 2, [t1, t2].concat());
        let mut element = 7u16.to_le_bytes().to_vec();
        element.extend_from_slice(&name);
        element.extend_from_slice(&tags);

        let mut dst = VlenHeap::new();
        dst.push(vec![0xEE]);
        let copied = copy_elements(&dtype, &element, &src, &mut dst).unwrap();
        assert_eq!(&copied[..2], &[7, 0]);

        let name_payload = slot_payload(&dst, &copied[2..18]).unwrap();
        assert_eq!(name_payload, b"alpha");
        let tag_slots = slot_payload(&dst, &copied[18..34]).unwrap();
        assert_eq!(slot_payload(&dst, &tag_slots[16..32]).unwrap(), b"yz");

        assert_eq!(
            footprint(&dtype, &element, &src).unwrap(),
            element.len() + 5 + 32 + 1 + 2
        );
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let dtype = Datatype::variable_string();
        let mut slot = [0u8; 16];
        write_slot(&mut slot, 3, 9);
        let err = copy_elements(&dtype, &slot, &VlenHeap::new(), &mut VlenHeap::new());
        assert_eq!(err, Err(FormatError::InvalidVlenReference(9)));
    }

    #[test]
    fn arrays_of_vlen_are_visited() {
        let dtype = Datatype::array(Datatype::variable_string(), &[3]);
        let mut heap = VlenHeap::new();
        let data = [
            string_slot(&mut heap, "a"),
            string_slot(&mut heap, ""),
            string_slot(&mut heap, "ccc"),
        ]
        .concat();
        let mut seen = Vec::new();
        for_each_slot(&dtype, &data, &mut |_, slot| {
            seen.push(read_slot(slot)?.0);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, [1, 0, 3]);
    }
}
