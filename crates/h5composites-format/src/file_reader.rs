//! Load an HDF5 file into an in-memory object tree.
//!
//! Groups must use compact link storage. Soft and external links are
//! skipped, as are hard links back to an ancestor group. Variable-length
//! values are resolved through the global heap into each node's own
//! [`VlenHeap`].

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::attribute::AttributeMessage;
use crate::btree_v1::collect_chunks;
use crate::data_layout::DataLayout;
use crate::dataspace::{Dataspace, DataspaceType};
use crate::datatype::{Datatype, VlenKind};
use crate::error::FormatError;
use crate::global_heap::{read_heap_id, GlobalHeapCache};
use crate::link_message::{LinkInfoMessage, LinkMessage, LinkTarget};
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::superblock::{ensure_len, find_signature, is_undefined, read_sized, Superblock};
use crate::tree::{copy_region, element_count, AttributeNode, DatasetNode, GroupNode, Node};
use crate::vl_data::{payload_unit, visit_vlen_slots, write_slot, VlenHeap, EMPTY_VLEN};

/// Message flag marking a datatype shared through another object.
const MSG_FLAG_SHARED: u8 = 0x02;

struct Loader<'a> {
    file: &'a [u8],
    offset_size: u8,
    length_size: u8,
    heaps: GlobalHeapCache,
    /// Addresses of the groups being loaded, root first.
    ancestors: Vec<u64>,
}

/// Parse `data` as an HDF5 file and return its root group.
pub fn read_file(data: &[u8]) -> Result<GroupNode, FormatError> {
    let start = find_signature(data)?;
    let sb = Superblock::parse(data, start)?;
    let mut loader = Loader {
        file: &data[start..],
        offset_size: sb.offset_size,
        length_size: sb.length_size,
        heaps: GlobalHeapCache::new(),
        ancestors: Vec::new(),
    };
    match loader.load(sb.root_group_address)? {
        Some(Node::Group(root)) => Ok(root),
        _ => Err(FormatError::UnsupportedFeature("root object is not a group")),
    }
}

impl Loader<'_> {
    fn header(&self, address: u64) -> Result<ObjectHeader, FormatError> {
        ObjectHeader::parse(self.file, address as usize, self.offset_size, self.length_size)
    }

    /// Load the object at `address`; `None` for a link back to an ancestor.
    fn load(&mut self, address: u64) -> Result<Option<Node>, FormatError> {
        if self.ancestors.contains(&address) {
            return Ok(None);
        }
        let oh = self.header(address)?;
        if oh.find(MessageType::SymbolTable).is_some() {
            return Err(FormatError::UnsupportedFeature("symbol table groups"));
        }
        self.check_attribute_info(&oh)?;

        if oh.find(MessageType::LinkInfo).is_some() || oh.find(MessageType::Link).is_some() {
            self.ancestors.push(address);
            let group = self.load_group(&oh);
            self.ancestors.pop();
            return group.map(|g| Some(Node::Group(g)));
        }
        if oh.find(MessageType::DataLayout).is_some() {
            return self.load_dataset(&oh).map(|d| Some(Node::Dataset(d)));
        }
        if let Some(msg) = oh.find(MessageType::Datatype) {
            let (dtype, _) = Datatype::parse(&msg.data)?;
            return Ok(Some(Node::DataType(dtype)));
        }
        // an object header without messages is an empty group
        if oh.messages.is_empty() {
            return Ok(Some(Node::Group(GroupNode::new())));
        }
        Err(FormatError::UnsupportedFeature("unrecognized object type"))
    }

    fn check_attribute_info(&self, oh: &ObjectHeader) -> Result<(), FormatError> {
        let Some(msg) = oh.find(MessageType::AttributeInfo) else {
            return Ok(());
        };
        let flags = *msg.data.get(1).ok_or(FormatError::UnexpectedEof {
            expected: 2,
            available: msg.data.len(),
        })?;
        let pos = if flags & 0x01 != 0 { 4 } else { 2 };
        let heap = read_sized(&msg.data, pos, self.offset_size)?;
        if !is_undefined(heap, self.offset_size) {
            return Err(FormatError::UnsupportedFeature("dense attribute storage"));
        }
        Ok(())
    }

    fn load_group(&mut self, oh: &ObjectHeader) -> Result<GroupNode, FormatError> {
        if let Some(msg) = oh.find(MessageType::LinkInfo) {
            if LinkInfoMessage::parse(&msg.data, self.offset_size)?.is_dense() {
                return Err(FormatError::UnsupportedFeature("dense link storage"));
            }
        }
        let mut links = Vec::new();
        for msg in oh.messages_of(MessageType::Link) {
            links.push(LinkMessage::parse(&msg.data, self.offset_size)?);
        }
        if links.iter().any(|l| l.creation_order.is_some()) {
            links.sort_by_key(|l| l.creation_order);
        }

        let mut group = GroupNode::new();
        for link in links {
            let LinkTarget::Hard { address } = link.target else {
                continue;
            };
            if let Some(node) = self.load(address)? {
                group.insert(&link.name, node)?;
            }
        }
        group.attributes = self.load_attributes(oh)?;
        Ok(group)
    }

    fn load_attributes(&mut self, oh: &ObjectHeader) -> Result<Vec<AttributeNode>, FormatError> {
        let mut out = Vec::new();
        for msg in oh.messages_of(MessageType::Attribute) {
            let attr = AttributeMessage::parse(&msg.data, self.length_size)?;
            let dims = match attr.dataspace.space_type {
                DataspaceType::Null => continue,
                _ => attr.dataspace.dimensions.clone(),
            };
            let size = element_count(&dims) as usize * attr.datatype.type_size() as usize;
            ensure_len(&attr.raw_data, 0, size)?;
            let mut heap = VlenHeap::new();
            let data = self.to_memory_form(&attr.datatype, attr.raw_data[..size].to_vec(), &mut heap)?;
            out.push(AttributeNode {
                name: attr.name,
                dtype: attr.datatype,
                dims,
                data,
                heap,
            });
        }
        Ok(out)
    }

    fn load_dataset(&mut self, oh: &ObjectHeader) -> Result<DatasetNode, FormatError> {
        if oh.find(MessageType::FilterPipeline).is_some() {
            return Err(FormatError::UnsupportedFeature("filters"));
        }
        let dt_msg = oh
            .find(MessageType::Datatype)
            .ok_or(FormatError::UnsupportedFeature("dataset without datatype"))?;
        if dt_msg.flags & MSG_FLAG_SHARED != 0 {
            return Err(FormatError::UnsupportedFeature("shared datatype messages"));
        }
        let (dtype, _) = Datatype::parse(&dt_msg.data)?;
        let space = match oh.find(MessageType::Dataspace) {
            Some(msg) => Dataspace::parse(&msg.data, self.length_size)?,
            None => return Err(FormatError::UnsupportedFeature("dataset without dataspace")),
        };
        if space.space_type == DataspaceType::Null {
            return Err(FormatError::UnsupportedFeature("null dataspace"));
        }
        let layout_msg = oh
            .find(MessageType::DataLayout)
            .ok_or(FormatError::UnsupportedFeature("dataset without layout"))?;
        let layout = DataLayout::parse(&layout_msg.data, self.offset_size, self.length_size)?;

        let dims = space.dimensions.clone();
        let max_dims = space.max_dimensions.clone().unwrap_or_else(|| dims.clone());
        let es = dtype.type_size() as usize;
        let total = element_count(&dims) as usize * es;

        let (raw, chunk) = match layout {
            DataLayout::Compact { data } => {
                let mut raw = data;
                raw.resize(total, 0);
                (raw, None)
            }
            DataLayout::Contiguous { address, .. } => match address {
                Some(addr) if !is_undefined(addr, self.offset_size) && total > 0 => {
                    let pos = addr as usize;
                    ensure_len(self.file, pos, total)?;
                    (self.file[pos..pos + total].to_vec(), None)
                }
                _ => (vec![0u8; total], None),
            },
            DataLayout::Chunked {
                chunk_dimensions,
                btree_address,
            } => {
                let chunk: Vec<u64> = chunk_dimensions[..chunk_dimensions.len() - 1]
                    .iter()
                    .map(|&c| c as u64)
                    .collect();
                if chunk.len() != dims.len() {
                    return Err(FormatError::UnsupportedFeature("chunk rank differs from dataspace"));
                }
                let raw = match btree_address {
                    Some(addr) => self.assemble_chunks(addr, &dims, &chunk, es, chunk_dimensions.len())?,
                    None => vec![0u8; total],
                };
                (raw, Some(chunk))
            }
        };

        let mut heap = VlenHeap::new();
        let data = self.to_memory_form(&dtype, raw, &mut heap)?;
        Ok(DatasetNode {
            dtype,
            dims,
            max_dims,
            chunk,
            data,
            heap,
            attributes: self.load_attributes(oh)?,
        })
    }

    fn assemble_chunks(
        &self,
        btree_address: u64,
        dims: &[u64],
        chunk: &[u64],
        es: usize,
        dimensionality: usize,
    ) -> Result<Vec<u8>, FormatError> {
        let mut out = vec![0u8; element_count(dims) as usize * es];
        let chunk_bytes = element_count(chunk) as usize * es;
        let zero = vec![0u64; chunk.len()];
        for record in collect_chunks(self.file, btree_address, dimensionality, self.offset_size)? {
            if record.offsets.iter().zip(dims).any(|(o, d)| o >= d) {
                continue;
            }
            let pos = record.address as usize;
            ensure_len(self.file, pos, chunk_bytes)?;
            let count: Vec<u64> = record
                .offsets
                .iter()
                .zip(chunk)
                .zip(dims)
                .map(|((o, c), d)| (*c).min(d - o))
                .collect();
            copy_region(
                &self.file[pos..pos + chunk_bytes],
                chunk,
                &zero,
                &mut out,
                dims,
                &record.offsets,
                &count,
                es,
            );
        }
        Ok(out)
    }

    fn to_memory_form(
        &mut self,
        dtype: &Datatype,
        raw: Vec<u8>,
        heap: &mut VlenHeap,
    ) -> Result<Vec<u8>, FormatError> {
        if !dtype.contains_vlen() {
            return Ok(raw);
        }
        if self.offset_size != 8 {
            return Err(FormatError::UnsupportedFeature(
                "variable-length data with 4-byte addresses",
            ));
        }
        resolve_vlen(self.file, &mut self.heaps, self.length_size, dtype, raw, heap)
    }
}

/// Replace the global heap references of `raw` by in-memory slots.
fn resolve_vlen(
    file: &[u8],
    heaps: &mut GlobalHeapCache,
    length_size: u8,
    dtype: &Datatype,
    mut raw: Vec<u8>,
    heap: &mut VlenHeap,
) -> Result<Vec<u8>, FormatError> {
    let size = dtype.type_size() as usize;
    if size == 0 {
        return Ok(raw);
    }
    for element in raw.chunks_exact_mut(size) {
        visit_vlen_slots(dtype, element, &mut |vt, slot| {
            let (length, address, index) = read_heap_id(slot)?;
            if length == 0 || address == 0 {
                write_slot(slot, 0, EMPTY_VLEN);
                return Ok(());
            }
            let mut payload = heaps.get(file, address, index, length_size)?;
            let wanted = length as usize * payload_unit(vt);
            if payload.len() < wanted {
                return Err(FormatError::DataSizeMismatch {
                    expected: wanted,
                    actual: payload.len(),
                });
            }
            payload.truncate(wanted);
            if let Datatype::VariableLength {
                kind: VlenKind::Sequence,
                base_type,
            } = vt
            {
                if base_type.contains_vlen() {
                    payload = resolve_vlen(file, heaps, length_size, base_type, payload, heap)?;
                }
            }
            let at = heap.push(payload);
            write_slot(slot, length as u64, at);
            Ok(())
        })?;
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_writer::write_file;
    use crate::vl_data::{make_slot, slot_payload};

    #[test]
    fn missing_signature() {
        assert_eq!(read_file(&[0u8; 64]), Err(FormatError::SignatureNotFound));
    }

    #[test]
    fn nested_groups_keep_link_order() {
        let mut root = GroupNode::new();
        root.insert("b", Node::Group(GroupNode::new())).unwrap();
        let Node::Group(a) = root.insert("a", Node::Group(GroupNode::new())).unwrap() else {
            unreachable!()
        };
        a.insert("inner", Node::DataType(Datatype::native_i64())).unwrap();

        let back = read_file(&write_file(&root).unwrap()).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), ["b", "a"]);
        assert!(matches!(
            back.lookup("a/inner"),
            Some(Node::DataType(dt)) if *dt == Datatype::native_i64()
        ));
    }

    #[test]
    fn vlen_string_attribute() {
        let mut heap = VlenHeap::new();
        let slot = make_slot(&mut heap, 5, b"hello".to_vec());
        let mut root = GroupNode::new();
        root.set_attribute(
            AttributeNode::scalar("greeting", Datatype::variable_string(), &slot, &heap).unwrap(),
        );
        let back = read_file(&write_file(&root).unwrap()).unwrap();
        let attr = back.attribute("greeting").unwrap();
        assert!(attr.is_scalar());
        assert_eq!(slot_payload(&attr.heap, &attr.data).unwrap(), b"hello");
    }

    #[test]
    fn userblock_offset_is_honoured() {
        let mut root = GroupNode::new();
        root.insert("g", Node::Group(GroupNode::new())).unwrap();
        let mut file = vec![0u8; 512];
        file.extend_from_slice(&write_file(&root).unwrap());
        let back = read_file(&file).unwrap();
        assert!(back.contains("g"));
    }
}
