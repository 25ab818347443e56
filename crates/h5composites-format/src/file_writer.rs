//! Serialize an in-memory object tree into HDF5 file bytes.
//!
//! File layout: superblock v3, every object header in preorder, the global
//! heap collections holding variable-length data, then raw data blocks (a
//! contiguous dataset's bytes, or a chunk B-tree followed by the chunks).
//! No message size depends on an address, so the file is built twice: once
//! to measure every block and once with the final addresses.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::attribute::AttributeMessage;
use crate::btree_v1::{build_chunk_btree, chunk_btree_size, ChunkRecord};
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, VlenKind};
use crate::error::FormatError;
use crate::global_heap::{write_heap_id, GlobalHeapWriter};
use crate::link_message::{LinkInfoMessage, LinkMessage};
use crate::message_type::MessageType;
use crate::object_header_writer::{ObjectHeaderWriter, MSG_FLAG_CONSTANT};
use crate::superblock::{Superblock, SUPERBLOCK_V3_SIZE};
use crate::tree::{copy_region, element_count, AttributeNode, DatasetNode, GroupNode, Node};
use crate::vl_data::{is_empty_slot, read_slot, visit_vlen_slots, VlenHeap};

/// Fill value message v3: fill written if set, late space allocation.
const FILL_VALUE_CONTIGUOUS: [u8; 2] = [3, 0x0a];
/// Fill value message v3: fill written if set, incremental allocation.
const FILL_VALUE_CHUNKED: [u8; 2] = [3, 0x0b];
/// Group info message v0 with no optional fields.
const GROUP_INFO: [u8; 2] = [0, 0];

enum ObjRef<'a> {
    Group(&'a GroupNode),
    Dataset(&'a DatasetNode),
    DataType(&'a Datatype),
}

struct Obj<'a> {
    kind: ObjRef<'a>,
    /// Link name and object index of each child (groups only).
    links: Vec<(&'a str, usize)>,
}

/// Addresses of every block; all zero during the measuring pass.
#[derive(Default)]
struct Placement {
    headers: Vec<u64>,
    heaps: Vec<u64>,
    raw: Vec<u64>,
}

struct Emitted {
    headers: Vec<Vec<u8>>,
    heap: GlobalHeapWriter,
    raw: Vec<Vec<u8>>,
}

fn flatten<'a>(group: &'a GroupNode, out: &mut Vec<Obj<'a>>) -> usize {
    let me = out.len();
    out.push(Obj {
        kind: ObjRef::Group(group),
        links: Vec::new(),
    });
    let mut links = Vec::with_capacity(group.links.len());
    for (name, node) in &group.links {
        let index = match node {
            Node::Group(g) => flatten(g, out),
            Node::Dataset(d) => {
                out.push(Obj {
                    kind: ObjRef::Dataset(d),
                    links: Vec::new(),
                });
                out.len() - 1
            }
            Node::DataType(t) => {
                out.push(Obj {
                    kind: ObjRef::DataType(t),
                    links: Vec::new(),
                });
                out.len() - 1
            }
        };
        links.push((name.as_str(), index));
    }
    out[me].links = links;
    me
}

/// Convert in-memory vlen slots of `data` into global heap references.
fn to_file_form(
    dtype: &Datatype,
    data: &[u8],
    heap: &VlenHeap,
    out: &mut GlobalHeapWriter,
    heap_addrs: &[u64],
) -> Result<Vec<u8>, FormatError> {
    let mut bytes = data.to_vec();
    if !dtype.contains_vlen() {
        return Ok(bytes);
    }
    let size = dtype.type_size() as usize;
    for element in bytes.chunks_exact_mut(size) {
        visit_vlen_slots(dtype, element, &mut |vt, slot| {
            let (count, index) = read_slot(slot)?;
            if is_empty_slot(count, index) {
                slot.copy_from_slice(&write_heap_id(0, 0, 0));
                return Ok(());
            }
            let length = u32::try_from(count)
                .map_err(|_| FormatError::UnsupportedFeature("variable-length values over 4G elements"))?;
            let payload = heap.get(index)?;
            let payload = match vt {
                Datatype::VariableLength {
                    kind: VlenKind::Sequence,
                    base_type,
                } => to_file_form(base_type, payload, heap, out, heap_addrs)?,
                _ => payload.to_vec(),
            };
            let at = out.insert(payload);
            let addr = heap_addrs.get(at.collection).copied().unwrap_or(0);
            slot.copy_from_slice(&write_heap_id(length, addr, at.index as u32));
            Ok(())
        })?;
    }
    Ok(bytes)
}

fn dataspace_of(dims: &[u64], max_dims: &[u64]) -> Dataspace {
    if dims.is_empty() {
        Dataspace::scalar()
    } else if dims == max_dims {
        Dataspace::simple(dims, None)
    } else {
        Dataspace::simple(dims, Some(max_dims))
    }
}

fn add_attributes(
    writer: &mut ObjectHeaderWriter,
    attributes: &[AttributeNode],
    heap: &mut GlobalHeapWriter,
    place: &Placement,
) -> Result<(), FormatError> {
    for attr in attributes {
        let msg = AttributeMessage {
            name: attr.name.clone(),
            datatype: attr.dtype.clone(),
            dataspace: dataspace_of(&attr.dims, &attr.dims),
            raw_data: to_file_form(&attr.dtype, &attr.data, &attr.heap, heap, &place.heaps)?,
        };
        writer.add_message(MessageType::Attribute, msg.serialize())?;
    }
    Ok(())
}

/// Raw block and layout message of one dataset.
fn dataset_storage(
    ds: &DatasetNode,
    heap: &mut GlobalHeapWriter,
    place: &Placement,
    raw_address: u64,
) -> Result<(DataLayout, Vec<u8>), FormatError> {
    let file_data = to_file_form(&ds.dtype, &ds.data, &ds.heap, heap, &place.heaps)?;
    let es = ds.element_size();

    let chunk = match &ds.chunk {
        Some(c) if !ds.dims.is_empty() => c,
        _ => {
            let address = (!file_data.is_empty()).then_some(raw_address);
            let layout = DataLayout::Contiguous {
                address,
                size: file_data.len() as u64,
            };
            return Ok((layout, file_data));
        }
    };

    let mut chunk_dimensions: Vec<u32> = chunk.iter().map(|&c| c as u32).collect();
    chunk_dimensions.push(es as u32);
    if ds.num_elements() == 0 {
        let layout = DataLayout::Chunked {
            chunk_dimensions,
            btree_address: None,
        };
        return Ok((layout, Vec::new()));
    }

    let grid: Vec<u64> = ds.dims.iter().zip(chunk).map(|(d, c)| d.div_ceil(*c)).collect();
    let n_chunks = element_count(&grid) as usize;
    let chunk_bytes = element_count(chunk) as usize * es;
    let tree_size = chunk_btree_size(n_chunks, chunk.len());

    let mut records = Vec::with_capacity(n_chunks);
    let mut chunk_data = Vec::with_capacity(n_chunks * chunk_bytes);
    let zero = vec![0u64; chunk.len()];
    let mut idx = vec![0u64; grid.len()];
    for n in 0..n_chunks {
        let offsets: Vec<u64> = idx.iter().zip(chunk).map(|(i, c)| i * c).collect();
        let count: Vec<u64> = offsets
            .iter()
            .zip(chunk)
            .zip(&ds.dims)
            .map(|((o, c), d)| (*c).min(d - o))
            .collect();
        let start = chunk_data.len();
        chunk_data.resize(start + chunk_bytes, 0);
        copy_region(
            &file_data,
            &ds.dims,
            &offsets,
            &mut chunk_data[start..],
            chunk,
            &zero,
            &count,
            es,
        );
        records.push(ChunkRecord {
            offsets,
            size: chunk_bytes as u32,
            address: raw_address + (tree_size + n * chunk_bytes) as u64,
        });
        for k in (0..idx.len()).rev() {
            idx[k] += 1;
            if idx[k] < grid[k] {
                break;
            }
            idx[k] = 0;
        }
    }

    let mut block = build_chunk_btree(&records, chunk, raw_address);
    block.extend_from_slice(&chunk_data);
    let layout = DataLayout::Chunked {
        chunk_dimensions,
        btree_address: Some(raw_address),
    };
    Ok((layout, block))
}

fn emit(objects: &[Obj<'_>], place: &Placement) -> Result<Emitted, FormatError> {
    let mut heap = GlobalHeapWriter::new();
    let mut headers = Vec::with_capacity(objects.len());
    let mut raw = Vec::new();

    for obj in objects {
        let mut writer = ObjectHeaderWriter::new();
        match obj.kind {
            ObjRef::Group(group) => {
                writer.add_message(MessageType::LinkInfo, LinkInfoMessage::compact().serialize())?;
                writer.add_message(MessageType::GroupInfo, GROUP_INFO.to_vec())?;
                for (name, index) in &obj.links {
                    let address = place.headers.get(*index).copied().unwrap_or(0);
                    writer.add_message(MessageType::Link, LinkMessage::hard(name, address).serialize())?;
                }
                add_attributes(&mut writer, &group.attributes, &mut heap, place)?;
            }
            ObjRef::Dataset(ds) => {
                let raw_address = place.raw.get(raw.len()).copied().unwrap_or(0);
                let (layout, block) = dataset_storage(ds, &mut heap, place, raw_address)?;
                let fill = if matches!(layout, DataLayout::Chunked { .. }) {
                    FILL_VALUE_CHUNKED
                } else {
                    FILL_VALUE_CONTIGUOUS
                };
                writer.add_message(MessageType::Dataspace, dataspace_of(&ds.dims, &ds.max_dims).serialize())?;
                writer.add_message_with_flags(
                    MessageType::Datatype,
                    ds.dtype.serialize(),
                    MSG_FLAG_CONSTANT,
                )?;
                writer.add_message_with_flags(MessageType::FillValue, fill.to_vec(), MSG_FLAG_CONSTANT)?;
                writer.add_message(MessageType::DataLayout, layout.serialize())?;
                add_attributes(&mut writer, &ds.attributes, &mut heap, place)?;
                raw.push(block);
            }
            ObjRef::DataType(dtype) => {
                writer.add_message_with_flags(MessageType::Datatype, dtype.serialize(), MSG_FLAG_CONSTANT)?;
            }
        }
        headers.push(writer.serialize());
    }

    Ok(Emitted { headers, heap, raw })
}

/// Serialize `root` and everything below it into a complete HDF5 file.
pub fn write_file(root: &GroupNode) -> Result<Vec<u8>, FormatError> {
    let mut objects = Vec::new();
    flatten(root, &mut objects);

    let measured = emit(&objects, &Placement::default())?;

    let mut addr = SUPERBLOCK_V3_SIZE as u64;
    let mut headers = Vec::with_capacity(measured.headers.len());
    for h in &measured.headers {
        headers.push(addr);
        addr += h.len() as u64;
    }
    let heaps = measured.heap.addresses(addr);
    addr += measured.heap.total_size();
    let mut raw = Vec::with_capacity(measured.raw.len());
    for block in &measured.raw {
        raw.push(addr);
        addr += block.len() as u64;
    }
    let eof = addr;

    let place = Placement { headers, heaps, raw };
    let final_pass = emit(&objects, &place)?;

    let mut out = Superblock::new_v3(place.headers[0], eof).serialize();
    for (h, expected) in final_pass.headers.iter().zip(&measured.headers) {
        if h.len() != expected.len() {
            return Err(FormatError::DataSizeMismatch {
                expected: expected.len(),
                actual: h.len(),
            });
        }
        out.extend_from_slice(h);
    }
    out.extend_from_slice(&final_pass.heap.serialize());
    for block in &final_pass.raw {
        out.extend_from_slice(block);
    }
    if out.len() as u64 != eof {
        return Err(FormatError::DataSizeMismatch {
            expected: eof as usize,
            actual: out.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_header::ObjectHeader;
    use crate::superblock::{find_signature, Superblock};

    #[test]
    fn empty_root_group() {
        let bytes = write_file(&GroupNode::new()).unwrap();
        assert_eq!(find_signature(&bytes), Ok(0));
        let sb = Superblock::parse(&bytes, 0).unwrap();
        assert_eq!(sb.root_group_address, SUPERBLOCK_V3_SIZE as u64);
        assert_eq!(sb.eof_address, bytes.len() as u64);
        let oh = ObjectHeader::parse(&bytes, sb.root_group_address as usize, 8, 8).unwrap();
        assert!(oh.find(MessageType::LinkInfo).is_some());
        assert!(oh.find(MessageType::Link).is_none());
    }

    #[test]
    fn links_point_at_child_headers() {
        let mut root = GroupNode::new();
        root.insert("sub", Node::Group(GroupNode::new())).unwrap();
        root.insert("t", Node::DataType(Datatype::native_f32())).unwrap();
        let bytes = write_file(&root).unwrap();
        let sb = Superblock::parse(&bytes, 0).unwrap();
        let oh = ObjectHeader::parse(&bytes, sb.root_group_address as usize, 8, 8).unwrap();
        let links: Vec<_> = oh
            .messages_of(MessageType::Link)
            .map(|m| LinkMessage::parse(&m.data, 8).unwrap())
            .collect();
        assert_eq!(links.len(), 2);
        let crate::link_message::LinkTarget::Hard { address } = links[1].target else {
            panic!("expected hard link");
        };
        let committed = ObjectHeader::parse(&bytes, address as usize, 8, 8).unwrap();
        let dt = committed.find(MessageType::Datatype).unwrap();
        assert_eq!(Datatype::parse(&dt.data).unwrap().0, Datatype::native_f32());
    }

    #[test]
    fn chunked_dataset_layout_message() {
        let mut root = GroupNode::new();
        let mut ds = DatasetNode::new(
            Datatype::native_u16(),
            vec![5],
            Some(vec![crate::dataspace::UNLIMITED]),
            Some(vec![2]),
        )
        .unwrap();
        ds.data = (0u16..5).flat_map(|v| v.to_le_bytes()).collect();
        root.insert("d", Node::Dataset(ds)).unwrap();
        let bytes = write_file(&root).unwrap();
        let sb = Superblock::parse(&bytes, 0).unwrap();
        let root_oh = ObjectHeader::parse(&bytes, sb.root_group_address as usize, 8, 8).unwrap();
        let link = LinkMessage::parse(&root_oh.find(MessageType::Link).unwrap().data, 8).unwrap();
        let crate::link_message::LinkTarget::Hard { address } = link.target else {
            panic!("expected hard link");
        };
        let oh = ObjectHeader::parse(&bytes, address as usize, 8, 8).unwrap();
        let layout = DataLayout::parse(&oh.find(MessageType::DataLayout).unwrap().data, 8, 8).unwrap();
        match layout {
            DataLayout::Chunked {
                chunk_dimensions,
                btree_address,
            } => {
                assert_eq!(chunk_dimensions, [2, 2]);
                let chunks =
                    crate::btree_v1::collect_chunks(&bytes, btree_address.unwrap(), 2, 8).unwrap();
                assert_eq!(chunks.len(), 3);
                assert_eq!(chunks[2].offsets, [4]);
            }
            other => panic!("expected chunked layout, got {other:?}"),
        }
    }
}
