use h5composites_format::datatype::{CompoundMember, Datatype};
use h5composites_format::global_heap::MIN_COLLECTION_SIZE;
use h5composites_format::superblock::{find_signature, Superblock};
use h5composites_format::type_builders::{CompoundTypeBuilder, EnumTypeBuilder};
use h5composites_format::vl_data::{make_slot, read_slot, slot_payload, VlenHeap};
use h5composites_format::{
    read_file, write_file, AttributeNode, DatasetNode, FormatError, GroupNode, Node, UNLIMITED,
};

// ============================================================
// Helpers
// ============================================================

fn roundtrip(root: &GroupNode) -> GroupNode {
    let bytes = write_file(root).expect("write failed");
    read_file(&bytes).expect("read failed")
}

fn dataset<'a>(root: &'a GroupNode, path: &str) -> &'a DatasetNode {
    match root.lookup(path) {
        Some(Node::Dataset(d)) => d,
        other => panic!("{path} is not a dataset: {other:?}"),
    }
}

fn i32_bytes(values: impl IntoIterator<Item = i32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn event_type() -> Datatype {
    CompoundTypeBuilder::new()
        .field("run", Datatype::native_u32())
        .field("weight", Datatype::native_f64())
        .field("label", Datatype::variable_string())
        .field("hits", Datatype::vlen(Datatype::native_i16()))
        .build()
}

fn event(heap: &mut VlenHeap, run: u32, weight: f64, label: &str, hits: &[i16]) -> Vec<u8> {
    let mut out = run.to_le_bytes().to_vec();
    out.extend_from_slice(&weight.to_le_bytes());
    out.extend_from_slice(&make_slot(heap, label.len() as u64, label.as_bytes().to_vec()));
    let payload = hits.iter().flat_map(|h| h.to_le_bytes()).collect();
    out.extend_from_slice(&make_slot(heap, hits.len() as u64, payload));
    out
}

// ============================================================
// Layout
// ============================================================

#[test]
fn superblock_covers_whole_file() {
    let mut root = GroupNode::new();
    let mut ds = DatasetNode::new(Datatype::native_i32(), vec![4], None, None).unwrap();
    ds.data = i32_bytes([1, 2, 3, 4]);
    root.insert("values", Node::Dataset(ds)).unwrap();

    let bytes = write_file(&root).unwrap();
    let sb = Superblock::parse(&bytes, find_signature(&bytes).unwrap()).unwrap();
    assert_eq!(sb.version, 3);
    assert_eq!(sb.eof_address, bytes.len() as u64);
}

#[test]
fn corrupted_header_is_rejected() {
    let mut root = GroupNode::new();
    root.insert("g", Node::Group(GroupNode::new())).unwrap();
    let mut bytes = write_file(&root).unwrap();
    // chunk size of the root object header
    bytes[48 + 6] ^= 0xFF;
    assert!(matches!(
        read_file(&bytes),
        Err(FormatError::ChecksumMismatch { .. }) | Err(FormatError::UnexpectedEof { .. })
    ));
}

// ============================================================
// Datasets
// ============================================================

#[test]
fn contiguous_and_scalar_datasets() {
    let mut root = GroupNode::new();
    let mut matrix = DatasetNode::new(Datatype::native_i32(), vec![2, 3], None, None).unwrap();
    matrix.data = i32_bytes(0..6);
    root.insert("matrix", Node::Dataset(matrix)).unwrap();

    let mut scalar = DatasetNode::new(Datatype::native_f64(), Vec::new(), None, None).unwrap();
    scalar.data = 2.5f64.to_le_bytes().to_vec();
    root.insert("scalar", Node::Dataset(scalar)).unwrap();

    let empty = DatasetNode::new(Datatype::native_u8(), vec![0], None, None).unwrap();
    root.insert("empty", Node::Dataset(empty)).unwrap();

    let back = roundtrip(&root);
    assert_eq!(dataset(&back, "matrix").dims, [2, 3]);
    assert_eq!(dataset(&back, "matrix").data, i32_bytes(0..6));
    assert!(dataset(&back, "scalar").is_scalar());
    assert_eq!(dataset(&back, "scalar").data, 2.5f64.to_le_bytes());
    assert_eq!(dataset(&back, "empty").num_elements(), 0);
}

#[test]
fn chunked_2d_with_partial_edge_chunks() {
    let mut root = GroupNode::new();
    let mut ds = DatasetNode::new(
        Datatype::native_i32(),
        vec![5, 7],
        Some(vec![UNLIMITED, 7]),
        Some(vec![2, 3]),
    )
    .unwrap();
    ds.data = i32_bytes(0..35);
    root.insert("grid", Node::Dataset(ds)).unwrap();

    let back = roundtrip(&root);
    let grid = dataset(&back, "grid");
    assert_eq!(grid.dims, [5, 7]);
    assert_eq!(grid.max_dims, [UNLIMITED, 7]);
    assert_eq!(grid.chunk.as_deref(), Some(&[2u64, 3][..]));
    assert_eq!(grid.data, i32_bytes(0..35));
}

#[test]
fn extendible_dataset_with_no_rows() {
    let mut root = GroupNode::new();
    let ds = DatasetNode::new(
        Datatype::native_u64(),
        vec![0],
        Some(vec![UNLIMITED]),
        Some(vec![1024]),
    )
    .unwrap();
    root.insert("rows", Node::Dataset(ds)).unwrap();

    let mut back = roundtrip(&root);
    let Some(Node::Dataset(rows)) = back.get_mut("rows") else {
        panic!("rows missing");
    };
    assert_eq!(rows.num_elements(), 0);
    rows.resize(&[3]).unwrap();
    rows.write_hyperslab(&[1], &[2], &[7u64, 8].map(u64::to_le_bytes).concat(), &VlenHeap::new())
        .unwrap();

    let again = roundtrip(&back);
    let rows = dataset(&again, "rows");
    assert_eq!(rows.data, [0u64, 7, 8].map(u64::to_le_bytes).concat());
}

#[test]
fn many_chunks_need_an_internal_btree_level() {
    let mut root = GroupNode::new();
    let n = 300u64;
    let mut ds = DatasetNode::new(
        Datatype::native_i32(),
        vec![n],
        Some(vec![UNLIMITED]),
        Some(vec![2]),
    )
    .unwrap();
    ds.data = i32_bytes(0..n as i32);
    root.insert("long", Node::Dataset(ds)).unwrap();

    let back = roundtrip(&root);
    assert_eq!(dataset(&back, "long").data, i32_bytes(0..n as i32));
}

// ============================================================
// Variable-length data
// ============================================================

#[test]
fn compound_rows_with_strings_and_sequences() {
    let dtype = event_type();
    let mut heap = VlenHeap::new();
    let mut data = event(&mut heap, 1, 0.5, "first", &[3, -4, 5]);
    data.extend(event(&mut heap, 2, 1.5, "", &[]));
    data.extend(event(&mut heap, 3, -2.0, "third one", &[i16::MAX]));

    let mut root = GroupNode::new();
    let mut ds = DatasetNode::new(dtype.clone(), vec![3], Some(vec![UNLIMITED]), Some(vec![2])).unwrap();
    ds.data = data;
    ds.heap = heap;
    root.insert("events", Node::Dataset(ds)).unwrap();

    let back = roundtrip(&root);
    let events = dataset(&back, "events");
    assert_eq!(events.dtype, dtype);
    let size = dtype.type_size() as usize;
    let rows: Vec<_> = events.data.chunks(size).collect();

    assert_eq!(&rows[0][..4], &1u32.to_le_bytes());
    assert_eq!(slot_payload(&events.heap, &rows[0][12..28]).unwrap(), b"first");
    assert_eq!(
        slot_payload(&events.heap, &rows[0][28..44]).unwrap(),
        [3i16, -4, 5].map(i16::to_le_bytes).concat()
    );
    assert_eq!(read_slot(&rows[1][12..28]).unwrap().0, 0);
    assert_eq!(read_slot(&rows[1][28..44]).unwrap().0, 0);
    assert_eq!(slot_payload(&events.heap, &rows[2][12..28]).unwrap(), b"third one");
}

#[test]
fn strings_spill_over_several_heap_collections() {
    let mut heap = VlenHeap::new();
    let words: Vec<String> = (0..400).map(|i| format!("entry number {i:04}")).collect();
    let data: Vec<u8> = words
        .iter()
        .flat_map(|w| make_slot(&mut heap, w.len() as u64, w.as_bytes().to_vec()))
        .collect();
    let mut root = GroupNode::new();
    let mut ds = DatasetNode::new(Datatype::variable_string(), vec![400], None, None).unwrap();
    ds.data = data;
    ds.heap = heap;
    root.insert("words", Node::Dataset(ds)).unwrap();

    let bytes = write_file(&root).unwrap();
    assert!(bytes.len() > 2 * MIN_COLLECTION_SIZE);
    let back = read_file(&bytes).unwrap();
    let words_back = dataset(&back, "words");
    for (i, slot) in words_back.data.chunks(16).enumerate() {
        assert_eq!(slot_payload(&words_back.heap, slot).unwrap(), words[i].as_bytes());
    }
}

#[test]
fn sequences_of_strings() {
    let dtype = Datatype::vlen(Datatype::variable_string());
    let mut heap = VlenHeap::new();
    let a = make_slot(&mut heap, 2, b"ab".to_vec());
    let b = make_slot(&mut heap, 1, b"c".to_vec());
    let outer = make_slot(&mut heap, 2, [a, b].concat());

    let mut root = GroupNode::new();
    root.set_attribute(AttributeNode::scalar("names", dtype, &outer, &heap).unwrap());
    let back = roundtrip(&root);
    let attr = back.attribute("names").unwrap();
    let inner = slot_payload(&attr.heap, &attr.data).unwrap();
    assert_eq!(slot_payload(&attr.heap, &inner[..16]).unwrap(), b"ab");
    assert_eq!(slot_payload(&attr.heap, &inner[16..]).unwrap(), b"c");
}

// ============================================================
// Attributes and committed types
// ============================================================

#[test]
fn attributes_on_every_object_kind() {
    let flag = EnumTypeBuilder::new(Datatype::native_u16())
        .value("Off", 0)
        .value("On", 1)
        .build();

    let mut root = GroupNode::new();
    root.set_attribute(
        AttributeNode::new("shape", Datatype::native_i32(), vec![3], &i32_bytes([4, 5, 6]), &VlenHeap::new())
            .unwrap(),
    );
    let mut ds = DatasetNode::new(Datatype::native_u8(), vec![1], None, None).unwrap();
    ds.set_attribute(AttributeNode::scalar("state", flag.clone(), &1u16.to_le_bytes(), &VlenHeap::new()).unwrap());
    root.insert("ds", Node::Dataset(ds)).unwrap();
    root.insert("Flag", Node::DataType(flag.clone())).unwrap();

    let back = roundtrip(&root);
    let shape = back.attribute("shape").unwrap();
    assert_eq!(shape.dims, [3]);
    assert_eq!(shape.data, i32_bytes([4, 5, 6]));
    let state = dataset(&back, "ds").attribute("state").unwrap();
    assert_eq!(state.dtype, flag);
    assert_eq!(state.data, 1u16.to_le_bytes());
    assert!(matches!(back.get("Flag"), Some(Node::DataType(t)) if *t == flag));
}

#[test]
fn nested_arrays_in_compounds_survive() {
    let inner = CompoundTypeBuilder::new()
        .field("x", Datatype::native_f32())
        .field("y", Datatype::native_f32())
        .build();
    let dtype = Datatype::Compound {
        size: 2 + 3 * 8,
        members: vec![
            CompoundMember {
                name: "tag".into(),
                byte_offset: 0,
                datatype: Datatype::fixed_string(2),
            },
            CompoundMember {
                name: "points".into(),
                byte_offset: 2,
                datatype: Datatype::array(inner, &[3]),
            },
        ],
    };
    let mut root = GroupNode::new();
    let mut ds = DatasetNode::new(dtype.clone(), vec![2], None, None).unwrap();
    ds.data = (0..ds.data.len()).map(|i| i as u8).collect();
    let expected = ds.data.clone();
    root.insert("shapes", Node::Dataset(ds)).unwrap();

    let back = roundtrip(&root);
    assert_eq!(dataset(&back, "shapes").dtype, dtype);
    assert_eq!(dataset(&back, "shapes").data, expected);
}
