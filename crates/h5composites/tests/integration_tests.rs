//! End-to-end tests: files written, closed, reopened and merged.

use h5composites::conversion::{check, ConversionCriteria};
use h5composites::file_merger::{FileMerger, MergeSettings};
use h5composites::printing::display;
use h5composites::{
    to_buffer, DType, DTypeExt, FLString, FLVector, GroupWrapper, H5File, Plus, Reader,
    StaticH5DType, TypeRegister, TypedReader, TypedWriter, Writer,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_run(path: &std::path::Path, run: u32, energies: &[f32]) {
    let mut register = TypeRegister::new();
    h5composites::MergeFactory::with_defaults(&mut register).unwrap();
    let out = GroupWrapper::create_file(path, false, &mut register).unwrap();
    out.write_scalar_with_id("n_events", &Plus(energies.len() as u64), &register)
        .unwrap();
    out.write_scalar("detector", "ATLAS").unwrap();
    let events = out.create_group("events").unwrap();
    let mut writer = events
        .make_dataset_writer::<(u32, f32)>("hits", 2)
        .unwrap();
    for (i, e) in energies.iter().enumerate() {
        writer.write(&(run * 100 + i as u32, *e)).unwrap();
    }
    writer.flush().unwrap();
    writer.writer().set_index("run").unwrap();
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[test]
fn objects_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("objects.h5");
    {
        let file = H5File::create(&path, false).unwrap();
        let root = file.root();
        let grid = root.create_group("grid").unwrap();
        let ds = grid
            .create_dataset("cells", DType::native_i16(), vec![2, 3], None, None)
            .unwrap();
        let values: Vec<u8> = (1i16..=6).flat_map(|v| v.to_le_bytes()).collect();
        ds.write_hyperslab(&[0, 0], &[2, 3], &values, &h5composites_format::VlenHeap::new())
            .unwrap();
        ds.set_attribute("unit", &to_buffer("mm").unwrap().view()).unwrap();
        root.set_attribute("version", &to_buffer(&3u8).unwrap().view())
            .unwrap();
        root.commit_dtype("Cell", DType::native_i16()).unwrap();
    }

    let file = H5File::open(&path, false).unwrap();
    assert!(!file.is_writable());
    let root = file.root();
    assert_eq!(root.names().unwrap(), ["grid", "Cell"]);
    assert_eq!(root.attribute("version").unwrap().read::<u8>().unwrap(), 3);
    assert_eq!(root.dtype_named("Cell").unwrap().dtype().unwrap(), DType::native_i16());
    let cells = root.group("grid").unwrap().dataset("cells").unwrap();
    assert_eq!(cells.dims().unwrap(), [2, 3]);
    assert_eq!(cells.attribute("unit").unwrap().read::<String>().unwrap(), "mm");
    let rows: Vec<[i16; 3]> = TypedReader::new(&cells, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, [[1, 2, 3], [4, 5, 6]]);
    assert!(root.create_group("new").is_err());
}

#[test]
fn long_datasets_stream_through_caches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.h5");
    {
        let file = H5File::create(&path, false).unwrap();
        let mut writer = Writer::new(&file.root(), "values", DType::native_f64()).unwrap();
        writer.write_all((0..5000).map(|i| i as f64 * 0.5)).unwrap();
        let mut names = TypedWriter::<String>::with_cache_size(&file.root(), "names", 64).unwrap();
        for i in 0..100 {
            names.write(&format!("name{i}")).unwrap();
        }
    }
    let file = H5File::open(&path, false).unwrap();
    let values = file.root().dataset("values").unwrap();
    assert_eq!(values.dims().unwrap(), [5000]);
    let mut reader = Reader::new(&values, Some(333)).unwrap();
    reader.seek(4999).unwrap();
    assert_eq!(reader.read_into::<f64>().unwrap(), Some(2499.5));
    reader.seek(10).unwrap();
    assert_eq!(reader.read_n::<f32>(3).unwrap(), [5.0, 5.5, 6.0]);

    let names: Vec<String> = TypedReader::new(&file.root().dataset("names").unwrap(), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names.len(), 100);
    assert_eq!(names[42], "name42");
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[test]
fn conversion_checks_report_every_problem() {
    let src = <(u64, [u8; 3], String)>::static_h5_dtype();
    let tgt = h5composites::dtype::packed_compound([
        ("element0", DType::native_u8()),
        ("element2", DType::native_i32()),
    ]);
    let err = check(&src, &tgt, &ConversionCriteria::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Impossible conversions:"), "{message}");
    assert!(message.contains("Discarded compound data members:\n\telement1"), "{message}");
    assert!(check(&DType::native_u8(), &DType::native_i16(), &ConversionCriteria::default()).is_ok());
    assert_eq!(display(&DType::native_u8()).to_string(), "u8");
}

#[test]
fn fixed_length_values_size_by_content() {
    let names = FLVector(vec![FLString::from("a"), FLString::from("abc")]);
    let buffer = to_buffer(&names).unwrap();
    assert_eq!(buffer.dtype(), &DType::array(DType::fixed_string(3), &[2]));
    assert_eq!(buffer.dtype().size(), 6);
    let back: Vec<String> = buffer.view().read().unwrap();
    assert_eq!(back, ["a", "abc"]);
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[test]
fn runs_merge_into_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("run1.h5");
    let b = dir.path().join("run2.h5");
    write_run(&a, 1, &[1.0, 2.0, 3.0]);
    write_run(&b, 2, &[4.0, 5.0]);
    let out = dir.path().join("merged.h5");
    FileMerger::new(&out, &[&a, &b], false)
        .unwrap()
        .with_buffer_size(16)
        .merge(&MergeSettings::default())
        .unwrap();

    let merged = GroupWrapper::read_file(&out, false).unwrap();
    assert_eq!(merged.read_scalar::<u64>("n_events").unwrap(), 5);
    assert_eq!(merged.read_scalar::<String>("detector").unwrap(), "ATLAS");
    let hits = merged.group().group("events").unwrap().dataset("hits").unwrap();
    assert_eq!(hits.dims().unwrap(), [5]);
    assert_eq!(hits.attribute("index").unwrap().read::<String>().unwrap(), "run");
    let rows: Vec<(u32, f32)> = TypedReader::new(&hits, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        rows,
        [(100, 1.0), (101, 2.0), (102, 3.0), (200, 4.0), (201, 5.0)]
    );

    // Merging the merged file with a run adds up again.
    let again = dir.path().join("again.h5");
    FileMerger::new(&again, &[&out, &a], false)
        .unwrap()
        .merge(&MergeSettings::default())
        .unwrap();
    let again = GroupWrapper::read_file(&again, false).unwrap();
    assert_eq!(again.read_scalar::<u64>("n_events").unwrap(), 8);
}
