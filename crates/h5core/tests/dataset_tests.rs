//! End-to-end dataset tests: every storage layout written, closed,
//! reopened and read back through a private library instance, plus the
//! extent, fill and handle-sharing rules and the rejected configurations.

use std::path::Path;

use h5core::{
    AllocTime, DatasetAccessProps, DatasetCreateProps, Dataspace, Datatype, Endian, ErrorKind,
    File, FileAccessProps, FileLocking, FillTime, IndexKind, LayoutKind, Library, LibraryConfig,
    OpenMode, Selection, VirtualMapping, SAME_FILE, UNLIMITED,
};

fn lib() -> Library {
    Library::new(LibraryConfig::new().file_locking(FileLocking::BestEffort))
}

fn i32le() -> Datatype {
    Datatype::integer(4, true, Endian::Little)
}

fn create(lib: &Library, path: &Path) -> File {
    lib.create_file(path, &FileAccessProps::default()).unwrap()
}

fn reopen(lib: &Library, path: &Path, mode: OpenMode) -> File {
    lib.open_file(path, mode, &FileAccessProps::default()).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Contiguous storage
// ---------------------------------------------------------------------------

#[test]
fn contiguous_roundtrip_through_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contig.h5");
    let lib = lib();
    let data: Vec<i32> = (0..10).collect();

    let file = create(&lib, &path);
    let ds = file
        .create_dataset("/a", &i32le(), &Dataspace::simple(&[10]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(ds.storage_size().unwrap(), 0);
    ds.write(&data).unwrap();
    assert_eq!(ds.storage_size().unwrap(), 40);
    ds.close().unwrap();
    file.close().unwrap();
    assert_eq!(lib.open_files(), 0);

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    assert_eq!(file.dataset_names(), vec!["a".to_string()]);
    let ds = file.open_dataset("a").unwrap();
    assert_eq!(ds.layout_kind().unwrap(), LayoutKind::Contiguous);
    assert_eq!(ds.shape().unwrap(), vec![10]);
    assert_eq!(ds.datatype().unwrap(), i32le());
    assert_eq!(ds.read::<i32>().unwrap(), data);
}

#[test]
fn partial_writes_and_selections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset("grid", &i32le(), &Dataspace::simple(&[4, 6]), &DatasetCreateProps::default())
        .unwrap();

    ds.write_selection(&Selection::block(&[1, 2], &[2, 3]), &[1, 2, 3, 4, 5, 6])
        .unwrap();
    let all = ds.read::<i32>().unwrap();
    let mut expected = vec![0; 24];
    expected[8..11].copy_from_slice(&[1, 2, 3]);
    expected[14..17].copy_from_slice(&[4, 5, 6]);
    assert_eq!(all, expected);

    let points = Selection::Points(vec![vec![2, 4], vec![0, 0], vec![1, 2]]);
    assert_eq!(ds.read_selection::<i32>(&points).unwrap(), vec![6, 0, 1]);
}

#[test]
fn values_convert_between_memory_and_file_types() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("convert.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "be",
            &Datatype::integer(2, true, Endian::Big),
            &Dataspace::simple(&[3]),
            &DatasetCreateProps::default(),
        )
        .unwrap();
    ds.write(&[1i32, -2, 300]).unwrap();
    assert_eq!(ds.read::<i64>().unwrap(), vec![1, -2, 300]);
    assert_eq!(ds.read::<f64>().unwrap(), vec![1.0, -2.0, 300.0]);
}

#[test]
fn scalar_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scalar.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "pi",
            &Datatype::float64(Endian::Little),
            &Dataspace::scalar(),
            &DatasetCreateProps::default(),
        )
        .unwrap();
    ds.write(&[3.25f64]).unwrap();
    assert_eq!(ds.read_scalar::<f64>().unwrap(), 3.25);
    assert_eq!(ds.shape().unwrap(), Vec::<u64>::new());
}

// ---------------------------------------------------------------------------
// 2. Chunked storage and filters
// ---------------------------------------------------------------------------

#[test]
fn chunked_identity_filter_stores_every_chunk_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunked.h5");
    let lib = lib();
    let data: Vec<i32> = (0..16).collect();

    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new().chunk(&[2, 2]).identity_filter();
    let ds = file
        .create_dataset("/b", &i32le(), &Dataspace::simple(&[4, 4]), &dcpl)
        .unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 0);
    ds.write(&data).unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 4);
    for coord in [[0, 0], [0, 2], [2, 0], [3, 3]] {
        let rec = ds.chunk_info(&coord).unwrap().unwrap();
        assert_eq!(rec.mask, 0);
        assert_eq!(rec.size, 16);
    }
    assert_eq!(ds.num_filters().unwrap(), 1);
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("b").unwrap();
    assert_eq!(ds.layout_kind().unwrap(), LayoutKind::Chunked);
    assert_eq!(ds.num_chunks().unwrap(), 4);
    assert_eq!(ds.read::<i32>().unwrap(), data);
    assert_eq!(
        ds.read_selection::<i32>(&Selection::block(&[1, 1], &[2, 2])).unwrap(),
        vec![5, 6, 9, 10]
    );
}

#[test]
fn compressed_chunks_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deflate.h5");
    let lib = lib();
    let data: Vec<i32> = (0..400).map(|i| i % 7).collect();

    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[10, 10])
        .shuffle()
        .deflate(6)
        .fletcher32();
    let ds = file
        .create_dataset("z", &i32le(), &Dataspace::simple(&[20, 20]), &dcpl)
        .unwrap();
    ds.write(&data).unwrap();
    assert!(ds.storage_size().unwrap() < 1600);
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("z").unwrap();
    assert_eq!(ds.num_filters().unwrap(), 3);
    assert_eq!(ds.read::<i32>().unwrap(), data);
}

#[test]
fn partial_edge_chunks_skip_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("edges.h5");
    let lib = lib();
    let data: Vec<i32> = (0..25).collect();

    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[2, 2])
        .identity_filter()
        .dont_filter_partial_edge_chunks(true);
    let ds = file
        .create_dataset("/d", &i32le(), &Dataspace::simple(&[5, 5]), &dcpl)
        .unwrap();
    ds.write(&data).unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 9);

    let mask = |coord: [u64; 2]| ds.chunk_info(&coord).unwrap().unwrap().mask;
    assert_eq!(mask([0, 0]), 0);
    assert_eq!(mask([2, 2]), 0);
    assert_eq!(mask([4, 0]), 1);
    assert_eq!(mask([0, 4]), 1);
    assert_eq!(mask([4, 4]), 1);
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("d").unwrap();
    assert!(ds.create_props().unwrap().dont_filter_partial_edge_chunks);
    assert_eq!(ds.chunk_info(&[4, 4]).unwrap().unwrap().mask, 1);
    assert_eq!(ds.read::<i32>().unwrap(), data);
}

#[test]
fn chunk_queries_reject_bad_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coords.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let chunked = file
        .create_dataset(
            "c",
            &i32le(),
            &Dataspace::simple(&[4, 4]),
            &DatasetCreateProps::new().chunk(&[2, 2]),
        )
        .unwrap();
    assert_eq!(chunked.chunk_info(&[1, 1]).unwrap(), None);
    assert_eq!(chunked.chunk_info(&[1]).unwrap_err().kind(), ErrorKind::BadArgs);
    assert_eq!(chunked.chunk_info(&[4, 0]).unwrap_err().kind(), ErrorKind::BadRange);

    let contiguous = file
        .create_dataset("k", &i32le(), &Dataspace::simple(&[4]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(contiguous.num_chunks().unwrap_err().kind(), ErrorKind::BadLayout);
}

#[test]
fn former_edge_chunks_are_filtered_once_interior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refilter.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[2])
        .identity_filter()
        .dont_filter_partial_edge_chunks(true);
    let ds = file
        .create_dataset("r", &i32le(), &Dataspace::with_max(&[5], &[UNLIMITED]), &dcpl)
        .unwrap();
    ds.write(&[1, 2, 3, 4, 5]).unwrap();
    assert_eq!(ds.chunk_info(&[4]).unwrap().unwrap().mask, 1);

    ds.set_extent(&[6]).unwrap();
    assert_eq!(ds.chunk_info(&[4]).unwrap().unwrap().mask, 0);
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("r").unwrap();
    assert_eq!(ds.chunk_info(&[5]).unwrap().unwrap().mask, 0);
    assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 0]);
}

// ---------------------------------------------------------------------------
// 3. Extents and fill values
// ---------------------------------------------------------------------------

#[test]
fn early_allocation_fills_grown_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[2, 4])
        .fill_value(-1.0f32)
        .alloc_time(AllocTime::Early);
    let ds = file
        .create_dataset(
            "/c",
            &Datatype::float32(Endian::Little),
            &Dataspace::with_max(&[4, 4], &[8, 4]),
            &dcpl,
        )
        .unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 2);
    assert_eq!(ds.read::<f32>().unwrap(), vec![-1.0; 16]);

    ds.write(&[1.0f32; 16]).unwrap();
    ds.set_extent(&[6, 4]).unwrap();
    assert_eq!(ds.shape().unwrap(), vec![6, 4]);
    assert_eq!(ds.num_chunks().unwrap(), 3);

    let all = ds.read::<f32>().unwrap();
    assert_eq!(&all[..16], &[1.0; 16]);
    assert_eq!(&all[16..], &[-1.0; 8]);
}

#[test]
fn unwritten_regions_read_as_fill() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fill.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new().chunk(&[3]).fill_value(42i32);
    let ds = file
        .create_dataset("f", &i32le(), &Dataspace::simple(&[9]), &dcpl)
        .unwrap();
    ds.write_selection(&Selection::block(&[3], &[3]), &[7, 8, 9])
        .unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 1);
    assert_eq!(
        ds.read::<i32>().unwrap(),
        vec![42, 42, 42, 7, 8, 9, 42, 42, 42]
    );
    assert!(ds.fill_value().unwrap().is_user_defined());
}

#[test]
fn fill_time_never_leaves_storage_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .fill_value(5i32)
        .fill_time(FillTime::Never)
        .alloc_time(AllocTime::Early);
    let ds = file
        .create_dataset("n", &i32le(), &Dataspace::simple(&[4]), &dcpl)
        .unwrap();
    assert_eq!(ds.storage_size().unwrap(), 16);
    assert_eq!(ds.create_props().unwrap().fill_time, FillTime::Never);
}

#[test]
fn shrink_then_grow_restores_fill() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shrink.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new().chunk(&[4]).fill_value(-7i32);
    let ds = file
        .create_dataset(
            "s",
            &i32le(),
            &Dataspace::with_max(&[8], &[UNLIMITED]),
            &dcpl,
        )
        .unwrap();
    ds.write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

    ds.set_extent(&[2]).unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2]);
    assert_eq!(ds.num_chunks().unwrap(), 1);

    ds.set_extent(&[8]).unwrap();
    assert_eq!(
        ds.read::<i32>().unwrap(),
        vec![1, 2, -7, -7, -7, -7, -7, -7]
    );
}

#[test]
fn unchanged_extent_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("same.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "u",
            &i32le(),
            &Dataspace::with_max(&[4], &[UNLIMITED]),
            &DatasetCreateProps::new().chunk(&[2]),
        )
        .unwrap();
    ds.write(&[1, 2, 3, 4]).unwrap();
    ds.set_extent(&[4]).unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn extent_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extent.h5");
    let lib = lib();
    let file = create(&lib, &path);

    let compact = file
        .create_dataset(
            "compact",
            &i32le(),
            &Dataspace::simple(&[4]),
            &DatasetCreateProps::new().compact(),
        )
        .unwrap();
    assert_eq!(compact.set_extent(&[2]).unwrap_err().kind(), ErrorKind::BadLayout);

    let contiguous = file
        .create_dataset("contig", &i32le(), &Dataspace::simple(&[4]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(contiguous.set_extent(&[2]).unwrap_err().kind(), ErrorKind::BadLayout);

    let chunked = file
        .create_dataset(
            "chunked",
            &i32le(),
            &Dataspace::with_max(&[4], &[6]),
            &DatasetCreateProps::new().chunk(&[2]),
        )
        .unwrap();
    assert_eq!(chunked.set_extent(&[7]).unwrap_err().kind(), ErrorKind::BadValue);
    assert_eq!(chunked.set_extent(&[4, 4]).unwrap_err().kind(), ErrorKind::BadArgs);
    assert_eq!(chunked.shape().unwrap(), vec![4]);
}

#[test]
fn extent_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "p",
            &i32le(),
            &Dataspace::with_max(&[2, 3], &[UNLIMITED, 3]),
            &DatasetCreateProps::new().chunk(&[1, 3]),
        )
        .unwrap();
    ds.write(&[1, 2, 3, 4, 5, 6]).unwrap();
    ds.set_extent(&[3, 3]).unwrap();
    ds.write_selection(&Selection::block(&[2, 0], &[1, 3]), &[7, 8, 9])
        .unwrap();
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("p").unwrap();
    assert_eq!(ds.shape().unwrap(), vec![3, 3]);
    assert_eq!(ds.max_shape().unwrap(), vec![UNLIMITED, 3]);
    assert_eq!(ds.read::<i32>().unwrap(), (1..=9).collect::<Vec<i32>>());
}

// ---------------------------------------------------------------------------
// 4. Compact and external storage
// ---------------------------------------------------------------------------

#[test]
fn compact_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compact.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "small",
            &i32le(),
            &Dataspace::simple(&[3]),
            &DatasetCreateProps::new().compact().fill_value(9i32),
        )
        .unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), vec![9, 9, 9]);
    ds.write_selection(&Selection::block(&[1], &[1]), &[4]).unwrap();
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("small").unwrap();
    assert_eq!(ds.layout_kind().unwrap(), LayoutKind::Compact);
    assert_eq!(ds.read::<i32>().unwrap(), vec![9, 4, 9]);
}

#[test]
fn compact_size_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big-compact.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let e = file
        .create_dataset(
            "big",
            &i32le(),
            &Dataspace::simple(&[20_000]),
            &DatasetCreateProps::new().compact(),
        )
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BadRange);
    assert!(file.dataset_names().is_empty());
}

#[test]
fn external_storage_extends_into_its_segments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("efl.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dapl = DatasetAccessProps::new().efile_prefix(dir.path().to_string_lossy());
    let dcpl = DatasetCreateProps::new()
        .external("part0.bin", 0, 16)
        .external("part1.bin", 8, 48);
    let ds = file
        .create_dataset_with(
            "ext",
            &i32le(),
            &Dataspace::with_max(&[4], &[16]),
            &dcpl,
            &dapl,
        )
        .unwrap();
    ds.write(&[1, 2, 3, 4]).unwrap();
    ds.set_extent(&[6]).unwrap();
    ds.write_selection(&Selection::block(&[4], &[2]), &[5, 6]).unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);

    let first = std::fs::read(dir.path().join("part0.bin")).unwrap();
    assert_eq!(&first[..4], &1i32.to_le_bytes());
    let second = std::fs::read(dir.path().join("part1.bin")).unwrap();
    assert_eq!(&second[8..12], &5i32.to_le_bytes());
}

#[test]
fn external_capacity_must_cover_the_maximum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("efl-small.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let e = file
        .create_dataset(
            "ext",
            &i32le(),
            &Dataspace::with_max(&[4], &[16]),
            &DatasetCreateProps::new().external("raw.bin", 0, 32),
        )
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BadRange);
}

// ---------------------------------------------------------------------------
// 5. Virtual datasets
// ---------------------------------------------------------------------------

#[test]
fn virtual_dataset_reads_through_its_sources() {
    let dir = tempfile::tempdir().unwrap();
    let lib = lib();

    let src_path = dir.path().join("src.h5");
    let src = create(&lib, &src_path);
    let s = src
        .create_dataset("s", &i32le(), &Dataspace::simple(&[4]), &DatasetCreateProps::default())
        .unwrap();
    s.write(&[10, 20, 30, 40]).unwrap();
    s.close().unwrap();
    src.close().unwrap();

    let vds_path = dir.path().join("vds.h5");
    let file = create(&lib, &vds_path);
    let dcpl = DatasetCreateProps::new()
        .fill_value(-1i32)
        .virtual_mapping(VirtualMapping {
            source_file: "src.h5".into(),
            source_dataset: "s".into(),
            source_selection: Selection::block(&[0], &[4]),
            virtual_selection: Selection::block(&[2], &[4]),
        });
    let ds = file
        .create_dataset("v", &i32le(), &Dataspace::simple(&[8]), &dcpl)
        .unwrap();
    assert_eq!(ds.layout_kind().unwrap(), LayoutKind::Virtual);
    assert_eq!(
        ds.read::<i32>().unwrap(),
        vec![-1, -1, 10, 20, 30, 40, -1, -1]
    );
}

#[test]
fn virtual_dataset_cannot_map_itself() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selfmap.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new().virtual_mapping(VirtualMapping {
        source_file: SAME_FILE.into(),
        source_dataset: "v".into(),
        source_selection: Selection::block(&[0], &[2]),
        virtual_selection: Selection::block(&[0], &[2]),
    });
    let e = file
        .create_dataset("v", &i32le(), &Dataspace::simple(&[2]), &dcpl)
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BadArgs);
}

// ---------------------------------------------------------------------------
// 6. Shared handles
// ---------------------------------------------------------------------------

#[test]
fn open_count_follows_live_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("count.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let first = file
        .create_dataset("x", &i32le(), &Dataspace::simple(&[2]), &DatasetCreateProps::default())
        .unwrap();
    let second = file.open_dataset("x").unwrap();
    let third = file.open_dataset("/x").unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(first.open_count(), 3);
    assert_eq!(lib.open_datasets(), 1);

    second.write(&[5, 6]).unwrap();
    assert_eq!(third.read::<i32>().unwrap(), vec![5, 6]);

    drop(second);
    assert_eq!(first.open_count(), 2);
    third.close().unwrap();
    assert_eq!(first.open_count(), 1);
    first.close().unwrap();
    assert_eq!(lib.open_datasets(), 0);
}

#[cfg(unix)]
#[test]
fn second_path_to_the_same_file_shares_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("real.h5");
    let link = dir.path().join("alias.h5");
    let lib = lib();

    let file = create(&lib, &path);
    std::os::unix::fs::symlink(&path, &link).unwrap();
    let ds = file
        .create_dataset("a", &i32le(), &Dataspace::simple(&[3]), &DatasetCreateProps::default())
        .unwrap();
    ds.write(&[1, 2, 3]).unwrap();

    let alias = reopen(&lib, &link, OpenMode::ReadWrite);
    assert_eq!(alias.identity(), file.identity());
    assert_eq!(lib.open_files(), 1);
    let via_alias = alias.open_dataset("a").unwrap();
    assert_eq!(via_alias.id(), ds.id());
    assert_eq!(ds.open_count(), 2);
    assert_eq!(via_alias.read::<i32>().unwrap(), vec![1, 2, 3]);
}

#[test]
fn efile_prefix_must_match_open_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefix.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let _ds = file
        .create_dataset("p", &i32le(), &Dataspace::simple(&[2]), &DatasetCreateProps::default())
        .unwrap();
    let e = file
        .open_dataset_with("p", &DatasetAccessProps::new().efile_prefix("/elsewhere"))
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::OpenFailed);
}

#[test]
fn refresh_rereads_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("refresh.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "r",
            &i32le(),
            &Dataspace::with_max(&[2], &[UNLIMITED]),
            &DatasetCreateProps::new().chunk(&[2]),
        )
        .unwrap();
    ds.write(&[1, 2]).unwrap();
    ds.set_extent(&[4]).unwrap();
    ds.refresh().unwrap();
    assert_eq!(ds.shape().unwrap(), vec![4]);
    assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2, 0, 0]);
}

// ---------------------------------------------------------------------------
// 7. Boundaries and rejected configurations
// ---------------------------------------------------------------------------

#[test]
fn zero_length_dataspace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "e",
            &i32le(),
            &Dataspace::with_max(&[0], &[UNLIMITED]),
            &DatasetCreateProps::new().chunk(&[4]),
        )
        .unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), Vec::<i32>::new());
    ds.write::<i32>(&[]).unwrap();
    assert_eq!(ds.write(&[1i32]).unwrap_err().kind(), ErrorKind::BadArgs);
    assert_eq!(ds.num_chunks().unwrap(), 0);
    assert_eq!(ds.storage_size().unwrap(), 0);
    ds.set_extent(&[3]).unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), vec![0, 0, 0]);
}

#[test]
fn rank_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rank.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ok = file
        .create_dataset("r32", &i32le(), &Dataspace::simple(&[1; 32]), &DatasetCreateProps::default())
        .unwrap();
    ok.write(&[11]).unwrap();
    assert_eq!(ok.read::<i32>().unwrap(), vec![11]);

    let e = file
        .create_dataset("r33", &i32le(), &Dataspace::simple(&[1; 33]), &DatasetCreateProps::default())
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BadArgs);
}

#[test]
fn chunk_larger_than_the_extent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bigchunk.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "g",
            &i32le(),
            &Dataspace::with_max(&[3], &[UNLIMITED]),
            &DatasetCreateProps::new().chunk(&[10]),
        )
        .unwrap();
    ds.write(&[1, 2, 3]).unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 1);
    ds.set_extent(&[12]).unwrap();
    let all = ds.read::<i32>().unwrap();
    assert_eq!(&all[..3], &[1, 2, 3]);
    assert!(all[3..].iter().all(|&v| v == 0));
    assert_eq!(ds.num_chunks().unwrap(), 1);
}

#[test]
fn rejected_creations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rejects.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let kind = |name: &str, space: Dataspace, dcpl: DatasetCreateProps| {
        file.create_dataset(name, &i32le(), &space, &dcpl)
            .unwrap_err()
            .kind()
    };

    assert_eq!(
        kind("unlimited", Dataspace::with_max(&[4], &[UNLIMITED]), DatasetCreateProps::default()),
        ErrorKind::BadLayout
    );
    assert_eq!(
        kind("filtered", Dataspace::simple(&[4]), DatasetCreateProps::new().deflate(4)),
        ErrorKind::BadLayout
    );
    assert_eq!(
        kind("rank", Dataspace::simple(&[4, 4]), DatasetCreateProps::new().chunk(&[2])),
        ErrorKind::BadArgs
    );
    assert_eq!(
        kind("zero", Dataspace::simple(&[4]), DatasetCreateProps::new().chunk(&[0])),
        ErrorKind::BadArgs
    );
    assert_eq!(
        kind("wide", Dataspace::with_max(&[4], &[8]), DatasetCreateProps::new().chunk(&[16])),
        ErrorKind::BadRange
    );
    assert_eq!(
        kind("null", Dataspace::null(), DatasetCreateProps::default()),
        ErrorKind::BadArgs
    );
    assert_eq!(
        kind(
            "late-compact",
            Dataspace::simple(&[4]),
            DatasetCreateProps::new().compact().alloc_time(AllocTime::Late)
        ),
        ErrorKind::BadArgs
    );
    assert!(file.dataset_names().is_empty());

    let _first = file
        .create_dataset("dup", &i32le(), &Dataspace::simple(&[1]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(
        kind("dup", Dataspace::simple(&[1]), DatasetCreateProps::default()),
        ErrorKind::AlreadyExists
    );
    assert_eq!(file.open_dataset("missing").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        kind("group/child", Dataspace::simple(&[1]), DatasetCreateProps::default()),
        ErrorKind::NotFound
    );
}

#[test]
fn read_only_files_refuse_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.h5");
    let lib = lib();
    let file = create(&lib, &path);
    file.create_dataset(
        "w",
        &i32le(),
        &Dataspace::with_max(&[2], &[UNLIMITED]),
        &DatasetCreateProps::new().chunk(&[2]),
    )
    .unwrap()
    .close()
    .unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("w").unwrap();
    assert_eq!(ds.write(&[1, 2]).unwrap_err().kind(), ErrorKind::ReadOnly);
    assert_eq!(ds.set_extent(&[4]).unwrap_err().kind(), ErrorKind::ReadOnly);
    let e = file
        .create_dataset("new", &i32le(), &Dataspace::simple(&[1]), &DatasetCreateProps::default())
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::ReadOnly);
}

#[test]
fn buffer_length_must_match_the_selection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buffer.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let ds = file
        .create_dataset("b", &i32le(), &Dataspace::simple(&[4]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(ds.write(&[1, 2, 3]).unwrap_err().kind(), ErrorKind::BadArgs);
    let mut raw = vec![0u8; 3];
    assert_eq!(
        ds.read_raw(&Selection::All, &mut raw).unwrap_err().kind(),
        ErrorKind::BadArgs
    );
}

// ---------------------------------------------------------------------------
// 8. End-to-end scenarios
// ---------------------------------------------------------------------------

#[test]
fn signed_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.h5");
    let lib = lib();
    let data: Vec<i32> = (-6..6).collect();

    let file = create(&lib, &path);
    let ds = file
        .create_dataset(
            "/a",
            &i32le(),
            &Dataspace::simple(&[12]),
            &DatasetCreateProps::new().fill_value(0i32),
        )
        .unwrap();
    ds.write(&data).unwrap();
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("/a").unwrap();
    assert_eq!(ds.layout_kind().unwrap(), LayoutKind::Contiguous);
    assert_eq!(ds.read_selection::<i32>(&Selection::All).unwrap(), data);
}

#[test]
fn square_tiles_hold_four_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s2.h5");
    let lib = lib();
    let data: Vec<i32> = (0..8)
        .flat_map(|i| (0..8).map(move |j| i * 8 + j - 32))
        .collect();

    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new().chunk(&[4, 4]).identity_filter();
    let ds = file
        .create_dataset("/b", &i32le(), &Dataspace::simple(&[8, 8]), &dcpl)
        .unwrap();
    ds.write(&data).unwrap();
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("/b").unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 4);
    for corner in [[0u64, 0], [0, 4], [4, 0], [4, 4]] {
        let rec = ds.chunk_info(&corner).unwrap().unwrap();
        assert_eq!(rec.mask, 0);
        let tile = ds
            .read_selection::<i32>(&Selection::block(&corner, &[4, 4]))
            .unwrap();
        let expected: Vec<i32> = (0..4)
            .flat_map(|r| (0..4).map(move |c| ((corner[0] + r) * 8 + corner[1] + c) as i32 - 32))
            .collect();
        assert_eq!(tile, expected);
    }
    assert_eq!(ds.read::<i32>().unwrap(), data);
}

#[test]
fn early_allocation_with_unlimited_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s3.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[4, 6])
        .alloc_time(AllocTime::Early)
        .fill_value(0.0f32);
    let ds = file
        .create_dataset(
            "/c",
            &Datatype::float32(Endian::Little),
            &Dataspace::with_max(&[4, 6], &[UNLIMITED, 6]),
            &dcpl,
        )
        .unwrap();
    assert_eq!(ds.chunk_index().unwrap(), IndexKind::BTree);
    assert_eq!(ds.num_chunks().unwrap(), 1);

    let row0: Vec<f32> = (0..6).map(|i| i as f32 * 801.1).collect();
    ds.write_selection(&Selection::block(&[0, 0], &[1, 6]), &row0)
        .unwrap();
    ds.set_extent(&[12, 6]).unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 3);

    let row = |r: u64| {
        ds.read_selection::<f32>(&Selection::block(&[r, 0], &[1, 6]))
            .unwrap()
    };
    assert_eq!(row(11), vec![0.0; 6]);
    assert_eq!(row(0), row0);
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("/c").unwrap();
    assert_eq!(ds.chunk_index().unwrap(), IndexKind::BTree);
    assert_eq!(ds.shape().unwrap(), vec![12, 6]);
}

#[test]
fn fixed_layouts_refuse_to_grow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s5.h5");
    let lib = lib();
    let file = create(&lib, &path);
    let values: Vec<i32> = (0..1000).collect();

    let compact = file
        .create_dataset(
            "compact",
            &i32le(),
            &Dataspace::simple(&[1000]),
            &DatasetCreateProps::new().compact(),
        )
        .unwrap();
    compact.write(&values).unwrap();
    assert_eq!(compact.set_extent(&[2000]).unwrap_err().kind(), ErrorKind::BadLayout);
    assert_eq!(compact.shape().unwrap(), vec![1000]);
    assert_eq!(compact.read::<i32>().unwrap(), values);

    let contiguous = file
        .create_dataset("contig", &i32le(), &Dataspace::simple(&[1000]), &DatasetCreateProps::default())
        .unwrap();
    assert_eq!(contiguous.set_extent(&[2000]).unwrap_err().kind(), ErrorKind::BadLayout);
}

#[test]
fn partial_edge_tiles_bypass_compression() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s6.h5");
    let lib = lib();
    let data: Vec<i32> = (0..100).collect();

    let file = create(&lib, &path);
    let dcpl = DatasetCreateProps::new()
        .chunk(&[4, 4])
        .shuffle()
        .deflate(6)
        .dont_filter_partial_edge_chunks(true);
    let ds = file
        .create_dataset("/d", &i32le(), &Dataspace::simple(&[10, 10]), &dcpl)
        .unwrap();
    ds.write(&data).unwrap();
    assert_eq!(ds.num_chunks().unwrap(), 9);

    for r in 0..3u64 {
        for c in 0..3u64 {
            let rec = ds.chunk_info(&[r * 4, c * 4]).unwrap().unwrap();
            if r == 2 || c == 2 {
                assert_eq!(rec.mask, 0b11, "chunk ({r}, {c})");
                assert_eq!(rec.size, 64);
            } else {
                assert_eq!(rec.mask, 0, "chunk ({r}, {c})");
            }
        }
    }
    ds.close().unwrap();
    file.close().unwrap();

    let file = reopen(&lib, &path, OpenMode::ReadOnly);
    let ds = file.open_dataset("/d").unwrap();
    assert_eq!(ds.read::<i32>().unwrap(), data);
}
