use std::hint::black_box;
use std::path::Path;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use h5core::{
    ChunkCacheConfig, Dataset, DatasetAccessProps, DatasetCreateProps, Dataspace, Datatype, Endian,
    File, FileAccessProps, FileLocking, Library, LibraryConfig, Selection,
};

const ROWS: u64 = 512;
const COLS: u64 = 512;

fn lib() -> Library {
    Library::new(LibraryConfig::new().file_locking(FileLocking::BestEffort))
}

fn make_data() -> Vec<f64> {
    (0..ROWS * COLS).map(|i| (i % 1000) as f64 * 0.5).collect()
}

fn create(lib: &Library, path: &Path, dcpl: &DatasetCreateProps) -> (File, Dataset) {
    let file = lib.create_file(path, &FileAccessProps::default()).unwrap();
    let ds = file
        .create_dataset(
            "data",
            &Datatype::float64(Endian::Little),
            &Dataspace::simple(&[ROWS, COLS]),
            dcpl,
        )
        .unwrap();
    (file, ds)
}

fn bench_write(c: &mut Criterion) {
    let data = make_data();
    let dir = tempfile::tempdir().unwrap();
    let lib = lib();
    let mut group = c.benchmark_group("write_512x512_f64");
    group.sample_size(20);

    let layouts = [
        ("contiguous", DatasetCreateProps::new()),
        ("chunked_64", DatasetCreateProps::new().chunk(&[64, 64])),
        ("chunked_64_deflate", DatasetCreateProps::new().chunk(&[64, 64]).deflate(6)),
        (
            "chunked_64_shuffle_deflate",
            DatasetCreateProps::new().chunk(&[64, 64]).shuffle().deflate(6),
        ),
    ];
    for (name, dcpl) in layouts {
        let path = dir.path().join(format!("write_{name}.h5"));
        group.bench_function(name, |b| {
            b.iter(|| {
                let (file, ds) = create(&lib, &path, &dcpl);
                ds.write(black_box(&data)).unwrap();
                ds.close().unwrap();
                file.close().unwrap();
            })
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let data = make_data();
    let dir = tempfile::tempdir().unwrap();
    let lib = lib();
    let mut group = c.benchmark_group("read_512x512_f64");
    group.sample_size(20);

    let layouts = [
        ("contiguous", DatasetCreateProps::new()),
        ("chunked_64", DatasetCreateProps::new().chunk(&[64, 64])),
        ("chunked_64_deflate", DatasetCreateProps::new().chunk(&[64, 64]).deflate(6)),
    ];
    for (name, dcpl) in layouts {
        let path = dir.path().join(format!("read_{name}.h5"));
        let (file, ds) = create(&lib, &path, &dcpl);
        ds.write(&data).unwrap();
        ds.flush().unwrap();
        group.bench_function(name, |b| b.iter(|| black_box(ds.read::<f64>().unwrap())));
        ds.close().unwrap();
        file.close().unwrap();
    }
    group.finish();
}

/// Row-by-row reads of a deflated dataset with and without room for a
/// full row of chunks in the cache.
fn bench_cache(c: &mut Criterion) {
    let data = make_data();
    let dir = tempfile::tempdir().unwrap();
    let lib = lib();
    let path = dir.path().join("cache.h5");
    let (file, ds) = create(&lib, &path, &DatasetCreateProps::new().chunk(&[64, 64]).deflate(6));
    ds.write(&data).unwrap();
    ds.close().unwrap();

    let mut group = c.benchmark_group("row_reads_deflate");
    group.sample_size(10);
    for nbytes in [0usize, 64 * 1024, 8 * 1024 * 1024] {
        let dapl = DatasetAccessProps::new().chunk_cache(ChunkCacheConfig {
            nbytes,
            ..ChunkCacheConfig::default()
        });
        let ds = file.open_dataset_with("data", &dapl).unwrap();
        group.bench_with_input(BenchmarkId::new("cache_bytes", nbytes), &nbytes, |b, _| {
            b.iter(|| {
                for row in 0..ROWS {
                    let sel = Selection::block(&[row, 0], &[1, COLS]);
                    black_box(ds.read_selection::<f64>(&sel).unwrap());
                }
            })
        });
        ds.close().unwrap();
    }
    group.finish();
    file.close().unwrap();
}

criterion_group!(benches, bench_write, bench_read, bench_cache);
criterion_main!(benches);
