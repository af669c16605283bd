//! Datasets: typed, shaped arrays of elements stored in a file.
//!
//! Opening a dataset that is already open yields another handle to the same
//! shared state. The state lives in the library's registry; handles hold
//! only its id. When the last handle goes away the dataset flushes its
//! caches, rewrites its header if needed and leaves the registry.

mod header;
mod shared;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::thread;

use h5core_format::dataspace::Dataspace;
use h5core_format::datatype::Datatype;
use h5core_format::selection::Selection;
use tracing::{debug, warn};

use crate::context::{IoCtx, Library};
use crate::convert::convert;
use crate::error::{bail, err, Result};
use crate::file::{normalize_name, File};
use crate::fill::FillValue;
use crate::layout::chunked::{ChunkRecord, IndexKind};
use crate::layout::{Layout, LayoutOps};
use crate::props::{DatasetAccessProps, DatasetCreateProps, LayoutKind};
use crate::registry::DatasetId;
use crate::types::Element;

pub(crate) use shared::DatasetShared;
use shared::{Creation, DatasetState, Prefixes};

/// A handle to an open dataset.
///
/// Handles are not `Clone`; open the dataset again to get another one. Each
/// method takes the dataset's lock for its own duration.
pub struct Dataset {
    lib: Library,
    id: DatasetId,
    released: bool,
}

impl Dataset {
    pub(crate) fn create(
        file: &File,
        name: &str,
        dtype: &Datatype,
        space: &Dataspace,
        dcpl: &DatasetCreateProps,
        dapl: &DatasetAccessProps,
    ) -> Result<Dataset> {
        let fs = file.shared();
        if !fs.is_writable() {
            bail!(ReadOnly, "file {} is opened read-only", fs.path().display());
        }
        let name = normalize_name(name)?;
        if fs.lookup(name).is_some() {
            bail!(AlreadyExists, "dataset {name:?} already exists");
        }
        let prefixes = Prefixes::resolve(fs, dapl);
        let efile_prefix = prefixes.efile.clone();
        let shared = DatasetShared::create(
            fs,
            Creation {
                name,
                dtype,
                space,
                dcpl,
                dapl,
                prefixes,
            },
        )?;
        let key = (fs.identity(), shared.addr());
        let lib = fs.lib().clone();
        let id = lib.registry().insert(key, Arc::new(shared), efile_prefix);
        Ok(Dataset {
            lib,
            id,
            released: false,
        })
    }

    pub(crate) fn open(file: &File, name: &str, dapl: &DatasetAccessProps) -> Result<Dataset> {
        let fs = file.shared();
        let name = normalize_name(name)?;
        let addr = fs
            .lookup(name)
            .ok_or_else(|| err!(NotFound, "no dataset named {name:?}"))?;
        let key = (fs.identity(), addr);
        let lib = fs.lib().clone();
        let prefixes = Prefixes::resolve(fs, dapl);
        let mut loaded: Option<Arc<DatasetShared>> = None;
        loop {
            {
                let mut reg = lib.registry();
                match reg.lookup(&key) {
                    Some(id) => {
                        let Some(entry) = reg.get(id) else {
                            bail!(Corrupt, "registry lost dataset {name:?}");
                        };
                        if entry.count == 0 {
                            // The last handle is closing; wait for it and look again.
                            let closing = Arc::clone(&entry.shared);
                            drop(reg);
                            closing.wait_closed();
                            thread::yield_now();
                            continue;
                        }
                        if entry.efile_prefix != prefixes.efile {
                            bail!(
                                OpenFailed,
                                "dataset {name:?} is already open with a different external file prefix"
                            );
                        }
                        reg.acquire(id);
                        debug!(name, count = reg.count(id), "dataset handle shared");
                        return Ok(Dataset {
                            lib: lib.clone(),
                            id,
                            released: false,
                        });
                    }
                    None => {
                        if let Some(shared) = loaded.take() {
                            let id = reg.insert(key, shared, prefixes.efile.clone());
                            return Ok(Dataset {
                                lib: lib.clone(),
                                id,
                                released: false,
                            });
                        }
                    }
                }
            }
            let shared = DatasetShared::open(fs, name, addr, dapl, prefixes.clone())?;
            loaded = Some(Arc::new(shared));
        }
    }

    fn shared(&self) -> Result<Arc<DatasetShared>> {
        if self.released {
            bail!(BadArgs, "dataset handle is closed");
        }
        self.lib
            .registry()
            .get(self.id)
            .map(|e| Arc::clone(&e.shared))
            .ok_or_else(|| err!(BadArgs, "dataset handle is stale"))
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut DatasetState, &IoCtx<'_>) -> Result<R>,
    ) -> Result<R> {
        let _api = self.lib.api_guard();
        self.shared()?.with_state(f)
    }

    /// Drop this handle's count; the last one shuts the dataset down.
    fn release(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        let _api = self.lib.api_guard();
        let last = {
            let mut reg = self.lib.registry();
            match reg.release(self.id) {
                Some(0) => reg.get(self.id).map(|e| Arc::clone(&e.shared)),
                _ => None,
            }
        };
        let Some(shared) = last else {
            return Ok(());
        };
        let result = shared.shutdown();
        self.lib.registry().remove(self.id);
        result
    }

    /// Release this handle, reporting any failure to write the dataset out.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn library(&self) -> &Library {
        &self.lib
    }

    /// The file the dataset lives in.
    pub fn file(&self) -> Result<File> {
        Ok(File::from_shared(Arc::clone(self.shared()?.file())))
    }

    pub fn name(&self) -> Result<String> {
        self.with_state(|s, _| Ok(s.name.clone()))
    }

    /// Live handles to this dataset, this one included.
    pub fn open_count(&self) -> usize {
        if self.released {
            return 0;
        }
        self.lib.registry().count(self.id)
    }

    pub fn shape(&self) -> Result<Vec<u64>> {
        self.with_state(|s, _| Ok(s.space.dims.clone()))
    }

    pub fn max_shape(&self) -> Result<Vec<u64>> {
        self.with_state(|s, _| Ok(s.space.max_dims.clone()))
    }

    pub fn dataspace(&self) -> Result<Dataspace> {
        self.with_state(|s, _| Ok(s.space.clone()))
    }

    pub fn datatype(&self) -> Result<Datatype> {
        self.with_state(|s, _| Ok(s.dtype.datatype().clone()))
    }

    pub fn layout_kind(&self) -> Result<LayoutKind> {
        self.with_state(|s, _| Ok(s.layout.kind()))
    }

    /// Creation properties recovered from the header.
    ///
    /// Filter parameters are reported as stored, after each filter adjusted
    /// them for this dataset.
    pub fn create_props(&self) -> Result<DatasetCreateProps> {
        self.with_state(|s, _| Ok(s.create_props()))
    }

    pub fn fill_value(&self) -> Result<FillValue> {
        self.with_state(|s, _| Ok(s.fill().clone()))
    }

    /// Seconds since the epoch recorded at creation by old-format headers.
    pub fn modification_time(&self) -> Result<Option<u32>> {
        self.with_state(|s, _| Ok(s.modification_time()))
    }

    /// Number of filters in the stored pipeline.
    pub fn num_filters(&self) -> Result<usize> {
        self.with_state(|s, _| Ok(s.pipeline().filters.len()))
    }

    /// Bytes of file space holding raw data, after flushing cached chunks.
    pub fn storage_size(&self) -> Result<u64> {
        self.with_state(|s, ctx| {
            s.flush(ctx)?;
            Ok(s.layout.storage_size())
        })
    }

    /// Storage record of the chunk holding element `coord`, or `None` if
    /// that chunk was never written.
    pub fn chunk_info(&self, coord: &[u64]) -> Result<Option<ChunkRecord>> {
        self.with_state(|s, ctx| {
            s.flush(ctx)?;
            let dims = &s.space.dims;
            let Layout::Chunked(chunked) = &s.layout else {
                bail!(BadLayout, "dataset {:?} is not chunked", s.name);
            };
            if coord.len() != dims.len() {
                bail!(BadArgs, "{} coordinates for a rank {} dataset", coord.len(), dims.len());
            }
            if coord.iter().zip(dims).any(|(&c, &d)| c >= d) {
                bail!(BadRange, "coordinate {coord:?} is outside the extent {dims:?}");
            }
            let scaled: Vec<u64> = coord
                .iter()
                .zip(chunked.chunk_dims())
                .map(|(&c, &n)| c / n)
                .collect();
            Ok(chunked.record(&scaled))
        })
    }

    /// How chunk addresses are indexed on disk.
    pub fn chunk_index(&self) -> Result<IndexKind> {
        self.with_state(|s, _| {
            s.layout
                .as_chunked()
                .map(|c| c.index_kind())
                .ok_or_else(|| err!(BadLayout, "dataset {:?} is not chunked", s.name))
        })
    }

    /// Chunks with allocated storage.
    pub fn num_chunks(&self) -> Result<usize> {
        self.with_state(|s, ctx| {
            s.flush(ctx)?;
            s.layout
                .as_chunked()
                .map(|c| c.num_chunks())
                .ok_or_else(|| err!(BadLayout, "dataset {:?} is not chunked", s.name))
        })
    }

    /// Read the selected elements, packed, in the dataset's own datatype.
    pub fn read_raw(&self, sel: &Selection, buf: &mut [u8]) -> Result<()> {
        self.with_state(|s, ctx| s.read(ctx, sel, buf))
    }

    /// Write packed elements, in the dataset's own datatype, to the selection.
    pub fn write_raw(&self, sel: &Selection, data: &[u8]) -> Result<()> {
        self.with_state(|s, ctx| s.write(ctx, sel, data))
    }

    /// Read every element, converting to `T`.
    pub fn read<T: Element>(&self) -> Result<Vec<T>> {
        self.read_selection(&Selection::All)
    }

    pub fn read_selection<T: Element>(&self, sel: &Selection) -> Result<Vec<T>> {
        let mem = T::datatype();
        self.with_state(|s, ctx| {
            let n = usize::try_from(s.selected(sel)?)
                .map_err(|_| err!(Overflow, "selection is too large for memory"))?;
            let mut raw = vec![0u8; n * s.elem_size()];
            s.read(ctx, sel, &mut raw)?;
            let file_type = s.dtype.datatype();
            let bytes = if *file_type == mem { raw } else { convert(file_type, &mem, &raw)? };
            let mut out = vec![T::zeroed(); n];
            bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
            Ok(out)
        })
    }

    /// Read the single element of a scalar (or one-element) dataset.
    pub fn read_scalar<T: Element>(&self) -> Result<T> {
        let values = self.read::<T>()?;
        match values.as_slice() {
            [v] => Ok(*v),
            _ => bail!(BadArgs, "dataset holds {} elements, not one", values.len()),
        }
    }

    /// Write every element from `data`, converting from `T`.
    pub fn write<T: Element>(&self, data: &[T]) -> Result<()> {
        self.write_selection(&Selection::All, data)
    }

    pub fn write_selection<T: Element>(&self, sel: &Selection, data: &[T]) -> Result<()> {
        let mem = T::datatype();
        let raw: &[u8] = bytemuck::cast_slice(data);
        self.with_state(|s, ctx| {
            let file_type = s.dtype.datatype();
            let bytes = if *file_type == mem {
                Cow::Borrowed(raw)
            } else {
                Cow::Owned(convert(&mem, file_type, raw)?)
            };
            s.write(ctx, sel, &bytes)
        })
    }

    /// Change the current extent within the maximum.
    pub fn set_extent(&self, dims: &[u64]) -> Result<()> {
        self.with_state(|s, ctx| s.set_extent(ctx, dims))
    }

    /// Write cached raw data and header changes to the file.
    pub fn flush(&self) -> Result<()> {
        self.with_state(|s, ctx| s.flush(ctx))
    }

    /// Flush, then reload the dataset's metadata from the file.
    pub fn refresh(&self) -> Result<()> {
        self.with_state(|s, ctx| s.refresh(ctx))
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(id = ?self.id, error = %e, "closing dataset on drop failed");
        }
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}
