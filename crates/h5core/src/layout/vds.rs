//! Virtual layout: elements mapped from source datasets.
//!
//! Each mapping pairs a hyperslab of the virtual dataset with a selection of
//! a source dataset, possibly in another file. The mapping list is stored as
//! one object in a global heap collection of its own. Sources are opened on
//! first use and held until the layout is destroyed.

use std::path::{Path, PathBuf};

use h5core_format::data_layout::DataLayout;
use h5core_format::dataspace::UNLIMITED;
use h5core_format::global_heap::{header_size, GlobalHeapCollection};
use h5core_format::selection::{HyperslabDim, Selection};
use h5core_format::vds::{decode_mappings, encode_mappings, VdsMapping, SAME_FILE};
use h5core_format::LENGTH_SIZE;
use tracing::{debug, trace, warn};

use super::{DatasetInfo, LayoutOps};
use crate::context::IoCtx;
use crate::convert::convert;
use crate::dataset::Dataset;
use crate::error::{bail, err, Component, Result, ResultExt};
use crate::file::{File, OpenMode};
use crate::props::{DatasetAccessProps, FileAccessProps, VdsView};
use crate::selection::{coord_of, ordinal, unravel};

/// Layout message version able to describe virtual storage.
const VIRTUAL_LAYOUT_VERSION: u8 = 4;

#[derive(Debug)]
enum Source {
    Unopened,
    Open(Dataset),
}

#[derive(Debug)]
struct MappingState {
    mapping: VdsMapping,
    /// Virtual hyperslab as stored; ordinals are taken against it.
    virt: Vec<HyperslabDim>,
    /// `virt` with its counts cut back to the current extent.
    clipped: Option<Vec<HyperslabDim>>,
    source: Source,
}

impl MappingState {
    fn new(mapping: VdsMapping, dims: &[u64]) -> Result<MappingState> {
        let virt = mapping
            .virtual_selection
            .to_hyperslab(dims)
            .ok_or_else(|| err!(Unsupported, "virtual mappings must use hyperslab selections"))?;
        Ok(MappingState {
            mapping,
            virt,
            clipped: None,
            source: Source::Unopened,
        })
    }

    fn clipped(&mut self, dims: &[u64]) -> &[HyperslabDim] {
        let virt = &self.virt;
        self.clipped.get_or_insert_with(|| {
            virt.iter()
                .zip(dims)
                .map(|(h, &d)| {
                    let mut h = *h;
                    if h.start >= d {
                        h.count = 0;
                    } else if h.count > 0 {
                        let stride = h.stride.max(1);
                        h.count = h.count.min((d - h.start).div_ceil(stride));
                    }
                    h
                })
                .collect()
        })
    }

    /// Ordinal of `coord` in the virtual selection, if this mapping covers it.
    fn covers(&mut self, dims: &[u64], coord: &[u64]) -> Option<u64> {
        let inside = self
            .clipped(dims)
            .iter()
            .zip(coord)
            .all(|(h, &c)| h.contains(c));
        if inside {
            ordinal(&self.virt, coord)
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct VirtualLayout {
    mappings: Vec<MappingState>,
    /// Collection address and size, once written.
    heap: Option<(u64, u64)>,
    heap_index: u16,
    prefix: Option<PathBuf>,
    view: VdsView,
    header_dirty: bool,
}

impl VirtualLayout {
    pub fn new(mappings: Vec<VdsMapping>, prefix: Option<PathBuf>, view: VdsView) -> VirtualLayout {
        VirtualLayout {
            mappings: mappings
                .into_iter()
                .map(|mapping| MappingState {
                    mapping,
                    virt: Vec::new(),
                    clipped: None,
                    source: Source::Unopened,
                })
                .collect(),
            heap: None,
            heap_index: 0,
            prefix,
            view,
            header_dirty: false,
        }
    }

    /// State for a decoded layout message; mappings are loaded by `read_oh`.
    pub fn from_stored(
        heap_addr: Option<u64>,
        heap_index: u32,
        prefix: Option<PathBuf>,
        view: VdsView,
    ) -> Result<VirtualLayout> {
        let heap_index = u16::try_from(heap_index)
            .map_err(|_| err!(Corrupt, "global heap index {heap_index} out of range"))?;
        Ok(VirtualLayout {
            heap: heap_addr.map(|addr| (addr, 0)),
            heap_index,
            ..VirtualLayout::new(Vec::new(), prefix, view)
        })
    }

    pub fn mappings(&self) -> impl Iterator<Item = &VdsMapping> {
        self.mappings.iter().map(|m| &m.mapping)
    }

    /// Number of sources currently open.
    pub fn open_sources(&self) -> usize {
        self.mappings
            .iter()
            .filter(|m| matches!(m.source, Source::Open(_)))
            .count()
    }

    fn setup(&mut self, info: &DatasetInfo<'_>) -> Result<()> {
        if info.dims.is_empty() {
            bail!(BadLayout, "virtual storage needs a simple dataspace");
        }
        let mappings = std::mem::take(&mut self.mappings);
        for m in mappings {
            self.mappings.push(MappingState::new(m.mapping, mapping_extent(info))?);
        }
        Ok(())
    }

    /// Candidate locations for a source file, in search order.
    fn candidates(&self, ctx: &IoCtx<'_>, name: &str) -> Vec<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return vec![path.to_path_buf()];
        }
        let mut out = Vec::new();
        if let Some(prefix) = &self.prefix {
            out.push(prefix.join(path));
        }
        out.push(path.to_path_buf());
        if let Some(dir) = ctx.path().parent() {
            out.push(dir.join(path));
        }
        out
    }

    fn open_source(&self, ctx: &IoCtx<'_>, mapping: &VdsMapping) -> Option<Dataset> {
        let dapl = DatasetAccessProps::default();
        if mapping.source_file == SAME_FILE {
            let file = File::from_shared(ctx.file().clone());
            return match file.open_dataset_with(&mapping.source_dataset, &dapl) {
                Ok(ds) => Some(ds),
                Err(e) => {
                    debug!(dataset = %mapping.source_dataset, error = %e, "virtual source unavailable");
                    None
                }
            };
        }
        for path in self.candidates(ctx, &mapping.source_file) {
            if !path.exists() {
                continue;
            }
            let opened = ctx
                .lib()
                .open_file(&path, OpenMode::ReadOnly, &FileAccessProps::default())
                .and_then(|f| f.open_dataset_with(&mapping.source_dataset, &dapl));
            match opened {
                Ok(ds) => {
                    debug!(path = %path.display(), dataset = %mapping.source_dataset, "virtual source opened");
                    return Some(ds);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "virtual source unavailable");
                }
            }
        }
        None
    }

    /// Open what can be opened and report, per mapping, whether it takes
    /// part under the view policy.
    fn resolve(&mut self, ctx: &IoCtx<'_>) -> Vec<bool> {
        let mut usable = Vec::with_capacity(self.mappings.len());
        let mut stopped = false;
        for i in 0..self.mappings.len() {
            if stopped {
                usable.push(false);
                continue;
            }
            if matches!(self.mappings[i].source, Source::Unopened) {
                if let Some(ds) = self.open_source(ctx, &self.mappings[i].mapping) {
                    self.mappings[i].source = Source::Open(ds);
                }
            }
            let ok = matches!(self.mappings[i].source, Source::Open(_));
            if !ok && self.view == VdsView::FirstMissing {
                stopped = true;
            }
            usable.push(ok);
        }
        usable
    }

    /// Source selection for one mapping, as a hyperslab over the source extent.
    fn source_slab(mapping: &MappingState, ds: &Dataset, wanted: u64) -> Result<Vec<HyperslabDim>> {
        let dims = ds.shape()?;
        let slab = mapping
            .mapping
            .source_selection
            .to_hyperslab(&dims)
            .ok_or_else(|| err!(Unsupported, "virtual sources must use hyperslab selections"))?;
        let have: u64 = slab.iter().map(HyperslabDim::selected).product();
        if have != wanted {
            bail!(
                BadArgs,
                "source selection of {} has {have} elements, the virtual one {wanted}",
                mapping.mapping.source_dataset
            );
        }
        Ok(slab)
    }
}

/// Mappings are laid out against the maximum extent when it is bounded.
fn mapping_extent<'a>(info: &DatasetInfo<'a>) -> &'a [u64] {
    if info.max_dims.iter().any(|&m| m == UNLIMITED) {
        info.dims
    } else {
        info.max_dims
    }
}

/// Coordinates picked by `sel`, in buffer order.
fn selected_coords(sel: &Selection, dims: &[u64]) -> Vec<Vec<u64>> {
    match sel {
        Selection::None => Vec::new(),
        Selection::Points(p) => p.clone(),
        Selection::All => {
            let n: u64 = dims.iter().product();
            (0..n).map(|i| unravel(i, dims)).collect()
        }
        Selection::Hyperslab(hs) => {
            let n: u64 = hs.iter().map(HyperslabDim::selected).product();
            (0..n).map(|k| coord_of(hs, k)).collect()
        }
    }
}

impl LayoutOps for VirtualLayout {
    fn construct(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        if self.mappings.is_empty() {
            bail!(BadArgs, "virtual dataset has no mappings");
        }
        for m in &self.mappings {
            let (v, s) = (&m.mapping.virtual_selection, &m.mapping.source_selection);
            if matches!(v, Selection::Points(_)) || matches!(s, Selection::Points(_)) {
                bail!(Unsupported, "point selections in virtual mappings are not supported");
            }
            if v.has_unlimited_count() || s.has_unlimited_count() {
                bail!(Unsupported, "printf-style virtual mappings are not supported");
            }
            if m.mapping.source_dataset.is_empty() || m.mapping.source_file.is_empty() {
                bail!(BadArgs, "virtual mapping source names must not be empty");
            }
        }
        self.setup(info)?;
        for m in &self.mappings {
            let bound = mapping_extent(info);
            Selection::Hyperslab(m.virt.clone())
                .validate(bound)
                .map_err(|e| err!(BadArgs, "virtual selection: {e}"))?;
            if let Selection::Hyperslab(src) = &m.mapping.source_selection {
                let virt_n: u64 = m.virt.iter().map(HyperslabDim::selected).product();
                let src_n: u64 = src.iter().map(HyperslabDim::selected).product();
                if virt_n != src_n {
                    bail!(
                        BadArgs,
                        "mapping selects {virt_n} virtual and {src_n} source elements"
                    );
                }
            }
        }

        let list: Vec<VdsMapping> = self.mappings.iter().map(|m| m.mapping.clone()).collect();
        let blob = encode_mappings(&list, LENGTH_SIZE).within(Component::Layout)?;
        let mut heap = GlobalHeapCollection::default();
        self.heap_index = heap.insert(blob);
        let bytes = heap.encode(LENGTH_SIZE);
        let addr = ctx.alloc(bytes.len() as u64)?;
        ctx.write(addr, &bytes)?;
        self.heap = Some((addr, bytes.len() as u64));
        debug!(mappings = list.len(), addr, "virtual mappings stored");
        self.header_dirty = true;
        Ok(())
    }

    fn is_space_allocated(&self) -> bool {
        true
    }

    fn is_data_cached(&self) -> bool {
        false
    }

    fn read_oh(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        let Some((addr, _)) = self.heap else {
            bail!(Corrupt, "virtual layout without a mapping heap");
        };
        let head = ctx.read_vec(addr, header_size(LENGTH_SIZE))?;
        let size = GlobalHeapCollection::peek_size(&head, LENGTH_SIZE).within(Component::Layout)?;
        let bytes = ctx.read_vec(addr, size as usize)?;
        let heap = GlobalHeapCollection::decode(&bytes, LENGTH_SIZE).within(Component::Layout)?;
        let blob = heap
            .get(self.heap_index)
            .ok_or_else(|| err!(Corrupt, "mapping list object {} is missing", self.heap_index))?;
        let list = decode_mappings(blob, LENGTH_SIZE).within(Component::Layout)?;
        self.heap = Some((addr, size));
        self.mappings = list
            .into_iter()
            .map(|mapping| MappingState {
                mapping,
                virt: Vec::new(),
                clipped: None,
                source: Source::Unopened,
            })
            .collect();
        self.setup(info)
    }

    fn io_init(&self, _info: &DatasetInfo<'_>, _sel: &Selection) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &mut [u8],
    ) -> Result<()> {
        let elem = info.elem_size;
        info.fill.fill(buf);
        let usable = self.resolve(ctx);
        let coords = selected_coords(sel, info.dims);

        // The last mapping covering a cell owns it.
        let mut owned: Vec<Vec<(usize, u64)>> = vec![Vec::new(); self.mappings.len()];
        for (pos, coord) in coords.iter().enumerate() {
            let mut owner = None;
            for (i, m) in self.mappings.iter_mut().enumerate() {
                if !usable[i] {
                    continue;
                }
                if let Some(k) = m.covers(info.dims, coord) {
                    owner = Some((i, k));
                }
            }
            if let Some((i, k)) = owner {
                owned[i].push((pos, k));
            }
        }

        for (m, cells) in self.mappings.iter().zip(owned) {
            if cells.is_empty() {
                continue;
            }
            let Source::Open(ds) = &m.source else {
                continue;
            };
            let wanted: u64 = m.virt.iter().map(HyperslabDim::selected).product();
            let slab = Self::source_slab(m, ds, wanted)?;
            let points: Vec<Vec<u64>> = cells.iter().map(|&(_, k)| coord_of(&slab, k)).collect();
            let src_type = ds.datatype()?;
            let mut raw = vec![0u8; points.len() * src_type.size() as usize];
            ds.read_raw(&Selection::Points(points), &mut raw)?;
            let data = convert(&src_type, info.dtype, &raw)?;
            for (j, &(pos, _)) in cells.iter().enumerate() {
                buf[pos * elem..(pos + 1) * elem].copy_from_slice(&data[j * elem..(j + 1) * elem]);
            }
            trace!(source = %m.mapping.source_dataset, cells = cells.len(), "virtual read");
        }
        Ok(())
    }

    fn write(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &[u8],
    ) -> Result<()> {
        let elem = info.elem_size;
        let usable = self.resolve(ctx);
        let coords = selected_coords(sel, info.dims);
        for (i, m) in self.mappings.iter_mut().enumerate() {
            if !usable[i] {
                continue;
            }
            let cells: Vec<(usize, u64)> = coords
                .iter()
                .enumerate()
                .filter_map(|(pos, c)| m.covers(info.dims, c).map(|k| (pos, k)))
                .collect();
            if cells.is_empty() {
                continue;
            }
            let Source::Open(ds) = &m.source else {
                continue;
            };
            let wanted: u64 = m.virt.iter().map(HyperslabDim::selected).product();
            let slab = Self::source_slab(m, ds, wanted)?;
            let points: Vec<Vec<u64>> = cells.iter().map(|&(_, k)| coord_of(&slab, k)).collect();
            let mut packed = Vec::with_capacity(cells.len() * elem);
            for &(pos, _) in &cells {
                packed.extend_from_slice(&buf[pos * elem..(pos + 1) * elem]);
            }
            let data = convert(info.dtype, &ds.datatype()?, &packed)?;
            ds.write_raw(&Selection::Points(points), &data)?;
            trace!(source = %m.mapping.source_dataset, cells = cells.len(), "virtual write");
        }
        Ok(())
    }

    fn flush(&mut self, _info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        for m in &self.mappings {
            if let Source::Open(ds) = &m.source {
                ds.flush()?;
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        for m in &mut self.mappings {
            if let Source::Open(ds) = std::mem::replace(&mut m.source, Source::Unopened) {
                if let Err(e) = ds.close() {
                    warn!(source = %m.mapping.source_dataset, error = %e, "closing virtual source failed");
                }
            }
        }
    }

    fn allocate(
        &mut self,
        _info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        _full_overwrite: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn set_extent(
        &mut self,
        _info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        _old_dims: &[u64],
    ) -> Result<()> {
        for m in &mut self.mappings {
            m.clipped = None;
        }
        self.header_dirty = true;
        Ok(())
    }

    fn free_storage(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        self.destroy();
        if let Some((addr, size)) = self.heap.take() {
            if size > 0 {
                ctx.free(addr, size)?;
            }
        }
        Ok(())
    }

    fn storage_size(&self) -> u64 {
        0
    }

    fn message(&self, _info: &DatasetInfo<'_>) -> (u8, DataLayout) {
        (
            VIRTUAL_LAYOUT_VERSION,
            DataLayout::Virtual {
                heap_addr: self.heap.map(|(addr, _)| addr),
                heap_index: self.heap_index as u32,
            },
        )
    }

    fn take_header_dirty(&mut self) -> bool {
        std::mem::take(&mut self.header_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipping_follows_the_extent() {
        let mapping = VdsMapping {
            source_file: SAME_FILE.into(),
            source_dataset: "src".into(),
            source_selection: Selection::All,
            virtual_selection: Selection::Hyperslab(vec![
                HyperslabDim {
                    start: 0,
                    stride: 4,
                    count: 5,
                    block: 2,
                },
                HyperslabDim::range(0, 3),
            ]),
        };
        let mut m = MappingState::new(mapping, &[20, 3]).unwrap();
        assert_eq!(m.covers(&[20, 3], &[5, 1]), Some(3 * 3 + 1));
        assert_eq!(m.covers(&[20, 3], &[6, 0]), None);
        m.clipped = None;
        // Shrunk to 5 rows: only blocks starting at 0 and 4 remain.
        assert_eq!(m.clipped(&[5, 3])[0].count, 2);
        assert_eq!(m.covers(&[5, 3], &[8, 0]), None);
    }

    #[test]
    fn selected_coords_in_buffer_order() {
        let got = selected_coords(&Selection::block(&[1, 1], &[2, 2]), &[4, 4]);
        assert_eq!(got, vec![vec![1, 1], vec![1, 2], vec![2, 1], vec![2, 2]]);
        assert_eq!(selected_coords(&Selection::All, &[2, 1]).len(), 2);
        assert!(selected_coords(&Selection::None, &[2, 1]).is_empty());
    }
}
