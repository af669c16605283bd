//! Turning a selection into runs of consecutive elements.
//!
//! A [`Run`] pairs a stretch of the caller's packed buffer with the storage
//! elements it maps to. Contiguous storage wants runs over the row-major
//! flattening of the whole dataspace; chunked storage wants them grouped by
//! chunk, with offsets inside each chunk.

use std::collections::BTreeMap;

use h5core_format::selection::{HyperslabDim, Selection, SelectionError};

use crate::error::{err, Error, Result};

pub use h5core_format::selection::UNLIMITED_COUNT;

/// `len` elements at buffer element `mem` map to storage element `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub mem: u64,
    pub off: u64,
    pub len: u64,
}

impl From<SelectionError> for Error {
    fn from(e: SelectionError) -> Error {
        match e {
            SelectionError::RankMismatch { .. } | SelectionError::ZeroStride { .. } => {
                err!(BadArgs, "{e}")
            }
            SelectionError::OutOfBounds { .. } | SelectionError::Overlapping { .. } => {
                err!(BadRange, "{e}")
            }
        }
    }
}

/// Check a selection against the current extent.
pub fn validate(sel: &Selection, dims: &[u64]) -> Result<()> {
    if sel.has_unlimited_count() {
        return Err(err!(BadArgs, "selection with unlimited count cannot be used for I/O"));
    }
    sel.validate(dims)?;
    Ok(())
}

/// Number of elements `sel` picks out of `dims`.
pub fn num_elements(sel: &Selection, dims: &[u64]) -> u64 {
    sel.num_elements(dims)
}

/// Row-major strides, in elements, of an array with shape `dims`.
pub(crate) fn strides(dims: &[u64]) -> Vec<u64> {
    let mut out = vec![1u64; dims.len()];
    for d in (0..dims.len().saturating_sub(1)).rev() {
        out[d] = out[d + 1].saturating_mul(dims[d + 1]);
    }
    out
}

/// Coordinate of linear element `index` in an array of shape `dims`.
pub(crate) fn unravel(mut index: u64, dims: &[u64]) -> Vec<u64> {
    let mut coord = vec![0u64; dims.len()];
    for d in (0..dims.len()).rev() {
        let n = dims[d].max(1);
        coord[d] = index % n;
        index /= n;
    }
    coord
}

/// Selected `[start, end)` segments of one hyperslab dimension, ascending.
fn segments(h: &HyperslabDim) -> Vec<(u64, u64)> {
    if h.count == 0 || h.block == 0 {
        return Vec::new();
    }
    if h.stride == h.block || h.count == 1 {
        return vec![(h.start, h.end())];
    }
    (0..h.count)
        .map(|i| {
            let s = h.start + i * h.stride;
            (s, s + h.block)
        })
        .collect()
}

fn clip(segs: &[(u64, u64)], lo: u64, hi: u64) -> Vec<(u64, u64)> {
    segs.iter()
        .filter_map(|&(s, e)| {
            let (s, e) = (s.max(lo), e.min(hi));
            (s < e).then_some((s, e))
        })
        .collect()
}

/// Ordinal of `coord` among the selected elements of `hs` in row-major order.
pub(crate) fn ordinal(hs: &[HyperslabDim], coord: &[u64]) -> Option<u64> {
    let mut k = 0u64;
    for (h, &c) in hs.iter().zip(coord) {
        k = k * h.selected() + h.ordinal(c)?;
    }
    Some(k)
}

/// Coordinate of the `k`-th selected element of `hs`.
pub(crate) fn coord_of(hs: &[HyperslabDim], mut k: u64) -> Vec<u64> {
    let mut coord = vec![0u64; hs.len()];
    for d in (0..hs.len()).rev() {
        let n = hs[d].selected().max(1);
        coord[d] = hs[d].index_of(k % n);
        k /= n;
    }
    coord
}

/// Visit every row of a box given as per-dimension segment lists: `f`
/// receives the coordinate of the row start and the row length.
fn for_each_row(segs: &[Vec<(u64, u64)>], mut f: impl FnMut(&[u64], u64)) {
    let rank = segs.len();
    if rank == 0 {
        f(&[], 1);
        return;
    }
    if segs.iter().any(Vec::is_empty) {
        return;
    }
    // Odometer over (segment, index) for the outer dimensions.
    let mut seg_ix = vec![0usize; rank];
    let mut coord: Vec<u64> = segs.iter().map(|s| s[0].0).collect();
    loop {
        for &(s, e) in &segs[rank - 1] {
            coord[rank - 1] = s;
            f(&coord, e - s);
        }
        let mut d = rank - 1;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            coord[d] += 1;
            if coord[d] < segs[d][seg_ix[d]].1 {
                break;
            }
            seg_ix[d] += 1;
            if seg_ix[d] < segs[d].len() {
                coord[d] = segs[d][seg_ix[d]].0;
                break;
            }
            seg_ix[d] = 0;
            coord[d] = segs[d][0].0;
        }
    }
}

fn push_run(out: &mut Vec<Run>, off: u64, mem: u64, len: u64) {
    if let Some(last) = out.last_mut() {
        if last.off + last.len == off && last.mem + last.len == mem {
            last.len += len;
            return;
        }
    }
    out.push(Run { mem, off, len });
}

/// Runs over the row-major flattening of `dims`, in buffer order, with
/// adjacent runs merged.
pub fn linear_runs(sel: &Selection, dims: &[u64]) -> Vec<Run> {
    let stride = strides(dims);
    let mut out: Vec<Run> = Vec::new();
    match sel {
        Selection::None => {}
        Selection::Points(points) => {
            for (i, p) in points.iter().enumerate() {
                let off = p.iter().zip(&stride).map(|(c, s)| c * s).sum();
                push_run(&mut out, off, i as u64, 1);
            }
        }
        Selection::All | Selection::Hyperslab(_) => {
            if dims.is_empty() {
                push_run(&mut out, 0, 0, 1);
            } else if let Some(hs) = sel.to_hyperslab(dims) {
                let segs: Vec<Vec<(u64, u64)>> = hs.iter().map(segments).collect();
                for_each_row(&segs, |coord, len| {
                    let off = coord.iter().zip(&stride).map(|(c, s)| c * s).sum();
                    let mem = ordinal(&hs, coord).unwrap_or(0);
                    push_run(&mut out, off, mem, len);
                });
            }
        }
    }
    out
}

/// Runs grouped by the chunk they fall in, keyed by scaled chunk coordinate.
/// Offsets are element offsets inside the chunk.
pub fn chunk_runs(sel: &Selection, dims: &[u64], chunk: &[u64]) -> BTreeMap<Vec<u64>, Vec<Run>> {
    let cstride = strides(chunk);
    let mut out: BTreeMap<Vec<u64>, Vec<Run>> = BTreeMap::new();
    match sel {
        Selection::None => {}
        Selection::Points(points) => {
            for (i, p) in points.iter().enumerate() {
                let scaled: Vec<u64> = p.iter().zip(chunk).map(|(c, d)| c / d).collect();
                let off = p
                    .iter()
                    .zip(chunk)
                    .zip(&cstride)
                    .map(|((c, d), s)| (c % d) * s)
                    .sum();
                out.entry(scaled).or_default().push(Run {
                    mem: i as u64,
                    off,
                    len: 1,
                });
            }
        }
        Selection::All | Selection::Hyperslab(_) => {
            let Some(hs) = sel.to_hyperslab(dims) else {
                return out;
            };
            let segs: Vec<Vec<(u64, u64)>> = hs.iter().map(segments).collect();
            if segs.iter().any(Vec::is_empty) {
                return out;
            }
            // Scaled chunk indices touched in each dimension.
            let touched: Vec<Vec<u64>> = segs
                .iter()
                .zip(chunk)
                .map(|(s, &c)| {
                    let mut v: Vec<u64> = Vec::new();
                    for &(lo, hi) in s {
                        let first = (lo / c).max(v.last().map_or(0, |&l| l + 1));
                        v.extend(first..=(hi - 1) / c);
                    }
                    v
                })
                .collect();
            let grid: Vec<u64> = touched.iter().map(|t| t.len() as u64).collect();
            let total: u64 = grid.iter().product();
            for i in 0..total {
                let pick = unravel(i, &grid);
                let scaled: Vec<u64> = pick
                    .iter()
                    .zip(&touched)
                    .map(|(&p, t)| t[p as usize])
                    .collect();
                let base: Vec<u64> = scaled.iter().zip(chunk).map(|(s, c)| s * c).collect();
                let local: Vec<Vec<(u64, u64)>> = segs
                    .iter()
                    .zip(base.iter().zip(chunk))
                    .map(|(s, (&b, &c))| clip(s, b, b + c))
                    .collect();
                let mut runs = Vec::new();
                for_each_row(&local, |coord, len| {
                    let off = coord
                        .iter()
                        .zip(&base)
                        .zip(&cstride)
                        .map(|((c, b), s)| (c - b) * s)
                        .sum();
                    let mem = ordinal(&hs, coord).unwrap_or(0);
                    runs.push(Run { mem, off, len });
                });
                if !runs.is_empty() {
                    out.insert(scaled, runs);
                }
            }
        }
    }
    out
}

/// Copy the box `[0, min(dims, limit))` of an array shaped `dims` from `src`
/// into an array of the same shape in `dst`. Used to carry the in-extent part
/// of a chunk into a fresh buffer.
pub(crate) fn copy_box(src: &[u8], dst: &mut [u8], shape: &[u64], limit: &[u64], elem: usize) {
    let segs: Vec<Vec<(u64, u64)>> = shape
        .iter()
        .zip(limit)
        .map(|(&s, &l)| {
            let e = s.min(l);
            if e == 0 {
                Vec::new()
            } else {
                vec![(0, e)]
            }
        })
        .collect();
    let stride = strides(shape);
    for_each_row(&segs, |coord, len| {
        let off: u64 = coord.iter().zip(&stride).map(|(c, s)| c * s).sum();
        let start = off as usize * elem;
        let end = start + len as usize * elem;
        dst[start..end].copy_from_slice(&src[start..end]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_merges_into_one_run() {
        let runs = linear_runs(&Selection::All, &[4, 5]);
        assert_eq!(runs, vec![Run { mem: 0, off: 0, len: 20 }]);
        assert_eq!(linear_runs(&Selection::All, &[]), vec![Run { mem: 0, off: 0, len: 1 }]);
    }

    #[test]
    fn block_rows() {
        let sel = Selection::block(&[1, 2], &[2, 3]);
        let runs = linear_runs(&sel, &[4, 10]);
        assert_eq!(
            runs,
            vec![Run { mem: 0, off: 12, len: 3 }, Run { mem: 3, off: 22, len: 3 }]
        );
    }

    #[test]
    fn strided_hyperslab_ordinals() {
        let sel = Selection::Hyperslab(vec![HyperslabDim {
            start: 1,
            stride: 4,
            count: 3,
            block: 2,
        }]);
        let runs = linear_runs(&sel, &[12]);
        assert_eq!(
            runs,
            vec![
                Run { mem: 0, off: 1, len: 2 },
                Run { mem: 2, off: 5, len: 2 },
                Run { mem: 4, off: 9, len: 2 },
            ]
        );
    }

    #[test]
    fn points_keep_their_order() {
        let sel = Selection::Points(vec![vec![3, 1], vec![0, 0]]);
        let runs = linear_runs(&sel, &[4, 4]);
        assert_eq!(
            runs,
            vec![Run { mem: 0, off: 13, len: 1 }, Run { mem: 1, off: 0, len: 1 }]
        );
    }

    #[test]
    fn chunk_grouping() {
        // 10x10 dataset, 4x4 chunks, select rows 2..6 and cols 3..5.
        let sel = Selection::block(&[2, 3], &[4, 2]);
        let groups = chunk_runs(&sel, &[10, 10], &[4, 4]);
        let keys: Vec<&Vec<u64>> = groups.keys().collect();
        assert_eq!(keys, vec![&vec![0, 0], &vec![0, 1], &vec![1, 0], &vec![1, 1]]);
        // Chunk (0,0) holds rows 2,3 col 3.
        assert_eq!(
            groups[&vec![0, 0]],
            vec![Run { mem: 0, off: 11, len: 1 }, Run { mem: 2, off: 15, len: 1 }]
        );
        // Chunk (1,1) holds rows 4,5 col 4.
        assert_eq!(
            groups[&vec![1, 1]],
            vec![Run { mem: 5, off: 0, len: 1 }, Run { mem: 7, off: 4, len: 1 }]
        );
        let total: u64 = groups.values().flatten().map(|r| r.len).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn ordinal_and_coord_agree() {
        let hs = vec![
            HyperslabDim { start: 0, stride: 3, count: 2, block: 2 },
            HyperslabDim::range(5, 4),
        ];
        for k in 0..16 {
            let c = coord_of(&hs, k);
            assert_eq!(ordinal(&hs, &c), Some(k));
        }
    }

    #[test]
    fn out_of_extent_is_bad_range() {
        let e = validate(&Selection::block(&[0], &[11]), &[10]).unwrap_err();
        assert_eq!(e.kind(), crate::ErrorKind::BadRange);
        let e = validate(&Selection::block(&[0, 0], &[1, 1]), &[10]).unwrap_err();
        assert_eq!(e.kind(), crate::ErrorKind::BadArgs);
    }

    #[test]
    fn copy_box_keeps_inner_part() {
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0xFFu8; 16];
        copy_box(&src, &mut dst, &[4, 4], &[2, 3], 1);
        assert_eq!(&dst[0..4], &[0, 1, 2, 0xFF]);
        assert_eq!(&dst[4..8], &[4, 5, 6, 0xFF]);
        assert_eq!(&dst[8..12], &[0xFF; 4]);
    }
}
