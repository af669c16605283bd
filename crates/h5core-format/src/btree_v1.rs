//! Version 1 B-tree ("TREE") holding raw-data chunk records (node type 1).
//!
//! Trees are written in one pass from a sorted record list: full leaves
//! first, then each parent level, with the root last. Every node occupies
//! the full `2K`-entry footprint so a reader may size it up front.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::codec::{put_addr, put_uint, Cursor};
use crate::error::FormatError;

pub const TREE_SIGNATURE: &[u8; 4] = b"TREE";

/// Node fan-out parameter for chunk trees; a node holds up to `2K` children.
pub const CHUNK_BTREE_K: usize = 32;

const NODE_TYPE_CHUNK: u8 = 1;

/// Key of one chunk: its stored size, filter mask and element offset per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub size: u32,
    pub filter_mask: u32,
    pub offsets: Vec<u64>,
}

/// A chunk record: key plus the chunk's file address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub key: ChunkKey,
    pub addr: u64,
}

fn key_size(rank: usize) -> usize {
    4 + 4 + (rank + 1) * 8
}

/// On-disk size of one node.
pub fn node_size(rank: usize, offset_size: u8) -> usize {
    let os = offset_size as usize;
    8 + 2 * os + 2 * CHUNK_BTREE_K * (key_size(rank) + os) + key_size(rank)
}

fn level_counts(n: usize) -> Vec<usize> {
    let fan = 2 * CHUNK_BTREE_K;
    let mut counts = Vec::new();
    let mut width = n;
    loop {
        let nodes = width.div_ceil(fan).max(1);
        counts.push(nodes);
        if nodes == 1 {
            break;
        }
        width = nodes;
    }
    counts
}

/// Bytes needed for a tree over `n` records; zero when there are none.
pub fn tree_size(n: usize, rank: usize, offset_size: u8) -> usize {
    if n == 0 {
        return 0;
    }
    level_counts(n).iter().sum::<usize>() * node_size(rank, offset_size)
}

fn put_key(buf: &mut Vec<u8>, key: &ChunkKey) {
    buf.extend_from_slice(&key.size.to_le_bytes());
    buf.extend_from_slice(&key.filter_mask.to_le_bytes());
    for &o in &key.offsets {
        buf.extend_from_slice(&o.to_le_bytes());
    }
    buf.extend_from_slice(&0u64.to_le_bytes());
}

/// Build a tree over `entries` (sorted by offsets) laid out from `base`.
/// Returns the encoded bytes, `tree_size` long, and the root address.
pub fn build_chunk_tree(
    entries: &[ChunkEntry],
    chunk_dims: &[u32],
    base: u64,
    offset_size: u8,
) -> (Vec<u8>, Option<u64>) {
    if entries.is_empty() {
        return (Vec::new(), None);
    }
    let rank = chunk_dims.len();
    let nsize = node_size(rank, offset_size);
    let fan = 2 * CHUNK_BTREE_K;
    let counts = level_counts(entries.len());
    let mut out = Vec::with_capacity(counts.iter().sum::<usize>() * nsize);

    // Right bound of the last chunk: its offsets plus one tile.
    let last = &entries[entries.len() - 1].key;
    let upper = ChunkKey {
        size: 0,
        filter_mask: 0,
        offsets: last
            .offsets
            .iter()
            .zip(chunk_dims)
            .map(|(&o, &d)| o + d as u64)
            .collect(),
    };

    // (first key, address) of each node on the level just built.
    let mut level: Vec<(ChunkKey, u64)> = entries.iter().map(|e| (e.key.clone(), e.addr)).collect();
    let mut next_addr = base;
    for (depth, &nodes) in counts.iter().enumerate() {
        let mut parents = Vec::with_capacity(nodes);
        let groups: Vec<&[(ChunkKey, u64)]> = level.chunks(fan).collect();
        for (i, group) in groups.iter().enumerate() {
            let addr = next_addr;
            next_addr += nsize as u64;
            let start = out.len();
            out.extend_from_slice(TREE_SIGNATURE);
            out.push(NODE_TYPE_CHUNK);
            out.push(depth as u8);
            out.extend_from_slice(&(group.len() as u16).to_le_bytes());
            let left = (i > 0).then(|| addr - nsize as u64);
            let right = (i + 1 < groups.len()).then(|| addr + nsize as u64);
            put_addr(&mut out, left, offset_size);
            put_addr(&mut out, right, offset_size);
            for (key, child) in group.iter() {
                put_key(&mut out, key);
                put_uint(&mut out, *child, offset_size as usize);
            }
            let right_key = match groups.get(i + 1) {
                Some(next) => &next[0].0,
                None => &upper,
            };
            put_key(&mut out, right_key);
            out.resize(start + nsize, 0);
            parents.push((group[0].0.clone(), addr));
        }
        level = parents;
    }
    let root = level.first().map(|(_, a)| *a);
    (out, root)
}

/// A decoded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkNode {
    pub level: u8,
    /// Left key and child address of each entry.
    pub entries: Vec<ChunkEntry>,
}

pub fn decode_chunk_node(data: &[u8], rank: usize, offset_size: u8) -> Result<ChunkNode, FormatError> {
    let mut cur = Cursor::new(data);
    if cur.bytes(4)? != TREE_SIGNATURE {
        return Err(FormatError::InvalidSignature("TREE"));
    }
    let node_type = cur.u8()?;
    if node_type != NODE_TYPE_CHUNK {
        return Err(FormatError::InvalidField {
            what: "B-tree node type",
            value: node_type as u64,
        });
    }
    let level = cur.u8()?;
    let used = cur.u16()? as usize;
    cur.skip(2 * offset_size as usize)?;
    let mut entries = Vec::with_capacity(used);
    for _ in 0..used {
        let size = cur.u32()?;
        let filter_mask = cur.u32()?;
        let mut offsets = Vec::with_capacity(rank);
        for _ in 0..rank {
            offsets.push(cur.u64()?);
        }
        cur.skip(8)?;
        let addr = cur.addr(offset_size)?.ok_or(FormatError::InvalidField {
            what: "B-tree child address",
            value: u64::MAX,
        })?;
        entries.push(ChunkEntry {
            key: ChunkKey {
                size,
                filter_mask,
                offsets,
            },
            addr,
        });
    }
    Ok(ChunkNode { level, entries })
}

/// Walk the tree at `root`, reading nodes through `read(addr, len)`, and
/// return every leaf record in key order.
pub fn collect_chunk_entries<E, F>(
    root: u64,
    rank: usize,
    offset_size: u8,
    mut read: F,
) -> Result<Vec<ChunkEntry>, E>
where
    E: From<FormatError>,
    F: FnMut(u64, usize) -> Result<Vec<u8>, E>,
{
    let nsize = node_size(rank, offset_size);
    let mut out = Vec::new();
    let mut stack = vec![root];
    let mut visited = 0usize;
    while let Some(addr) = stack.pop() {
        visited += 1;
        if visited > 1 << 24 {
            return Err(FormatError::InvalidField {
                what: "B-tree node count",
                value: visited as u64,
            }
            .into());
        }
        let bytes = read(addr, nsize)?;
        let node = decode_chunk_node(&bytes, rank, offset_size)?;
        if node.level == 0 {
            out.extend(node.entries);
        } else {
            // Reverse so the leftmost child is visited first.
            stack.extend(node.entries.iter().rev().map(|e| e.addr));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: u64) -> Vec<ChunkEntry> {
        (0..n)
            .map(|i| ChunkEntry {
                key: ChunkKey {
                    size: 64,
                    filter_mask: (i % 2) as u32,
                    offsets: vec![i * 4, 0],
                },
                addr: 0x10_000 + i * 64,
            })
            .collect()
    }

    fn read_from(blob: &[u8], base: u64) -> impl FnMut(u64, usize) -> Result<Vec<u8>, FormatError> + '_ {
        move |addr, len| {
            let start = (addr - base) as usize;
            Ok(blob[start..start + len].to_vec())
        }
    }

    #[test]
    fn node_size_matches_k32() {
        // 2-D chunk keys are 4 + 4 + 3 * 8 = 32 bytes.
        assert_eq!(node_size(2, 8), 8 + 16 + 64 * 40 + 32);
    }

    #[test]
    fn single_leaf() {
        let e = entries(5);
        let (blob, root) = build_chunk_tree(&e, &[4, 4], 0x800, 8);
        assert_eq!(blob.len(), tree_size(5, 2, 8));
        assert_eq!(root, Some(0x800));
        let got = collect_chunk_entries(0x800, 2, 8, read_from(&blob, 0x800)).unwrap();
        assert_eq!(got, e);
    }

    #[test]
    fn multi_level_tree_preserves_order() {
        let e = entries(200);
        let base = 0x4000;
        let (blob, root) = build_chunk_tree(&e, &[4, 4], base, 8);
        // 4 leaves + 1 root
        assert_eq!(blob.len(), 5 * node_size(2, 8));
        let root = root.unwrap();
        assert_eq!(root, base + 4 * node_size(2, 8) as u64);
        let node = decode_chunk_node(&blob[(root - base) as usize..], 2, 8).unwrap();
        assert_eq!(node.level, 1);
        assert_eq!(node.entries.len(), 4);
        let got = collect_chunk_entries(root, 2, 8, read_from(&blob, base)).unwrap();
        assert_eq!(got, e);
    }

    #[test]
    fn empty_tree_has_no_root() {
        let (blob, root) = build_chunk_tree(&[], &[4], 0, 8);
        assert!(blob.is_empty());
        assert_eq!(root, None);
        assert_eq!(tree_size(0, 1, 8), 0);
    }

    #[test]
    fn wrong_signature() {
        assert_eq!(
            decode_chunk_node(&[0u8; 64], 1, 8),
            Err(FormatError::InvalidSignature("TREE"))
        );
    }
}
