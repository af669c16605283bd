//! Raw data stored in external files.
//!
//! The logical byte stream of the dataset maps sequentially onto the
//! segment list. Each request opens the files it touches through the sec2
//! driver and closes them again; nothing is held open between calls.

use std::path::{Path, PathBuf};

use h5core_format::external_file_list::{EflSlot, ExternalFileListMessage, EFL_UNLIMITED};
use h5core_format::local_heap::{LocalHeapData, LocalHeapHeader};
use h5core_format::{LENGTH_SIZE, OFFSET_SIZE};
use h5core_io::{OpenFlags, Sec2Driver, Vfd, MAX_ADDR};
use tracing::trace;

use crate::context::IoCtx;
use crate::error::{bail, Component, Result, ResultExt};
use crate::props::ExternalFile;

#[derive(Debug, Clone)]
pub struct ExternalStorage {
    files: Vec<ExternalFile>,
    prefix: Option<PathBuf>,
    /// Local heap holding the file names, once written.
    heap: Option<(u64, u64)>,
}

impl ExternalStorage {
    pub fn new(files: Vec<ExternalFile>, prefix: Option<PathBuf>) -> Result<ExternalStorage> {
        if files.is_empty() {
            bail!(BadArgs, "external file list is empty");
        }
        if let Some(pos) = files[..files.len() - 1]
            .iter()
            .position(|f| f.size == EFL_UNLIMITED)
        {
            bail!(
                BadArgs,
                "only the last external segment may be unlimited (segment {pos} is)"
            );
        }
        for f in &files {
            if f.name.is_empty() {
                bail!(BadArgs, "external file name is empty");
            }
        }
        Ok(ExternalStorage {
            files,
            prefix,
            heap: None,
        })
    }

    pub fn files(&self) -> &[ExternalFile] {
        &self.files
    }

    pub fn prefix(&self) -> Option<&Path> {
        self.prefix.as_deref()
    }

    /// Bytes the segments can hold; `u64::MAX` when the last one is unlimited.
    pub fn capacity(&self) -> u64 {
        self.files.iter().fold(0u64, |acc, f| {
            if f.size == EFL_UNLIMITED {
                u64::MAX
            } else {
                acc.saturating_add(f.size)
            }
        })
    }

    /// Where a segment's file lives on disk.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        match &self.prefix {
            Some(prefix) if path.is_relative() => prefix.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// `(segment, offset within segment, length)` pieces covering
    /// `len` bytes of the logical stream from `off`.
    fn pieces(&self, mut off: u64, mut len: u64) -> Result<Vec<(usize, u64, u64)>> {
        let mut out = Vec::new();
        let mut seg_start = 0u64;
        for (i, f) in self.files.iter().enumerate() {
            if len == 0 {
                break;
            }
            let seg_end = if f.size == EFL_UNLIMITED {
                u64::MAX
            } else {
                seg_start.saturating_add(f.size)
            };
            if off < seg_end {
                let n = len.min(seg_end - off);
                out.push((i, off - seg_start, n));
                off += n;
                len -= n;
            }
            seg_start = seg_end;
        }
        if len > 0 {
            bail!(
                BadRange,
                "external storage ends before byte {}",
                off.saturating_add(len)
            );
        }
        Ok(out)
    }

    pub fn read(&self, off: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0usize;
        for (i, seg_off, n) in self.pieces(off, buf.len() as u64)? {
            let f = &self.files[i];
            let path = self.resolve(&f.name);
            let addr = f.offset + seg_off;
            trace!(path = %path.display(), addr, len = n, "external read");
            let mut drv = Sec2Driver::open(&path, OpenFlags::RDONLY, MAX_ADDR).within(Component::Vfd)?;
            let dst = &mut buf[pos..pos + n as usize];
            drv.set_eoa(addr + n).within(Component::Vfd)?;
            drv.read(addr, dst).within(Component::Vfd)?;
            Box::new(drv).close().within(Component::Vfd)?;
            pos += n as usize;
        }
        Ok(())
    }

    pub fn write(&self, off: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        for (i, seg_off, n) in self.pieces(off, data.len() as u64)? {
            let f = &self.files[i];
            let path = self.resolve(&f.name);
            let addr = f.offset + seg_off;
            trace!(path = %path.display(), addr, len = n, "external write");
            let mut drv = Sec2Driver::open(&path, OpenFlags::RDWR | OpenFlags::CREAT, MAX_ADDR)
                .within(Component::Vfd)?;
            let eoa = drv.get_eof().max(addr + n);
            drv.set_eoa(eoa).within(Component::Vfd)?;
            drv.write(addr, &data[pos..pos + n as usize])
                .within(Component::Vfd)?;
            Box::new(drv).close().within(Component::Vfd)?;
            pos += n as usize;
        }
        Ok(())
    }

    /// Write the name heap if needed and return the header message.
    pub fn message(&mut self, ctx: &IoCtx<'_>) -> Result<ExternalFileListMessage> {
        let mut heap = LocalHeapData::new();
        let offsets: Vec<u64> = self.files.iter().map(|f| heap.insert(&f.name)).collect();
        let heap_addr = match self.heap {
            Some((addr, _)) => addr,
            None => {
                let hsize = LocalHeapHeader::encoded_size(OFFSET_SIZE, LENGTH_SIZE) as u64;
                let total = hsize + heap.len() as u64;
                let addr = ctx.alloc(total)?;
                let header = LocalHeapHeader {
                    data_size: heap.len() as u64,
                    data_addr: addr + hsize,
                };
                let mut bytes = header.encode(OFFSET_SIZE, LENGTH_SIZE);
                bytes.extend_from_slice(heap.as_bytes());
                ctx.write(addr, &bytes)?;
                self.heap = Some((addr, total));
                addr
            }
        };
        Ok(ExternalFileListMessage {
            heap_addr: Some(heap_addr),
            slots: self
                .files
                .iter()
                .zip(offsets)
                .map(|(f, name_offset)| EflSlot {
                    name_offset,
                    file_offset: f.offset,
                    size: f.size,
                })
                .collect(),
        })
    }

    /// Rebuild from a decoded message, reading names from its heap.
    pub fn load(
        ctx: &IoCtx<'_>,
        msg: &ExternalFileListMessage,
        prefix: Option<PathBuf>,
    ) -> Result<ExternalStorage> {
        let Some(heap_addr) = msg.heap_addr else {
            bail!(Corrupt, "external file list has no name heap");
        };
        let hsize = LocalHeapHeader::encoded_size(OFFSET_SIZE, LENGTH_SIZE);
        let header = LocalHeapHeader::decode(&ctx.read_vec(heap_addr, hsize)?, OFFSET_SIZE, LENGTH_SIZE)
            .within(Component::Layout)?;
        let heap = LocalHeapData::from_bytes(ctx.read_vec(header.data_addr, header.data_size as usize)?);
        let mut files = Vec::with_capacity(msg.slots.len());
        for slot in &msg.slots {
            files.push(ExternalFile {
                name: heap.get(slot.name_offset).within(Component::Layout)?,
                offset: slot.file_offset,
                size: slot.size,
            });
        }
        let mut storage = ExternalStorage::new(files, prefix)?;
        storage.heap = Some((heap_addr, hsize as u64 + header.data_size));
        Ok(storage)
    }

    /// Release the name heap.
    pub fn free(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        if let Some((addr, size)) = self.heap.take() {
            ctx.free(addr, size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str, offset: u64, size: u64) -> ExternalFile {
        ExternalFile {
            name: name.into(),
            offset,
            size,
        }
    }

    #[test]
    fn pieces_span_segments() {
        let efl = ExternalStorage::new(vec![seg("a", 0, 10), seg("b", 100, 10)], None).unwrap();
        assert_eq!(efl.pieces(5, 10).unwrap(), vec![(0, 5, 5), (1, 0, 5)]);
        assert!(efl.pieces(15, 10).is_err());
        assert_eq!(efl.capacity(), 20);
    }

    #[test]
    fn unlimited_only_last() {
        assert!(ExternalStorage::new(vec![seg("a", 0, EFL_UNLIMITED), seg("b", 0, 1)], None).is_err());
        let efl = ExternalStorage::new(vec![seg("a", 0, 4), seg("b", 0, EFL_UNLIMITED)], None).unwrap();
        assert_eq!(efl.capacity(), u64::MAX);
        assert_eq!(efl.pieces(2, 100).unwrap(), vec![(0, 2, 2), (1, 0, 98)]);
    }

    #[test]
    fn files_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let efl = ExternalStorage::new(
            vec![seg("one.raw", 16, 8), seg("two.raw", 0, 8)],
            Some(dir.path().to_path_buf()),
        )
        .unwrap();
        let data: Vec<u8> = (0..16).collect();
        efl.write(0, &data).unwrap();
        let mut back = vec![0u8; 12];
        efl.read(4, &mut back).unwrap();
        assert_eq!(back, data[4..].to_vec());
        assert_eq!(std::fs::metadata(dir.path().join("one.raw")).unwrap().len(), 24);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let efl = ExternalStorage::new(vec![seg("absent.raw", 0, 8)], Some(dir.path().to_path_buf())).unwrap();
        let mut buf = [0u8; 4];
        assert!(efl.read(0, &mut buf).is_err());
    }
}
