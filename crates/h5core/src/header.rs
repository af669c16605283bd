//! Object headers as allocated blocks of file space.
//!
//! A header is written once with room to spare and rewritten in place as its
//! messages change. Messages that no longer fit chunk 0 move to a single
//! continuation chunk, which is reallocated whenever its size changes.

use h5core_format::object_header::{
    decode_chunk, initial_capacity, HeaderPrefix, HeaderWriter, RawMessage, PREFIX_LEN,
};
use h5core_format::{LENGTH_SIZE, OFFSET_SIZE};
use tracing::trace;

use crate::error::{bail, Result};
use crate::file::FileIo;

/// Continuation chains longer than this are treated as corrupt.
const MAX_CHUNKS: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct ObjectHeader {
    pub addr: u64,
    pub version: u8,
    capacity: usize,
    chunk0_size: u64,
    /// Address and length of the continuation chunk.
    cont: Option<(u64, u64)>,
}

impl ObjectHeader {
    fn writer(&self) -> HeaderWriter {
        HeaderWriter {
            version: self.version,
            chunk0_capacity: self.capacity,
            offset_size: OFFSET_SIZE,
            length_size: LENGTH_SIZE,
        }
    }

    /// Allocate and write a new header holding `msgs`.
    pub fn create(
        io: &mut FileIo,
        version: u8,
        msgs: &[RawMessage],
        minimized: bool,
    ) -> Result<ObjectHeader> {
        let capacity = initial_capacity(version, msgs, minimized, OFFSET_SIZE, LENGTH_SIZE);
        let mut header = ObjectHeader {
            addr: 0,
            version,
            capacity,
            chunk0_size: 0,
            cont: None,
        };
        let writer = header.writer();
        let plan = writer.plan(msgs)?;
        let (chunk0, _) = writer.encode(msgs, &plan, None)?;
        header.chunk0_size = chunk0.len() as u64;
        header.addr = io.alloc(header.chunk0_size)?;
        io.write(header.addr, &chunk0)?;
        trace!(addr = header.addr, version, capacity, "object header created");
        Ok(header)
    }

    /// Replace the header's messages.
    pub fn rewrite(&mut self, io: &mut FileIo, msgs: &[RawMessage]) -> Result<()> {
        let writer = self.writer();
        let plan = writer.plan(msgs)?;
        let cont_addr = match (plan.continuation_len, self.cont) {
            (Some(len), Some((addr, old))) if old == len => Some(addr),
            (Some(len), old) => {
                if let Some((addr, old_len)) = old {
                    io.free(addr, old_len)?;
                }
                Some(io.alloc(len)?)
            }
            (None, Some((addr, old_len))) => {
                io.free(addr, old_len)?;
                None
            }
            (None, None) => None,
        };
        self.cont = cont_addr.zip(plan.continuation_len);
        let (chunk0, cont) = writer.encode(msgs, &plan, cont_addr)?;
        if chunk0.len() as u64 != self.chunk0_size {
            bail!(
                Corrupt,
                "object header at {} changed size from {} to {}",
                self.addr,
                self.chunk0_size,
                chunk0.len()
            );
        }
        io.write(self.addr, &chunk0)?;
        if let (Some(bytes), Some(addr)) = (cont, cont_addr) {
            io.write(addr, &bytes)?;
        }
        trace!(addr = self.addr, messages = msgs.len(), split = plan.split, "object header rewritten");
        Ok(())
    }

    /// Read the header at `addr`, following continuation chunks.
    pub fn read(io: &mut FileIo, addr: u64) -> Result<(ObjectHeader, Vec<RawMessage>)> {
        let head = io.read_vec(addr, PREFIX_LEN)?;
        let prefix = HeaderPrefix::decode(&head)?;
        let chunk0 = io.read_vec(addr, prefix.chunk0_total())?;
        let contents = decode_chunk(&prefix, &chunk0, true, OFFSET_SIZE, LENGTH_SIZE)?;
        let mut messages = contents.messages;
        let mut pending = contents.continuations;
        let mut cont = None;
        let mut visited = 0;
        while !pending.is_empty() {
            visited += 1;
            if visited > MAX_CHUNKS {
                bail!(Corrupt, "object header at {addr} has too many continuation chunks");
            }
            let (caddr, clen) = pending.remove(0);
            let data = io.read_vec(caddr, clen as usize)?;
            let more = decode_chunk(&prefix, &data, false, OFFSET_SIZE, LENGTH_SIZE)?;
            messages.extend(more.messages);
            pending.extend(more.continuations);
            cont = Some((caddr, clen));
        }
        let header = ObjectHeader {
            addr,
            version: prefix.version,
            capacity: prefix.chunk0_len,
            chunk0_size: chunk0.len() as u64,
            cont,
        };
        Ok((header, messages))
    }

    /// Return the header's space to the allocator.
    pub fn free(&self, io: &mut FileIo) -> Result<()> {
        if let Some((addr, len)) = self.cont {
            io.free(addr, len)?;
        }
        io.free(self.addr, self.chunk0_size)
    }
}
