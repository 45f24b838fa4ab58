//! Chunk stack
//!
//! Every chunk starts with an 8 byte header followed by its payload:
//!
//! | Field       | Type   | Description |
//! | ----------- | ------ | ----------- |
//! | encoded_len | i32 BE | Payload bytes as stored |
//! | raw_len     | i32 BE | Payload bytes once decoded, negated if compressed |
//!
//! Headers are never encrypted so chunks can be skipped without the password.
//! While writing, the header is a zeroed placeholder until the chunk closes
//! and the real sizes are known, then it is backpatched in place.
use std::io::{Cursor, Read, Seek, Write};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace, warn};

use crate::codec::{Filter, Inflate};
use crate::error::{PackError, Result};
use crate::pack::{Medium, Pack};

pub(crate) const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    pub encoded_len: u32,
    pub raw_len: u32,
    pub compressed: bool,
}

impl ChunkHeader {
    pub fn new(encoded_len: u64, raw_len: u64, compressed: bool) -> Result<Self> {
        let fit = |len: u64| {
            if len > i32::MAX as u64 {
                Err(PackError::HeaderOverflow(len))
            } else {
                Ok(len as u32)
            }
        };

        Ok(ChunkHeader {
            encoded_len: fit(encoded_len)?,
            raw_len: fit(raw_len)?,
            compressed,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let raw = if self.compressed {
            -(self.raw_len as i32)
        } else {
            self.raw_len as i32
        };

        let mut buf = [0u8; HEADER_LEN];
        BigEndian::write_i32(&mut buf[0..4], self.encoded_len as i32);
        BigEndian::write_i32(&mut buf[4..8], raw);
        buf
    }

    /// `offset` is only used for error reporting
    pub fn decode(buf: &[u8; HEADER_LEN], offset: u64) -> Result<Self> {
        let corrupt = |reason| PackError::Corrupt { offset, reason };

        let encoded = BigEndian::read_i32(&buf[0..4]);
        let raw = BigEndian::read_i32(&buf[4..8]);

        if encoded < 0 {
            return Err(corrupt("negative payload size"));
        }
        if raw == i32::MIN {
            return Err(corrupt("raw size out of range"));
        }

        let header = ChunkHeader {
            encoded_len: encoded as u32,
            raw_len: raw.unsigned_abs(),
            compressed: raw < 0,
        };

        if !header.compressed && header.encoded_len != header.raw_len {
            return Err(corrupt("stored chunk sizes disagree"));
        }
        Ok(header)
    }
}

/// Token for an open chunk, hand it back to [`Pack::close_chunk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId {
    depth: usize,
    serial: u64,
}

impl ChunkId {
    /// Number of chunks that were open around this one
    pub fn depth(&self) -> usize {
        self.depth
    }
}

pub(crate) struct ChunkContext {
    pub serial: u64,

    // Positions in the parent medium
    pub header_at: u64,
    pub start: u64,
    pub end: u64,

    pub filter: Filter,

    // Decoded bytes moved through this chunk
    pub count: u64,
}

impl<S: Read + Write + Seek> Pack<S> {
    /// Open a chunk at the current position, nested in the innermost open one
    ///
    /// When reading, the stored header decides whether the payload is
    /// decoded; `compressed` is only compared against it. A compressed
    /// payload is decoded a window at a time as it is read, only the first
    /// window is decoded here.
    pub fn open_chunk(&mut self, compressed: bool) -> Result<ChunkId> {
        self.guard(|p| p.open_chunk_inner(compressed))
    }

    /// Close the innermost chunk, `id` must be the one [`Pack::open_chunk`]
    /// returned for it. When writing this finalizes the payload and
    /// backpatches the header, when reading it skips what was not consumed.
    pub fn close_chunk(&mut self, id: ChunkId) -> Result<()> {
        self.guard(|p| p.close_chunk_inner(id))
    }

    /// Jump over the next `n` chunks of the current level without decoding
    /// or decrypting them
    pub fn skip_chunks(&mut self, n: usize) -> Result<()> {
        self.guard(|p| p.skip_chunks_inner(n))
    }

    /// Run `f` inside a fresh chunk, the chunk (and anything `f` left open in
    /// it) is closed whether or not `f` succeeds. `f` may close the chunk
    /// itself.
    pub fn with_chunk<T, F>(&mut self, compressed: bool, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let id = self.open_chunk(compressed)?;
        let res = f(self);
        let closed = self.close_through(id);

        let value = res?;
        closed?;
        Ok(value)
    }

    pub fn depth(&self) -> usize {
        self.chunks.len()
    }

    fn open_chunk_inner(&mut self, compressed: bool) -> Result<ChunkId> {
        self.check_open()?;
        if let Some(kind) = self.error {
            return Err(PackError::Latched(kind));
        }

        self.pushback = None;
        let view = self.view();
        let header_at = self.medium_pos(view.medium)?;

        let ctx = if self.mode.is_read() {
            let left = view.end.saturating_sub(header_at);
            let header = self
                .next_header(view.medium, header_at, left)?
                .ok_or(PackError::MissingChunks { wanted: 1, found: 0 })?;

            if header.compressed != compressed {
                warn!(
                    "chunk at {} is stored {}, opening it as stored",
                    header_at,
                    if header.compressed { "compressed" } else { "uncompressed" }
                );
            }

            let start = header_at + HEADER_LEN as u64;
            let end = start + header.encoded_len as u64;

            let filter = if header.compressed {
                let dec = self.codec.decoder().map_err(PackError::Decode)?;
                let len = Some(header.raw_len as u64);
                Filter::Inflate(Inflate::new(dec, self.window, (start, end), len))
            } else {
                Filter::Identity
            };

            ChunkContext {
                serial: self.serial,
                header_at,
                start,
                end,
                filter,
                count: 0,
            }
        } else {
            self.medium_write(view.medium, &[0u8; HEADER_LEN], false)?;

            let start = header_at + HEADER_LEN as u64;
            self.mark_written(start);

            ChunkContext {
                serial: self.serial,
                header_at,
                start,
                end: start,
                filter: if compressed {
                    Filter::Spool(Cursor::new(Vec::new()))
                } else {
                    Filter::Identity
                },
                count: 0,
            }
        };

        let id = ChunkId {
            depth: self.chunks.len(),
            serial: self.serial,
        };
        self.serial += 1;

        debug!(
            "open chunk #{} depth {} at {} ({} payload bytes, {})",
            id.serial,
            id.depth,
            ctx.header_at,
            ctx.end - ctx.start,
            if ctx.filter.is_packed() { "packed" } else { "stored" }
        );

        let (decoding, end) = (matches!(ctx.filter, Filter::Inflate(_)), ctx.end);
        self.chunks.push(ctx);

        // A bad frame fails the open rather than the first read
        if decoding {
            if let Err(e) = self.refill(Medium::Chunk(id.depth)) {
                self.chunks.pop();
                self.medium_seek(view.medium, end)?;
                return Err(e);
            }
        }

        self.update_eof();
        Ok(id)
    }

    fn close_chunk_inner(&mut self, id: ChunkId) -> Result<()> {
        self.check_open()?;
        match self.chunks.last() {
            None => return Err(PackError::Usage("no chunk is open")),
            Some(top) if top.serial != id.serial => {
                return Err(PackError::Usage("chunk is not the innermost open chunk"))
            }
            Some(_) => (),
        }

        // Popped first, a failure below still closes the chunk
        let ctx = self.chunks.pop().ok_or(PackError::Usage("no chunk is open"))?;
        self.pushback = None;
        let view = self.view();

        let end = if self.mode.is_read() {
            debug!(
                "close chunk #{} depth {}, {} bytes read",
                id.serial, id.depth, ctx.count
            );
            ctx.end
        } else {
            let (encoded, raw_len) = match ctx.filter {
                Filter::Identity => (None, ctx.end - ctx.start),
                Filter::Spool(buf) => {
                    let raw = buf.into_inner();
                    if raw.is_empty() {
                        // Zero can't carry the compressed sign, store it plain
                        (None, 0)
                    } else {
                        let encoded = self.codec.encode(&raw).map_err(PackError::Encode)?;
                        (Some(encoded), raw.len() as u64)
                    }
                }
                Filter::Inflate(_) => return Err(PackError::Usage("compressed data is read only")),
            };

            let header = match &encoded {
                Some(enc) => ChunkHeader::new(enc.len() as u64, raw_len, true)?,
                None => ChunkHeader::new(raw_len, raw_len, false)?,
            };

            if let Some(enc) = &encoded {
                self.medium_seek(view.medium, ctx.start)?;
                self.medium_write(view.medium, enc, true)?;
            }
            self.medium_patch(view.medium, ctx.header_at, &header.encode())?;

            debug!(
                "close chunk #{} depth {}, {} raw bytes stored as {}",
                id.serial, id.depth, header.raw_len, header.encoded_len
            );
            ctx.start + header.encoded_len as u64
        };

        self.medium_seek(view.medium, end)?;
        if self.mode.is_write() {
            self.mark_written(end);
        }
        self.update_eof();
        Ok(())
    }

    fn skip_chunks_inner(&mut self, n: usize) -> Result<()> {
        self.check_read()?;
        self.pushback = None;
        let view = self.view();

        for found in 0..n {
            let at = self.medium_pos(view.medium)?;
            let left = view.end.saturating_sub(at);

            let header = self
                .next_header(view.medium, at, left)?
                .ok_or(PackError::MissingChunks { wanted: n, found })?;

            let next = at + HEADER_LEN as u64 + header.encoded_len as u64;
            trace!("skip chunk at {}, next at {}", at, next);
            self.medium_seek(view.medium, next)?;
        }

        self.update_eof();
        Ok(())
    }

    // Close every chunk from the innermost down to and including `id`,
    // nothing to do when it is already closed
    fn close_through(&mut self, id: ChunkId) -> Result<()> {
        match self.chunks.get(id.depth) {
            Some(ctx) if ctx.serial == id.serial => (),
            _ => {
                trace!("chunk #{} was closed inside its closure", id.serial);
                return Ok(());
            }
        }

        let mut res = Ok(());
        while self.chunks.len() > id.depth {
            let top = self
                .top_id()
                .ok_or(PackError::Usage("no chunk is open"))?;

            if top != id {
                warn!("closing chunk #{} left open inside #{}", top.serial, id.serial);
            }
            if let Err(e) = self.close_chunk(top) {
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }

    pub(crate) fn top_id(&self) -> Option<ChunkId> {
        self.chunks.last().map(|ctx| ChunkId {
            depth: self.chunks.len() - 1,
            serial: ctx.serial,
        })
    }

    // Read the header at `at`, `None` when the view has nothing left
    fn next_header(
        &mut self,
        medium: Medium,
        at: u64,
        left: u64,
    ) -> Result<Option<ChunkHeader>> {
        if left == 0 {
            return Ok(None);
        }

        let truncated = PackError::Corrupt {
            offset: at,
            reason: "truncated chunk header",
        };
        if left < HEADER_LEN as u64 {
            return Err(truncated);
        }

        let mut buf = [0u8; HEADER_LEN];
        if self.medium_read(medium, &mut buf, false)? < HEADER_LEN {
            return Err(truncated);
        }

        let header = ChunkHeader::decode(&buf, at)?;
        if header.encoded_len as u64 > left - HEADER_LEN as u64 {
            return Err(PackError::Corrupt {
                offset: at,
                reason: "chunk overruns its parent",
            });
        }
        Ok(Some(header))
    }
}

#[cfg(test)]
mod test_chunk_header {
    use super::*;

    #[test]
    fn stored_layout() {
        let header = ChunkHeader::new(5, 5, false).unwrap();
        assert_eq!(header.encode(), [0, 0, 0, 5, 0, 0, 0, 5]);
    }

    #[test]
    fn compressed_is_negated() {
        let header = ChunkHeader::new(0x10, 0x200, true).unwrap();
        let buf = header.encode();

        assert_eq!(buf, [0, 0, 0, 0x10, 0xFF, 0xFF, 0xFE, 0x00]);
        assert_eq!(ChunkHeader::decode(&buf, 0).unwrap(), header);
    }

    #[test]
    fn overflow() {
        let too_big = i32::MAX as u64 + 1;

        assert!(matches!(
            ChunkHeader::new(too_big, 1, true),
            Err(PackError::HeaderOverflow(n)) if n == too_big
        ));
        assert!(matches!(
            ChunkHeader::new(1, too_big, true),
            Err(PackError::HeaderOverflow(_))
        ));
        assert!(ChunkHeader::new(i32::MAX as u64, i32::MAX as u64, false).is_ok());
    }

    #[test]
    fn negative_payload_is_corrupt() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 1];
        assert!(matches!(
            ChunkHeader::decode(&buf, 12),
            Err(PackError::Corrupt { offset: 12, .. })
        ));
    }

    #[test]
    fn stored_size_mismatch_is_corrupt() {
        let buf = [0, 0, 0, 4, 0, 0, 0, 5];
        assert!(matches!(
            ChunkHeader::decode(&buf, 0),
            Err(PackError::Corrupt { .. })
        ));
    }

    #[test]
    fn min_raw_is_corrupt() {
        let buf = [0, 0, 0, 4, 0x80, 0, 0, 0];
        assert!(ChunkHeader::decode(&buf, 0).is_err());
    }
}
