//! Buffered, position tracked access to the underlying stream
//!
//! Everything that reaches the real file goes through [`RawStream`]. It keeps
//! a logical position (where the next byte is read or written) apart from the
//! physical position of the inner stream so that a run of small reads or
//! writes turns into few large inner calls and no needless seeks.
//!
//! The cipher is applied here, at the physical boundary, keyed by the
//! absolute offset of each byte. Callers say per call whether the bytes are
//! payload (`crypt = true`) or structure such as chunk headers, which are
//! always stored in the clear so that chunks can be skipped without the
//! password.
use std::cmp;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::trace;

use crate::cipher::Cipher;

/// Read until `buf` is full or the reader runs dry, returns `(eof, len)`
pub fn fill_buf<R: Read>(data: &mut R, buf: &mut [u8]) -> io::Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Ok((true, buf_read)),
            Ok(x) => buf_read += x,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

pub(crate) struct RawStream<S> {
    inner: S,
    cipher: Cipher,
    capacity: usize,

    // Logical position, physical position of `inner`, bytes known to exist
    pos: u64,
    phys: u64,
    len: u64,

    // Read window, raw (still encrypted) bytes starting at `rbuf_at`
    rbuf: Vec<u8>,
    rbuf_at: u64,

    // Pending writes, already encrypted, starting at `wbuf_at`
    wbuf: Vec<u8>,
    wbuf_at: u64,
}

impl<S: Read + Write + Seek> RawStream<S> {
    /// `inner` must currently sit at `pos`
    pub fn new(inner: S, cipher: Cipher, capacity: usize, pos: u64, len: u64) -> Self {
        let capacity = cmp::max(capacity, 1);

        RawStream {
            inner,
            cipher,
            capacity,
            pos,
            phys: pos,
            len,
            rbuf: Vec::with_capacity(capacity),
            rbuf_at: 0,
            wbuf: Vec::with_capacity(capacity),
            wbuf_at: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Length of the stream as far as this handle knows
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn set_cipher(&mut self, cipher: Cipher) {
        self.cipher = cipher;
    }

    /// Move the logical position, the inner stream is only sought once data
    /// actually has to move.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Read up to `out.len()` bytes, stops short at the end of the stream
    pub fn read(&mut self, out: &mut [u8], crypt: bool) -> io::Result<usize> {
        let mut done = 0;

        while done < out.len() && self.pos < self.len {
            let window_end = self.rbuf_at + self.rbuf.len() as u64;
            if self.pos < self.rbuf_at || self.pos >= window_end {
                self.refill()?;

                if self.rbuf.is_empty() {
                    // Inner stream is shorter than it claimed to be
                    break;
                }
            }

            let off = (self.pos - self.rbuf_at) as usize;
            let n = cmp::min(out.len() - done, self.rbuf.len() - off);

            let dst = &mut out[done..done + n];
            dst.copy_from_slice(&self.rbuf[off..off + n]);
            if crypt {
                self.cipher.apply(self.pos, dst);
            }

            self.pos += n as u64;
            done += n;
        }

        Ok(done)
    }

    pub fn write(&mut self, data: &[u8], crypt: bool) -> io::Result<()> {
        self.rbuf.clear();

        if !self.wbuf.is_empty() && self.wbuf_at + self.wbuf.len() as u64 != self.pos {
            self.flush_buf()?;
        }
        if self.wbuf.is_empty() {
            self.wbuf_at = self.pos;
        }

        let start = self.wbuf.len();
        self.wbuf.extend_from_slice(data);
        if crypt {
            self.cipher.apply(self.pos, &mut self.wbuf[start..]);
        }

        self.pos += data.len() as u64;
        self.len = cmp::max(self.len, self.pos);

        if self.wbuf.len() >= self.capacity {
            self.flush_buf()?;
        }
        Ok(())
    }

    /// Overwrite `data` at `offset` in the clear, then return the inner stream
    /// to the logical position. Any failure to seek surfaces here rather than
    /// on some later write.
    pub fn patch(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.flush_buf()?;
        self.rbuf.clear();

        self.goto(offset)?;
        self.inner.write_all(data)?;
        self.phys += data.len() as u64;
        self.len = cmp::max(self.len, self.phys);

        self.goto(self.pos)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.inner.flush()
    }

    /// Unflushed writes are lost, call [`RawStream::flush`] first
    pub fn into_inner(self) -> S {
        self.inner
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn goto(&mut self, pos: u64) -> io::Result<()> {
        if self.phys != pos {
            self.inner.seek(SeekFrom::Start(pos))?;
            self.phys = pos;
        }
        Ok(())
    }

    fn refill(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.goto(self.pos)?;

        let want = cmp::min(self.capacity as u64, self.len - self.pos) as usize;
        self.rbuf.resize(want, 0);

        let (_, len) = fill_buf(&mut self.inner, &mut self.rbuf)?;
        self.rbuf.truncate(len);
        self.rbuf_at = self.pos;
        self.phys += len as u64;

        trace!("refill at {}: {} of {} bytes", self.rbuf_at, len, want);
        Ok(())
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }

        self.goto(self.wbuf_at)?;
        self.inner.write_all(&self.wbuf)?;
        self.phys += self.wbuf.len() as u64;

        trace!("flush at {}: {} bytes", self.wbuf_at, self.wbuf.len());
        self.wbuf.clear();
        Ok(())
    }
}
