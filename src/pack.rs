//! The pack handle
//!
//! A [`Pack`] owns the underlying stream, the stack of open chunks and the
//! sticky error and EOF flags. All byte and scalar I/O goes through the view
//! of the innermost open chunk, or the top level when none is open.
//!
//! Each view lives in a medium: the underlying stream, the top level of a
//! packed container, or the innermost compressed chunk. Stored chunks are
//! windows on their parent's medium, compressed chunks bring their own. A
//! compressed medium is a plaintext buffer while writing and a windowed
//! decoder pulling from its parent's medium while reading.
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, trace, warn};

use crate::chunk::ChunkContext;
use crate::cipher::Cipher;
use crate::codec::{Codec, Filter, Inflate, ZstdCodec};
use crate::error::{ErrorKind, PackError, Result};
use crate::mode::{Access, Container, OpenMode, NOPACK_MAGIC, PACK_MAGIC};
use crate::options::PackOptions;
use crate::stream::RawStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Medium {
    Stream,
    Root,
    Chunk(usize),
}

/// Readable or writable window, `start..end` in `medium`
#[derive(Debug, Clone, Copy)]
pub(crate) struct View {
    pub medium: Medium,
    pub start: u64,
    pub end: u64,
}

pub struct Pack<S: Read + Write + Seek> {
    // None once released
    pub(crate) stream: Option<RawStream<S>>,
    pub(crate) mode: OpenMode,
    pub(crate) codec: Box<dyn Codec + Send>,

    // Top level of a packed container
    pub(crate) root: Option<Filter>,
    // Where the top level starts on the stream
    pub(crate) base: u64,
    // Decode window of compressed media
    pub(crate) window: usize,

    pub(crate) chunks: Vec<ChunkContext>,
    pub(crate) serial: u64,

    pub(crate) pushback: Option<u8>,
    pub(crate) eof: bool,
    pub(crate) error: Option<ErrorKind>,
}

impl Pack<File> {
    /// Open the file at `path`, see [`OpenMode`](crate::OpenMode) for `mode`
    pub fn open<P: AsRef<Path>>(path: P, mode: &str, options: &PackOptions) -> Result<Self> {
        let parsed: OpenMode = mode.parse()?;

        let file = match parsed.access {
            Access::Read => File::open(path)?,
            Access::Write => File::create(path)?,
            Access::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?,
        };

        Pack::from_stream(file, mode, options)
    }
}

impl<S: Read + Write + Seek> Pack<S> {
    /// Wrap an already open stream, when writing the stream must be at its
    /// start and is never sought until a chunk header is backpatched.
    pub fn from_stream(stream: S, mode: &str, options: &PackOptions) -> Result<Self> {
        let codec = ZstdCodec::new(options.compression_level);
        Pack::with_codec(stream, mode, options, Box::new(codec))
    }

    /// [`Pack::from_stream`] with another codec for compressed chunks and
    /// packed containers
    pub fn with_codec(
        mut stream: S,
        mode: &str,
        options: &PackOptions,
        codec: Box<dyn Codec + Send>,
    ) -> Result<Self> {
        let mut mode: OpenMode = mode.parse()?;
        let cipher = Cipher::new(&options.password);
        let capacity = options.buffer_size;

        let mut raw = match mode.access {
            Access::Read => {
                let len = stream.seek(SeekFrom::End(0))?;
                stream.seek(SeekFrom::Start(0))?;
                RawStream::new(stream, cipher, capacity, 0, len)
            }
            Access::Write => RawStream::new(stream, cipher, capacity, 0, 0),
            Access::Append => {
                let len = stream.seek(SeekFrom::End(0))?;
                RawStream::new(stream, cipher, capacity, len, len)
            }
        };

        let mut base = raw.position();
        let mut root = None;

        match (mode.access, mode.container) {
            (Access::Write, Container::Packed) => {
                write_magic(&mut raw, PACK_MAGIC)?;
                root = Some(Filter::Spool(Cursor::new(Vec::new())));
                base = 4;
            }
            (Access::Write, Container::Tagged) => {
                write_magic(&mut raw, NOPACK_MAGIC)?;
                base = 4;
            }
            (Access::Read, Container::Packed) => {
                let mut buf = [0u8; 4];
                if raw.read(&mut buf, true)? < buf.len() {
                    return Err(PackError::Corrupt {
                        offset: 0,
                        reason: "missing container magic",
                    });
                }
                base = 4;

                match BigEndian::read_u32(&buf) {
                    PACK_MAGIC => {
                        let dec = codec.decoder().map_err(PackError::Decode)?;
                        let inf = Inflate::new(dec, capacity, (base, raw.len()), None);
                        root = Some(Filter::Inflate(inf));
                    }
                    NOPACK_MAGIC => mode.container = Container::Tagged,
                    magic if mode.skip_protected => {
                        // Without the password a packed container looks the
                        // same as a tagged one, both end up read as plain data
                        warn!(
                            "container magic {:#010x} is neither packed nor tagged, \
                             reading the rest as tagged data without the password",
                            magic
                        );
                        raw.set_cipher(Cipher::none());
                        mode.container = Container::Tagged;
                    }
                    magic => return Err(PackError::BadMagic(magic)),
                }
            }
            _ => (),
        }

        debug!(
            "open pack {:?}, top level at {}, {} cipher, {} codec",
            mode,
            base,
            if raw.cipher().is_enabled() { "with" } else { "no" },
            codec.name()
        );

        let mut pack = Pack {
            stream: Some(raw),
            mode,
            codec,
            root,
            base,
            window: capacity.max(1),
            chunks: Vec::new(),
            serial: 0,
            pushback: None,
            eof: false,
            error: None,
        };
        if matches!(pack.root, Some(Filter::Inflate(_))) {
            pack.measure_root()?;
        }
        pack.update_eof();
        Ok(pack)
    }

    // The container does not store its decoded size, learn it by decoding
    // the whole thing once and throwing the output away
    fn measure_root(&mut self) -> Result<()> {
        self.medium_seek(Medium::Root, u64::MAX)?;
        self.refill(Medium::Root)?;
        self.medium_seek(Medium::Root, 0)?;

        if let Some(Filter::Inflate(inf)) = &self.root {
            debug!(
                "packed container, {} bytes decode to {:?}",
                self.stream()?.len() - self.base,
                inf.len()
            );
        }
        Ok(())
    }

    /// Finish the pack and release the stream
    ///
    /// Fails with [`PackError::ChunksOpen`], leaving the handle untouched, if
    /// chunks are still open. Otherwise the stream is released even when
    /// finishing fails, and any failure latched during the lifetime of the
    /// handle is reported as [`PackError::Latched`].
    pub fn close(&mut self) -> Result<()> {
        self.shutdown().map(|_| ())
    }

    /// Like [`Pack::close`] but hands back the underlying stream
    pub fn into_inner(mut self) -> Result<S> {
        self.shutdown()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn getc(&mut self) -> Result<Option<u8>> {
        self.guard(|p| {
            let mut buf = [0u8; 1];
            match p.read_bytes(&mut buf)? {
                0 => Ok(None),
                _ => Ok(Some(buf[0])),
            }
        })
    }

    pub fn putc(&mut self, c: u8) -> Result<()> {
        self.guard(|p| p.write_bytes(&[c]))
    }

    /// Push `c` back so the next read returns it, only one byte is kept
    pub fn ungetc(&mut self, c: u8) -> Result<()> {
        self.check_read()?;
        self.pushback = Some(c);
        self.eof = false;
        Ok(())
    }

    /// Little endian u16
    pub fn igetw(&mut self) -> Result<Option<u16>> {
        Ok(self.get_array::<2>()?.map(|b| LittleEndian::read_u16(&b)))
    }

    /// Little endian u32
    pub fn igetl(&mut self) -> Result<Option<u32>> {
        Ok(self.get_array::<4>()?.map(|b| LittleEndian::read_u32(&b)))
    }

    /// Big endian u16
    pub fn mgetw(&mut self) -> Result<Option<u16>> {
        Ok(self.get_array::<2>()?.map(|b| BigEndian::read_u16(&b)))
    }

    /// Big endian u32
    pub fn mgetl(&mut self) -> Result<Option<u32>> {
        Ok(self.get_array::<4>()?.map(|b| BigEndian::read_u32(&b)))
    }

    pub fn iputw(&mut self, w: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, w);
        self.guard(|p| p.write_bytes(&buf))
    }

    pub fn iputl(&mut self, l: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, l);
        self.guard(|p| p.write_bytes(&buf))
    }

    pub fn mputw(&mut self, w: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, w);
        self.guard(|p| p.write_bytes(&buf))
    }

    pub fn mputl(&mut self, l: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, l);
        self.guard(|p| p.write_bytes(&buf))
    }

    /// Read up to `buf.len()` bytes, fewer only at the end of the view
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.guard(|p| p.read_bytes(buf))
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.guard(|p| p.write_bytes(buf).map(|_| buf.len()))
    }

    /// Move to `offset` from the start of the current view
    ///
    /// Reading, the view ends where its payload does. Writing, it ends at the
    /// furthest byte written so far.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.guard(|p| {
            p.check_open()?;
            let view = p.view();
            let limit = view.end.saturating_sub(view.start);
            if offset > limit {
                return Err(PackError::OutOfRange {
                    target: offset,
                    limit,
                });
            }

            p.pushback = None;
            p.medium_seek(view.medium, view.start + offset)?;
            p.update_eof();
            Ok(())
        })
    }

    /// Skip forward up to `n` bytes without going past the end of the view,
    /// returns how many were skipped
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        self.guard(|p| {
            p.check_read()?;

            let mut skipped = 0;
            if n > 0 && p.pushback.take().is_some() {
                skipped = 1;
            }

            let view = p.view();
            let at = p.medium_pos(view.medium)?;
            let step = (n - skipped).min(view.end.saturating_sub(at));
            p.medium_seek(view.medium, at + step)?;
            p.update_eof();

            Ok(skipped + step)
        })
    }

    /// Offset in the current view
    pub fn position(&self) -> Result<u64> {
        let view = self.view();
        let at = self.medium_pos(view.medium)?;
        let back = self.pushback.is_some() as u64;

        Ok(at.saturating_sub(view.start).saturating_sub(back))
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Has any operation failed since the pack was opened
    pub fn error(&self) -> bool {
        self.error.is_some()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.error
    }

    pub fn flush(&mut self) -> Result<()> {
        self.guard(|p| p.flush_stream())
    }

    pub(crate) fn guard<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let res = op(self);
        if let Err(e) = &res {
            let kind = e.kind();
            if kind != ErrorKind::Usage {
                self.error = Some(kind);
            }
        }
        res
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        match self.stream {
            Some(_) => Ok(()),
            None => Err(PackError::Usage("handle is closed")),
        }
    }

    pub(crate) fn check_read(&self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_read() {
            return Err(PackError::Usage("handle is not open for reading"));
        }
        Ok(())
    }

    pub(crate) fn check_write(&self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_write() {
            return Err(PackError::Usage("handle is not open for writing"));
        }
        Ok(())
    }

    pub(crate) fn update_eof(&mut self) {
        self.eof = self.mode.is_read() && self.pushback.is_none() && self.at_view_end();
    }

    fn at_view_end(&self) -> bool {
        let view = self.view();
        match self.medium_pos(view.medium) {
            Ok(at) => at >= view.end,
            Err(_) => true,
        }
    }

    /// Extend the innermost stored chunk up to `end` in its parent's medium
    pub(crate) fn mark_written(&mut self, end: u64) {
        if let Some(ctx) = self.chunks.last_mut() {
            if !ctx.filter.is_packed() && ctx.end < end {
                ctx.end = end;
            }
        }
    }

    pub(crate) fn view(&self) -> View {
        let medium = self.medium_within(self.chunks.len());

        let (start, end) = match (self.chunks.last(), &self.root, &self.stream) {
            (Some(ctx), _, _) => match &ctx.filter {
                Filter::Identity => (ctx.start, ctx.end),
                packed => (0, packed_len(packed)),
            },
            (None, Some(root), _) => (0, packed_len(root)),
            (None, None, Some(stream)) => (self.base, stream.len()),
            (None, None, None) => (self.base, self.base),
        };

        View { medium, start, end }
    }

    // Medium seen by the first `level` chunks of the stack
    fn medium_within(&self, level: usize) -> Medium {
        match self.chunks[..level].iter().rposition(|c| c.filter.is_packed()) {
            Some(i) => Medium::Chunk(i),
            None if self.root.is_some() => Medium::Root,
            None => Medium::Stream,
        }
    }

    // Where a compressed medium pulls its encoded bytes from
    fn parent_of(&self, medium: Medium) -> Medium {
        match medium {
            Medium::Stream | Medium::Root => Medium::Stream,
            Medium::Chunk(i) => self.medium_within(i),
        }
    }

    pub(crate) fn medium_pos(&self, medium: Medium) -> Result<u64> {
        match self.filter(medium) {
            Some(Filter::Spool(buf)) => Ok(buf.position()),
            Some(Filter::Inflate(inf)) => Ok(inf.position()),
            _ => Ok(self.stream()?.position()),
        }
    }

    pub(crate) fn medium_seek(&mut self, medium: Medium, pos: u64) -> Result<()> {
        match self.filter_mut(medium) {
            Some(Filter::Spool(buf)) => buf.set_position(pos),
            Some(Filter::Inflate(inf)) => inf.seek(pos),
            _ => self.stream_mut()?.seek(pos),
        }
        Ok(())
    }

    /// `crypt` only matters on the stream, other media hold plaintext
    pub(crate) fn medium_read(&mut self, medium: Medium, out: &mut [u8], crypt: bool) -> Result<usize> {
        match self.filter_mut(medium) {
            Some(Filter::Spool(buf)) => Ok(buf.read(out)?),
            Some(Filter::Inflate(_)) => self.inflate_read(medium, out),
            _ => Ok(self.stream_mut()?.read(out, crypt)?),
        }
    }

    pub(crate) fn medium_write(&mut self, medium: Medium, data: &[u8], crypt: bool) -> Result<()> {
        match self.filter_mut(medium) {
            Some(Filter::Spool(buf)) => buf.write_all(data)?,
            Some(Filter::Inflate(_)) => return Err(PackError::Usage("compressed data is read only")),
            _ => self.stream_mut()?.write(data, crypt)?,
        }
        Ok(())
    }

    /// Overwrite a chunk header, the medium position is left alone
    pub(crate) fn medium_patch(&mut self, medium: Medium, offset: u64, data: &[u8]) -> Result<()> {
        match self.filter_mut(medium) {
            Some(Filter::Spool(buf)) => {
                let at = buf.position();
                buf.set_position(offset);
                buf.write_all(data)?;
                buf.set_position(at);
            }
            Some(Filter::Inflate(_)) => return Err(PackError::Usage("compressed data is read only")),
            _ => self
                .stream_mut()?
                .patch(offset, data)
                .map_err(PackError::Unseekable)?,
        }
        Ok(())
    }

    /// Decode until the window of compressed `medium` holds its position,
    /// pulling encoded bytes from the parent medium as needed
    pub(crate) fn refill(&mut self, medium: Medium) -> Result<()> {
        let parent = self.parent_of(medium);

        loop {
            let inf = self.inflate_mut(medium)?;
            if inf.covered() {
                return Ok(());
            }
            if inf.behind() {
                trace!("restart decoding to reach {}", inf.position());
                inf.rewind().map_err(PackError::Decode)?;
            }

            match inf.wants_input() {
                Some((at, want)) => {
                    let mut encoded = vec![0u8; want];
                    self.medium_seek(parent, at)?;
                    if self.medium_read(parent, &mut encoded, true)? < want {
                        return Err(PackError::Corrupt {
                            offset: at,
                            reason: "truncated compressed payload",
                        });
                    }
                    self.inflate_mut(medium)?.feed(encoded);
                }
                None => inf.step().map_err(PackError::Decode)?,
            }
        }
    }

    fn inflate_read(&mut self, medium: Medium, out: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < out.len() {
            self.refill(medium)?;
            match self.inflate_mut(medium)?.read_window(&mut out[done..]) {
                0 => break,
                n => done += n,
            }
        }
        Ok(done)
    }

    fn filter(&self, medium: Medium) -> Option<&Filter> {
        match medium {
            Medium::Stream => None,
            Medium::Root => self.root.as_ref(),
            Medium::Chunk(i) => self.chunks.get(i).map(|c| &c.filter),
        }
    }

    fn filter_mut(&mut self, medium: Medium) -> Option<&mut Filter> {
        match medium {
            Medium::Stream => None,
            Medium::Root => self.root.as_mut(),
            Medium::Chunk(i) => self.chunks.get_mut(i).map(|c| &mut c.filter),
        }
    }

    fn inflate_mut(&mut self, medium: Medium) -> Result<&mut Inflate> {
        match self.filter_mut(medium) {
            Some(Filter::Inflate(inf)) => Ok(inf),
            _ => Err(PackError::Usage("medium is not being decoded")),
        }
    }

    fn stream(&self) -> Result<&RawStream<S>> {
        self.stream.as_ref().ok_or(PackError::Usage("handle is closed"))
    }

    fn stream_mut(&mut self) -> Result<&mut RawStream<S>> {
        self.stream.as_mut().ok_or(PackError::Usage("handle is closed"))
    }

    fn get_array<const N: usize>(&mut self) -> Result<Option<[u8; N]>> {
        let mut buf = [0u8; N];
        match self.read(&mut buf)? {
            n if n == N => Ok(Some(buf)),
            _ => Ok(None),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_read()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut done = 0;
        if let Some(c) = self.pushback.take() {
            buf[0] = c;
            done = 1;
        }

        let view = self.view();
        let at = self.medium_pos(view.medium)?;
        let want = (buf.len() - done).min(view.end.saturating_sub(at) as usize);
        done += self.medium_read(view.medium, &mut buf[done..done + want], true)?;

        if let Some(ctx) = self.chunks.last_mut() {
            ctx.count += done as u64;
        }

        self.update_eof();
        if done < buf.len() {
            self.eof = true;
        }
        Ok(done)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.check_write()?;

        let view = self.view();
        self.medium_write(view.medium, data, true)?;

        let at = self.medium_pos(view.medium)?;
        self.mark_written(at);
        if let Some(ctx) = self.chunks.last_mut() {
            ctx.count += data.len() as u64;
        }
        Ok(())
    }

    fn flush_stream(&mut self) -> Result<()> {
        self.check_open()?;
        if self.mode.is_write() {
            self.stream_mut()?.flush()?;
        }
        Ok(())
    }

    // Compress the container and push everything out
    fn finish(&mut self) -> Result<()> {
        if !self.mode.is_write() {
            return Ok(());
        }

        if let Some(Filter::Spool(root)) = self.root.take() {
            let raw = root.into_inner();
            let encoded = self.codec.encode(&raw).map_err(PackError::Encode)?;
            debug!("packed container, {} bytes encoded to {}", raw.len(), encoded.len());

            let base = self.base;
            let stream = self.stream_mut()?;
            stream.seek(base);
            stream.write(&encoded, true)?;
        }
        self.flush_stream()
    }

    fn shutdown(&mut self) -> Result<S> {
        self.check_open()?;
        if !self.chunks.is_empty() {
            return Err(PackError::ChunksOpen(self.chunks.len()));
        }

        let res = self.guard(|p| p.finish());
        let stream = self
            .stream
            .take()
            .ok_or(PackError::Usage("handle is closed"))?;
        self.root = None;
        self.pushback = None;
        self.eof = true;

        res?;
        match self.error {
            Some(kind) => Err(PackError::Latched(kind)),
            None => Ok(stream.into_inner()),
        }
    }
}

fn packed_len(filter: &Filter) -> u64 {
    match filter {
        Filter::Identity => 0,
        Filter::Spool(buf) => buf.get_ref().len() as u64,
        Filter::Inflate(inf) => inf.len().unwrap_or(u64::MAX),
    }
}

fn write_magic<S: Read + Write + Seek>(raw: &mut RawStream<S>, magic: u32) -> io::Result<()> {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, magic);
    raw.write(&buf, true)
}

impl<S: Read + Write + Seek> Read for Pack<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.guard(|p| p.read_bytes(buf)).map_err(io::Error::from)
    }
}

impl<S: Read + Write + Seek> Write for Pack<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard(|p| p.write_bytes(buf).map(|_| buf.len()))
            .map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard(|p| p.flush_stream()).map_err(io::Error::from)
    }
}

impl<S: Read + Write + Seek> Drop for Pack<S> {
    fn drop(&mut self) {
        if self.stream.is_none() {
            return;
        }

        while let Some(id) = self.top_id() {
            warn!("chunk at depth {} still open on drop, closing it", id.depth());
            if let Err(e) = self.close_chunk(id) {
                warn!("closing chunk on drop: {}", e);
            }
        }

        if let Err(e) = self.close() {
            warn!("closing pack on drop: {}", e);
        }
    }
}


#[cfg(test)]
mod test_scenario {
    use super::*;

    const STRING_1: &[u8] = b"00000000000000000000000 This is a test string 1, don't hurt me!!";
    const STRING_2: &[u8] = b"This is a test string 2, don't hurt me!!";

    fn write_test_pack<S: Read + Write + Seek>(pack: &mut Pack<S>) -> Result<()> {
        pack.with_chunk(false, |p| {
            for _ in 0..5 {
                p.write(STRING_1)?;
            }
            Ok(())
        })?;
        pack.with_chunk(true, |p| {
            for _ in 0..5 {
                p.write(STRING_2)?;
            }
            Ok(())
        })
    }

    #[test]
    fn test_strings() {
        assert_eq!(STRING_1.len(), 64);
        assert_eq!(STRING_2.len(), 40);
    }

    #[test]
    fn password_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");
        let with_p = PackOptions::default().with_password("P");

        let mut pack = Pack::open(&path, "w", &with_p).unwrap();
        write_test_pack(&mut pack).unwrap();
        pack.close().unwrap();

        // Right password
        let mut pack = Pack::open(&path, "r", &with_p).unwrap();
        pack.skip_chunks(1).unwrap();
        let id = pack.open_chunk(true).unwrap();
        let mut buf = [0u8; 40];
        assert_eq!(pack.read(&mut buf).unwrap(), 40);
        assert_eq!(&buf[..], STRING_2);
        pack.close_chunk(id).unwrap();
        pack.close().unwrap();

        // No password, skipping still works but the payload is garbage
        let mut pack = Pack::open(&path, "r", &PackOptions::default()).unwrap();
        let id = pack.open_chunk(false).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(pack.read(&mut buf).unwrap(), 64);
        assert_ne!(&buf[..], STRING_1);
        pack.close_chunk(id).unwrap();

        // The frame magic is garbage without the key
        assert_eq!(pack.open_chunk(true).unwrap_err().kind(), ErrorKind::Decode);
        assert_eq!(pack.depth(), 0);
        assert!(matches!(
            pack.close(),
            Err(PackError::Latched(ErrorKind::Decode))
        ));
    }

    #[test]
    fn skip_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pak");

        let mut pack = Pack::open(&path, "w", &PackOptions::default().with_password("P")).unwrap();
        write_test_pack(&mut pack).unwrap();
        pack.close().unwrap();

        let mut pack = Pack::open(&path, "r", &PackOptions::default()).unwrap();
        pack.skip_chunks(2).unwrap();
        assert!(pack.eof());
        pack.close().unwrap();
    }

    #[test]
    fn output_is_deterministic() {
        let options = PackOptions::default().with_password("P");

        let digest = || {
            let mut pack = Pack::from_stream(Cursor::new(Vec::new()), "w", &options).unwrap();
            write_test_pack(&mut pack).unwrap();
            blake3::hash(&pack.into_inner().unwrap().into_inner())
        };

        assert_eq!(digest(), digest());
    }

    #[test]
    fn password_changes_output() {
        let write = |password: &str| {
            let options = PackOptions::default().with_password(password);
            let mut pack = Pack::from_stream(Cursor::new(Vec::new()), "w", &options).unwrap();
            write_test_pack(&mut pack).unwrap();
            pack.into_inner().unwrap().into_inner()
        };

        let plain = write("");
        let secret = write("P");

        // Same layout, headers in the clear, payload differs
        assert_eq!(plain.len(), secret.len());
        assert_eq!(&plain[..8], &secret[..8]);
        assert_ne!(plain, secret);
        assert_eq!(&plain[8..8 + 64], STRING_1);
    }
}
