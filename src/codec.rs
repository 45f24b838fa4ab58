//! Per chunk compression
//!
//! Writing, a compressed chunk collects its plaintext (nested chunks
//! included) and hands it to the [`Codec`] as a whole when it closes.
//!
//! Reading is pull based. A compressed chunk keeps a streaming [`Decode`]
//! state plus one window of decoded bytes. Encoded input is fetched a window
//! at a time from the chunk's exact region in its parent, so the decoder can
//! never run past the end of the chunk and memory stays bounded by the window
//! whatever the header declares.
use std::cmp;
use std::io::{self, Cursor, Read};

use zstd::stream::raw::{Decoder, Operation};
use zstd::stream::read::Encoder;

pub const DEFAULT_LEVEL: i32 = 3;

pub trait Codec {
    fn name(&self) -> &'static str;

    fn encode(&self, raw: &[u8]) -> io::Result<Vec<u8>>;

    /// Fresh streaming decoder for one encoded region
    fn decoder(&self) -> io::Result<Box<dyn Decode + Send>>;
}

/// Push side of a streaming decoder
pub trait Decode {
    /// Decode from `input` into `output`, returns how many bytes were
    /// consumed and how many were produced
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> io::Result<(usize, usize)>;

    /// Forget everything, the next input starts a new stream
    fn reset(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        ZstdCodec { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec::new(DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn encode(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        let mut comp = Encoder::new(raw, self.level)?;

        let mut out = Vec::new();
        comp.read_to_end(&mut out)?;
        Ok(out)
    }

    fn decoder(&self) -> io::Result<Box<dyn Decode + Send>> {
        Ok(Box::new(ZstdDecoder {
            inner: Decoder::new()?,
        }))
    }
}

struct ZstdDecoder {
    inner: Decoder<'static>,
}

impl Decode for ZstdDecoder {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> io::Result<(usize, usize)> {
        let status = self.inner.run_on_buffers(input, output)?;
        Ok((status.bytes_read, status.bytes_written))
    }

    fn reset(&mut self) -> io::Result<()> {
        self.inner.reinit()
    }
}

/// Read side state of a compressed region
///
/// `src_*` are offsets of the encoded region in the parent medium, the
/// decoded window `out` starts at logical offset `out_at`. The owner moves
/// encoded bytes in with [`Inflate::feed`] whenever [`Inflate::wants_input`]
/// asks for them, and calls [`Inflate::step`] otherwise.
pub(crate) struct Inflate {
    dec: Box<dyn Decode + Send>,
    window: usize,

    src_start: u64,
    src_end: u64,
    src_at: u64,

    input: Vec<u8>,
    input_pos: usize,

    out: Vec<u8>,
    out_at: u64,

    pos: u64,
    // Unknown until the region has been decoded once
    len: Option<u64>,
}

impl Inflate {
    pub fn new(
        dec: Box<dyn Decode + Send>,
        window: usize,
        src: (u64, u64),
        len: Option<u64>,
    ) -> Self {
        Inflate {
            dec,
            window: window.max(1),
            src_start: src.0,
            src_end: src.1,
            src_at: src.0,
            input: Vec::new(),
            input_pos: 0,
            out: Vec::new(),
            out_at: 0,
            pos: 0,
            len,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Lazy, the decoding happens on the next read
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Nothing to decode: the window holds the position or it is at the end
    pub fn covered(&self) -> bool {
        self.at_end() || self.in_window()
    }

    fn at_end(&self) -> bool {
        matches!(self.len, Some(len) if self.pos >= len)
    }

    fn in_window(&self) -> bool {
        self.pos >= self.out_at && self.pos < self.out_at + self.out.len() as u64
    }

    /// The position is before the window, decoding has to start over
    pub fn behind(&self) -> bool {
        self.pos < self.out_at
    }

    /// Offset in the parent and size of the next encoded block to feed
    pub fn wants_input(&self) -> Option<(u64, usize)> {
        if self.input_pos < self.input.len() || self.src_at >= self.src_end {
            return None;
        }
        let want = cmp::min(self.window as u64, self.src_end - self.src_at);
        Some((self.src_at, want as usize))
    }

    pub fn feed(&mut self, encoded: Vec<u8>) {
        self.src_at += encoded.len() as u64;
        self.input = encoded;
        self.input_pos = 0;
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.dec.reset()?;
        self.src_at = self.src_start;
        self.input.clear();
        self.input_pos = 0;
        self.out.clear();
        self.out_at = 0;
        Ok(())
    }

    /// Drop the current window and decode the next one
    pub fn step(&mut self) -> io::Result<()> {
        self.out_at += self.out.len() as u64;

        let left = match self.len {
            Some(len) => len.saturating_sub(self.out_at),
            None => u64::MAX,
        };
        let room = cmp::min(self.window as u64, left) as usize;
        self.out.clear();
        self.out.resize(room, 0);

        let input = &self.input[self.input_pos..];
        let exhausted = input.is_empty() && self.src_at >= self.src_end;
        let (used, made) = self.dec.decode(input, &mut self.out)?;
        self.input_pos += used;
        self.out.truncate(made);

        if used == 0 && made == 0 {
            match (exhausted, self.len) {
                (true, None) => self.len = Some(self.out_at),
                (true, Some(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "compressed data ends before the declared size",
                    ))
                }
                (false, _) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "decoder made no progress",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Copy out what the window holds at the position
    pub fn read_window(&mut self, buf: &mut [u8]) -> usize {
        if self.at_end() || !self.in_window() {
            return 0;
        }

        let off = (self.pos - self.out_at) as usize;
        let n = cmp::min(buf.len(), self.out.len() - off);
        buf[..n].copy_from_slice(&self.out[off..off + n]);
        self.pos += n as u64;
        n
    }

    #[cfg(test)]
    pub fn footprint(&self) -> usize {
        self.input.capacity() + self.out.capacity()
    }
}

impl std::fmt::Debug for Inflate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflate")
            .field("src", &(self.src_start..self.src_end))
            .field("pos", &self.pos)
            .field("len", &self.len)
            .finish()
    }
}

/// The transform a chunk applies to its payload, fixed when it is opened
#[derive(Debug)]
pub(crate) enum Filter {
    /// Payload is stored as is, the chunk is a window on its parent
    Identity,
    /// Plaintext collected while writing, encoded on close
    Spool(Cursor<Vec<u8>>),
    /// Decoded on demand while reading
    Inflate(Inflate),
}

impl Filter {
    pub fn is_packed(&self) -> bool {
        !matches!(self, Filter::Identity)
    }
}

#[cfg(test)]
mod test_zstd_codec {
    use super::*;

    fn test_data() -> Vec<u8> {
        b"This is a test string 2, don't hurt me!!"
            .iter()
            .cycle()
            .take(40 * 5)
            .copied()
            .collect()
    }

    // Push everything through `dec` with tiny buffers on both sides
    fn decode_all(dec: &mut dyn Decode, encoded: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        let mut at = 0;

        loop {
            let end = cmp::min(at + 5, encoded.len());
            let (used, made) = dec.decode(&encoded[at..end], &mut buf)?;
            at += used;
            out.extend_from_slice(&buf[..made]);

            if used == 0 && made == 0 {
                return Ok(out);
            }
        }
    }

    #[test]
    fn roundtrip() {
        let codec = ZstdCodec::default();

        let encoded = codec.encode(&test_data()).unwrap();
        let mut dec = codec.decoder().unwrap();

        assert_eq!(decode_all(dec.as_mut(), &encoded).unwrap(), test_data());
    }

    #[test]
    fn reset_starts_over() {
        let codec = ZstdCodec::new(19);
        let encoded = codec.encode(&test_data()).unwrap();
        let mut dec = codec.decoder().unwrap();

        let mut buf = [0u8; 16];
        dec.decode(&encoded[..encoded.len() / 2], &mut buf).unwrap();
        dec.reset().unwrap();

        assert_eq!(decode_all(dec.as_mut(), &encoded).unwrap(), test_data());
    }

    #[test]
    fn repetition_compresses() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        assert!(encoded.len() < test_data().len());
    }

    #[test]
    fn garbage_is_error() {
        let garbage = vec![0xA5; 64];
        let mut dec = ZstdCodec::default().decoder().unwrap();

        assert!(decode_all(dec.as_mut(), &garbage).is_err());
    }
}

#[cfg(test)]
mod test_inflate {
    use super::*;

    fn test_data() -> Vec<u8> {
        (0..=255u8).cycle().take(1000).collect()
    }

    // What the pack does, with `encoded` standing in for the parent medium
    fn read(inf: &mut Inflate, encoded: &[u8], buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            while !inf.covered() {
                if inf.behind() {
                    inf.rewind()?;
                }
                match inf.wants_input() {
                    Some((at, want)) => {
                        let at = at as usize;
                        inf.feed(encoded[at..at + want].to_vec());
                    }
                    None => inf.step()?,
                }
            }
            match inf.read_window(&mut buf[done..]) {
                0 => break,
                n => done += n,
            }
        }
        Ok(done)
    }

    fn inflate(encoded: &[u8], len: Option<u64>) -> Inflate {
        let dec = ZstdCodec::default().decoder().unwrap();
        Inflate::new(dec, 16, (0, encoded.len() as u64), len)
    }

    #[test]
    fn windowed_read() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        let mut inf = inflate(&encoded, Some(1000));

        let mut out = vec![0u8; 1200];
        assert_eq!(read(&mut inf, &encoded, &mut out).unwrap(), 1000);
        assert_eq!(&out[..1000], &test_data()[..]);
        assert!(inf.footprint() <= 64);
    }

    #[test]
    fn seek_forward_and_back() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        let mut inf = inflate(&encoded, Some(1000));
        let mut buf = [0u8; 4];

        inf.seek(700);
        read(&mut inf, &encoded, &mut buf).unwrap();
        assert_eq!(buf, [188, 189, 190, 191]);

        inf.seek(3);
        read(&mut inf, &encoded, &mut buf).unwrap();
        assert_eq!(buf, [3, 4, 5, 6]);
        assert_eq!(inf.position(), 7);
    }

    #[test]
    fn unknown_length_is_learned() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        let mut inf = inflate(&encoded, None);

        inf.seek(u64::MAX);
        while !inf.covered() {
            match inf.wants_input() {
                Some((at, want)) => {
                    let at = at as usize;
                    inf.feed(encoded[at..at + want].to_vec());
                }
                None => inf.step().unwrap(),
            }
        }
        assert_eq!(inf.len(), Some(1000));
    }

    #[test]
    fn short_stream_is_error() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        let mut inf = inflate(&encoded, Some(1001));

        let mut out = vec![0u8; 1001];
        let err = read(&mut inf, &encoded, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn long_stream_is_cut_at_declared_size() {
        let encoded = ZstdCodec::default().encode(&test_data()).unwrap();
        let mut inf = inflate(&encoded, Some(10));

        let mut out = vec![0u8; 20];
        assert_eq!(read(&mut inf, &encoded, &mut out).unwrap(), 10);
    }

    #[test]
    fn filter_kinds() {
        assert!(!Filter::Identity.is_packed());
        assert!(Filter::Spool(Cursor::new(Vec::new())).is_packed());

        let inf = inflate(&[], Some(0));
        assert!(Filter::Inflate(inf).is_packed());
    }
}
