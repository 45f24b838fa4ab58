//! Chunked binary container files
//!
//! A pack is a stream of nested chunks. Each chunk may be compressed, and the
//! payload bytes of the whole file may be encrypted with a password:
//!
//! ```no_run
//! use rpak::{Pack, PackOptions};
//!
//! # fn main() -> rpak::Result<()> {
//! let options = PackOptions::default().with_password("hunter2");
//!
//! let mut pack = Pack::open("data.pak", "w", &options)?;
//! pack.with_chunk(false, |p| p.mputl(0xCAFE))?;
//! pack.with_chunk(true, |p| p.write(b"squeezed").map(|_| ()))?;
//! pack.close()?;
//!
//! let mut pack = Pack::open("data.pak", "r", &options)?;
//! pack.skip_chunks(1)?;
//! let id = pack.open_chunk(true)?;
//! let mut buf = [0u8; 8];
//! pack.read(&mut buf)?;
//! pack.close_chunk(id)?;
//! pack.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! On disk, with the optional container magic in front:
//!
//! | Part   | Layout |
//! | ------ | ------ |
//! | Magic  | u32 BE, `PACK_MAGIC` or `NOPACK_MAGIC`, only in `p` and `!` modes |
//! | Chunk  | i32 BE encoded length, i32 BE raw length (negated if compressed), payload |
//!
//! Chunk headers are stored in the clear, payload bytes are XORed with a
//! keystream indexed by their absolute file offset. Compressed payloads are
//! decoded a window at a time as they are read, a chunk never costs more
//! memory than its decode window whatever size its header declares.
mod chunk;
mod cipher;
mod codec;
mod error;
mod mode;
mod options;
mod pack;
mod stream;

pub use chunk::ChunkId;
pub use cipher::Cipher;
pub use codec::{Codec, Decode, ZstdCodec};
pub use error::{ErrorKind, PackError, Result};
pub use mode::{Access, Container, OpenMode, NOPACK_MAGIC, PACK_MAGIC};
pub use options::PackOptions;
pub use pack::Pack;
