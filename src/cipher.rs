//! Position addressable keystream cipher
//!
//! The password is stretched into a 256 bit key with `blake3::derive_key`, the
//! keystream is then the extendable output of a BLAKE3 hasher keyed with it.
//! Because the XOF reader can be moved to any offset, byte `i` of the stream
//! can be produced without generating bytes `0..i` which is what lets a reader
//! skip or seek into a chunk without decrypting everything before it.
//!
//! Encryption is `data[i] ^ keystream[offset + i]` so [`Cipher::apply`] both
//! encrypts and decrypts. An empty password gives an all zero keystream, it
//! goes through the same path and leaves the data untouched.
use std::fmt;

use blake3::OutputReader;

// Domain separation for the key derivation, never change this, it would
// make every encrypted pack unreadable.
const KEY_CONTEXT: &str = "rpak 2024 chunk payload keystream v1";

// Keystream generation window
const BLOCK_SIZE: usize = 256;

#[derive(Clone)]
pub struct Cipher {
    xof: Option<OutputReader>,
}

impl Cipher {
    pub fn new(password: &str) -> Self {
        if password.is_empty() {
            return Cipher::none();
        }

        let key = blake3::derive_key(KEY_CONTEXT, password.as_bytes());
        Cipher {
            xof: Some(blake3::Hasher::new_keyed(&key).finalize_xof()),
        }
    }

    /// The identity cipher
    pub fn none() -> Self {
        Cipher { xof: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.xof.is_some()
    }

    /// Fill `out` with the keystream starting at the absolute `offset`
    pub fn keystream(&self, offset: u64, out: &mut [u8]) {
        match &self.xof {
            Some(xof) => {
                let mut reader = xof.clone();
                reader.set_position(offset);
                reader.fill(out);
            }
            None => out.fill(0),
        }
    }

    /// XOR `buf` in place with the keystream, `offset` is the absolute
    /// position of `buf[0]` in the underlying stream.
    pub fn apply(&self, offset: u64, buf: &mut [u8]) {
        let mut block = [0u8; BLOCK_SIZE];

        for (i, piece) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            let key = &mut block[..piece.len()];
            self.keystream(offset + (i * BLOCK_SIZE) as u64, key);

            for (b, k) in piece.iter_mut().zip(key.iter()) {
                *b ^= k;
            }
        }
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod test_cipher {
    use super::*;

    fn test_data() -> Vec<u8> {
        b"Hello World!!!!!".iter().cycle().take(1000).copied().collect()
    }

    #[test]
    fn empty_password_is_identity() {
        let cipher = Cipher::new("");
        let mut data = test_data();

        cipher.apply(1234, &mut data);

        assert!(!cipher.is_enabled());
        assert_eq!(data, test_data());
    }

    #[test]
    fn apply_twice_roundtrip() {
        let cipher = Cipher::new("12358 Dummy password");
        let mut data = test_data();

        cipher.apply(17, &mut data);
        assert_ne!(data, test_data());

        cipher.apply(17, &mut data);
        assert_eq!(data, test_data());
    }

    #[test]
    fn deterministic_across_instances() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];

        Cipher::new("P").keystream(99, &mut a);
        Cipher::new("P").keystream(99, &mut b);

        assert_eq!(a, b);
        assert_ne!(a, [0u8; 64]);
    }

    #[test]
    fn position_addressable() {
        let cipher = Cipher::new("P");

        // Encrypt everything in one go
        let mut whole = test_data();
        cipher.apply(4096, &mut whole);

        // Decrypt an inner slice on its own, without touching what's before it
        let mut part = whole[700..731].to_vec();
        cipher.apply(4096 + 700, &mut part);

        assert_eq!(&part[..], &test_data()[700..731]);
    }

    #[test]
    fn split_apply_matches_whole() {
        let cipher = Cipher::new("P");

        let mut whole = test_data();
        cipher.apply(0, &mut whole);

        let mut split = test_data();
        let (head, tail) = split.split_at_mut(333);
        cipher.apply(0, head);
        cipher.apply(333, tail);

        assert_eq!(whole, split);
    }

    #[test]
    fn password_changes_keystream() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];

        Cipher::new("P").keystream(0, &mut a);
        Cipher::new("Q").keystream(0, &mut b);

        assert_ne!(a, b);
    }

    #[test]
    fn debug_hides_key() {
        let out = format!("{:?}", Cipher::new("secret"));
        assert_eq!(out, "Cipher { enabled: true }");
    }
}
