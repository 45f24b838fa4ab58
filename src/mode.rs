use std::str::FromStr;

use crate::error::PackError;

/// Container tag for a pack whose whole top level is one codec stream
pub const PACK_MAGIC: u32 = 0x736C_6821;

/// Container tag for plain data, lets `"rp"` readers tell it apart
pub const NOPACK_MAGIC: u32 = 0x736C_682E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// No magic, chunks start at offset 0
    Bare,
    /// `NOPACK_MAGIC` then plain data (`!` on write, auto-detected on read)
    Tagged,
    /// `PACK_MAGIC` then the compressed top level
    Packed,
}

/// Parsed mode descriptor, see [`OpenMode::from_str`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub access: Access,
    pub container: Container,
    /// With `p`, a magic that matches neither tag is not an error: the rest
    /// of the file is read as tagged plain data without the password. Both
    /// magics are encrypted, so with the wrong password a packed container
    /// cannot be told apart from a tagged one and is read the same way.
    pub skip_protected: bool,
}

impl OpenMode {
    pub fn is_read(&self) -> bool {
        self.access == Access::Read
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }
}

impl FromStr for OpenMode {
    type Err = PackError;

    /// `r`, `w` or `a` plus any of `p` (packed container), `!` (tagged plain
    /// container, write only) and `s` (skip protected, read only). Case is
    /// ignored, order is not significant.
    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        let fail = |reason| PackError::Mode {
            mode: mode.to_string(),
            reason,
        };

        let mut access = None;
        let mut packed = false;
        let mut tagged = false;
        let mut skip_protected = false;

        for c in mode.chars() {
            let set = match c.to_ascii_lowercase() {
                'r' => Some(Access::Read),
                'w' => Some(Access::Write),
                'a' => Some(Access::Append),
                'p' => {
                    packed = true;
                    None
                }
                '!' => {
                    tagged = true;
                    None
                }
                's' => {
                    skip_protected = true;
                    None
                }
                _ => return Err(fail("unknown mode character")),
            };

            if let Some(a) = set {
                if access.replace(a).is_some() {
                    return Err(fail("more than one of r, w and a"));
                }
            }
        }

        let access = access.ok_or_else(|| fail("one of r, w or a is required"))?;

        if packed && tagged {
            return Err(fail("p and ! are exclusive"));
        }
        if tagged && access != Access::Write {
            return Err(fail("! is only valid when writing"));
        }
        if skip_protected && access != Access::Read {
            return Err(fail("s is only valid when reading"));
        }
        if access == Access::Append && packed {
            return Err(fail("a cannot be combined with p"));
        }

        let container = if packed {
            Container::Packed
        } else if tagged {
            Container::Tagged
        } else {
            Container::Bare
        };

        Ok(OpenMode {
            access,
            container,
            skip_protected,
        })
    }
}
