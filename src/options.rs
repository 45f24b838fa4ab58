use serde::Deserialize;

use crate::codec::DEFAULT_LEVEL;
use crate::error::Result;

// Same default as the read/write buffer of the classic packfile layer
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Settings captured by a [`crate::Pack`] when it is opened
///
/// A handle copies what it needs at open time, changing an options value
/// afterwards does not affect handles that are already open.
///
/// ```toml
/// password = "hunter2"
/// compression_level = 9
/// buffer_size = 65536
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PackOptions {
    /// Empty disables encryption
    pub password: String,
    pub compression_level: i32,
    pub buffer_size: usize,
}

impl Default for PackOptions {
    fn default() -> Self {
        PackOptions {
            password: String::new(),
            compression_level: DEFAULT_LEVEL,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl PackOptions {
    pub fn from_toml(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}
