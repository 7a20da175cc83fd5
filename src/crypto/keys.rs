use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A 256-bit page encryption key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PageKey {
    bytes: [u8; 32],
}

/// Auxiliary integrity (MAC) key. Stored alongside the page key but not
/// used to authenticate pages.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct IntegrityKey {
    bytes: Vec<u8>,
}

impl PageKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!("encryption key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut raw = decode_hex(hex_str)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl IntegrityKey {
    /// Empty input yields an empty key.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Ok(Self {
            bytes: decode_hex(hex_str)?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn decode_hex(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str.trim()).map_err(|e| Error::InvalidKey(format!("bad hex: {e}")))
}

impl fmt::Debug for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PageKey(***)")
    }
}

impl fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntegrityKey({} bytes)", self.bytes.len())
    }
}
