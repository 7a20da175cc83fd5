//! Page geometry and key manifest configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_SALT_SIZE: usize = 16;
pub const DEFAULT_RESERVE_SIZE: usize = 80;
pub const IV_SIZE: usize = 16;
pub const AES_BLOCK: usize = 16;

/// Where the page IV sits inside the reserve region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvPosition {
    /// Final 16 bytes of the reserve region.
    #[default]
    ReserveTail,
    /// First 16 bytes of the reserve region.
    ReserveHead,
}

/// Where the decrypted payload of page 0 lands in the served page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page0Placement {
    /// Payload moves to offset 0, the reserve follows it and the page is
    /// padded with `salt_size` zero bytes. SQLite sees its header at 0.
    #[default]
    Shifted,
    /// Payload keeps its on-disk offset; the salt span is zeroed.
    InPlace,
}

/// On-disk page geometry.
///
/// ```text
/// page 0: [ salt | ciphertext ............ | reserve (.. IV) ]
/// page n: [ ciphertext ................... | reserve (.. IV) ]
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: usize,
    pub salt_size: usize,
    pub reserve_size: usize,
    pub iv_position: IvPosition,
    pub page0: Page0Placement,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            salt_size: DEFAULT_SALT_SIZE,
            reserve_size: DEFAULT_RESERVE_SIZE,
            iv_position: IvPosition::ReserveTail,
            page0: Page0Placement::Shifted,
        }
    }
}

impl PageLayout {
    pub fn validate(&self) -> Result<()> {
        if self.reserve_size < IV_SIZE {
            return Err(Error::InvalidLayout(format!(
                "reserve ({}) must hold a {IV_SIZE}-byte IV",
                self.reserve_size
            )));
        }
        if self.salt_size + self.reserve_size >= self.page_size {
            return Err(Error::InvalidLayout(format!(
                "salt ({}) + reserve ({}) leaves no payload in a {}-byte page",
                self.salt_size, self.reserve_size, self.page_size
            )));
        }
        for first in [false, true] {
            let len = self.cipher_len(first);
            if len % AES_BLOCK != 0 {
                return Err(Error::InvalidLayout(format!(
                    "cipher span {len} is not a multiple of {AES_BLOCK}"
                )));
            }
        }
        Ok(())
    }

    /// Offset of the encrypted span within the page.
    pub fn cipher_start(&self, first_page: bool) -> usize {
        if first_page { self.salt_size } else { 0 }
    }

    /// Length of the encrypted span.
    pub fn cipher_len(&self, first_page: bool) -> usize {
        self.page_size - self.reserve_size - self.cipher_start(first_page)
    }

    /// Offset of the decrypted payload within a served page.
    pub fn plain_start(&self, first_page: bool) -> usize {
        match self.page0 {
            Page0Placement::InPlace => self.cipher_start(first_page),
            Page0Placement::Shifted => 0,
        }
    }

    /// Byte range of the IV within a raw page.
    pub fn iv_range(&self) -> std::ops::Range<usize> {
        let reserve_start = self.page_size - self.reserve_size;
        match self.iv_position {
            IvPosition::ReserveTail => self.page_size - IV_SIZE..self.page_size,
            IvPosition::ReserveHead => reserve_start..reserve_start + IV_SIZE,
        }
    }
}

/// One entry of a JSON key manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub enc_key: String,
    #[serde(default)]
    pub mac_key: String,
}

/// Keys to register at extension load time, e.g.
///
/// ```json
/// [{ "path": "C:/chat/msg_0.db", "enc_key": "00ff..", "mac_key": "" }]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct KeyManifest {
    pub entries: Vec<ManifestEntry>,
}

impl KeyManifest {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))?;
        Self::from_json(&data)
    }
}
