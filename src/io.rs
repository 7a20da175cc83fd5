//! Byte-range reads on top of the page cipher.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    sync::{Arc, Weak},
};

use libsqlite3_sys::SQLITE_IOERR_READ;

use crate::{
    config::PageLayout,
    crypto::page::decrypt_page,
    error::{Error, Result},
    registry::KeyEntry,
    scratch::ScratchPool,
};

/// Raw positional reads, following `xRead` semantics: on a short read the
/// unread tail of `buf` is zero-filled and [`Error::ShortRead`] returned.
pub trait PageSource {
    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<()>;
}

impl PageSource for File {
    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<()> {
        let io_err = |_| Error::Io {
            code: SQLITE_IOERR_READ,
        };
        let start = u64::try_from(offset).map_err(|_| Error::Io {
            code: SQLITE_IOERR_READ,
        })?;
        self.seek(SeekFrom::Start(start)).map_err(io_err)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(io_err(e)),
            }
        }
        if filled < buf.len() {
            buf[filled..].fill(0);
            return Err(Error::ShortRead { offset });
        }
        Ok(())
    }
}

/// Per-handle read context.
pub struct FileContext {
    /// Path as given to `xOpen`, for logging.
    pub path: String,
    /// `None` means passthrough.
    pub key: Option<Weak<KeyEntry>>,
    pub layout: PageLayout,
    pub scratch: Arc<ScratchPool>,
}

impl FileContext {
    pub fn new(
        path: impl Into<String>,
        key: Option<&Arc<KeyEntry>>,
        layout: PageLayout,
        scratch: Arc<ScratchPool>,
    ) -> Self {
        Self {
            path: path.into(),
            key: key.map(Arc::downgrade),
            layout,
            scratch,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Fill `buf` with plaintext starting at absolute `offset`.
    pub fn read(&self, src: &mut dyn PageSource, buf: &mut [u8], offset: i64) -> Result<()> {
        let Some(weak) = &self.key else {
            return src.read_at(buf, offset);
        };
        if buf.is_empty() {
            return Ok(());
        }
        let Some(entry) = weak.upgrade() else {
            log::warn!("chatvfs: key for {} revoked while open", self.path);
            return Err(Error::KeyRevoked {
                path: self.path.clone(),
            });
        };
        if offset < 0 {
            return Err(Error::Io {
                code: SQLITE_IOERR_READ,
            });
        }

        let page_size = self.layout.page_size as u64;
        let offset_u = offset as u64;
        let amount = buf.len() as u64;
        let start_page = offset_u / page_size;
        let end_page = (offset_u + amount - 1) / page_size;
        let start_in_page = (offset_u % page_size) as usize;

        let mut scratch = self.scratch.checkout();
        let pair = &mut *scratch;
        let mut written = 0usize;

        for page in start_page..=end_page {
            let page_offset = (page * page_size) as i64;
            log::trace!("chatvfs: {} read page {page} @ {page_offset}", self.path);

            match src.read_at(&mut pair.raw, page_offset) {
                Ok(()) => {}
                Err(Error::ShortRead { .. }) => {
                    // A partial page cannot be decrypted; hand back zeros.
                    buf[written..].fill(0);
                    return Err(Error::ShortRead { offset });
                }
                Err(e) => return Err(e),
            }

            if let Err(e) = decrypt_page(&pair.raw, &mut pair.plain, &entry.enc_key, &self.layout, page)
            {
                log::error!("chatvfs: {}: {e}", self.path);
                buf.fill(0);
                return Err(e);
            }

            let from = if page == start_page { start_in_page } else { 0 };
            let n = (self.layout.page_size - from).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&pair.plain[from..from + n]);
            written += n;
            if written == buf.len() {
                break;
            }
        }

        Ok(())
    }
}
