#![allow(dead_code)]

use std::{
    ffi::{CString, c_int, c_void},
    path::{Path, PathBuf},
};

use chatvfs::{PageLayout, crypto::keys::PageKey, crypto::page::encrypt_page};
use libsqlite3_sys::*;

pub const PAGE: usize = 4096;

/// Served-form pages with a per-page byte pattern; page 0 starts with
/// `header`, which lands at the start of its encrypted span on disk.
pub fn plaintext(pages: usize, seed: u8, header: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = (0..pages * PAGE)
        .map(|i| (i as u8).wrapping_mul(seed).wrapping_add(i as u8 / 3))
        .collect();
    out[..header.len()].copy_from_slice(header);
    out
}

/// Encrypt `plain` page by page, IV derived from page index and seed.
pub fn encrypt(plain: &[u8], key: &PageKey, seed: u8) -> Vec<u8> {
    let layout = PageLayout::default();
    let mut out = vec![0u8; plain.len()];
    for (i, (src, dst)) in plain.chunks(PAGE).zip(out.chunks_mut(PAGE)).enumerate() {
        let iv = [seed ^ i as u8; 16];
        encrypt_page(src, dst, key, &iv, &layout, i as u64).unwrap();
    }
    out
}

/// Expected bytes served by the shim for an encrypted file: the raw
/// reserve follows each payload and page 0 ends in a zeroed tail.
pub fn served(plain: &[u8], raw: &[u8]) -> Vec<u8> {
    let layout = PageLayout::default();
    let mut out = plain.to_vec();
    for p in 0..plain.len() / PAGE {
        let base = p * PAGE;
        let end = base + PAGE;
        let payload_end = base + layout.cipher_len(p == 0);
        let reserve_end = payload_end + layout.reserve_size;
        out[payload_end..reserve_end].copy_from_slice(&raw[end - layout.reserve_size..end]);
        out[reserve_end..end].fill(0);
    }
    out
}

/// Build a real SQLite database whose pages keep the trailing 80 bytes
/// free, so it survives being encrypted page by page. Returns its bytes.
pub fn sqlite_database(path: &Path, sql: &str) -> Vec<u8> {
    let layout = PageLayout::default();
    {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("PRAGMA page_size = 4096;").unwrap();
        let mut reserve = layout.reserve_size as c_int;
        let rc = unsafe {
            sqlite3_file_control(
                conn.handle(),
                c"main".as_ptr(),
                SQLITE_FCNTL_RESERVE_BYTES,
                (&mut reserve as *mut c_int).cast(),
            )
        };
        assert_eq!(rc, SQLITE_OK);
        conn.execute_batch(sql).unwrap();
    }
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(bytes.len() % PAGE, 0);
    assert_eq!(bytes[20] as usize, layout.reserve_size, "reserve bytes not applied");
    bytes
}

pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A file opened directly through a registered VFS, bypassing the pager.
pub struct RawHandle {
    /// `u64` storage keeps the `sqlite3_file` pointer-aligned.
    buf: Vec<u64>,
}

impl RawHandle {
    pub fn open(vfs_name: &str, path: &Path) -> Result<Self, c_int> {
        let c_vfs = CString::new(vfs_name).unwrap();
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        unsafe {
            let vfs = sqlite3_vfs_find(c_vfs.as_ptr());
            assert!(!vfs.is_null(), "vfs {vfs_name} not registered");
            let mut buf = vec![0u64; ((*vfs).szOsFile as usize).div_ceil(8)];
            let file = buf.as_mut_ptr() as *mut sqlite3_file;
            let mut out_flags = 0;
            let rc = ((*vfs).xOpen.unwrap())(
                vfs,
                c_path.as_ptr(),
                file,
                SQLITE_OPEN_READONLY | SQLITE_OPEN_MAIN_DB,
                &mut out_flags,
            );
            if rc != SQLITE_OK {
                return Err(rc);
            }
            Ok(Self { buf })
        }
    }

    fn file(&mut self) -> *mut sqlite3_file {
        self.buf.as_mut_ptr() as *mut sqlite3_file
    }

    fn methods(&self) -> &sqlite3_io_methods {
        unsafe { &*(*(self.buf.as_ptr() as *const sqlite3_file)).pMethods }
    }

    pub fn read(&mut self, offset: i64, len: usize) -> (c_int, Vec<u8>) {
        let mut out = vec![0xCCu8; len];
        let f = self.file();
        let rc = unsafe {
            (self.methods().xRead.unwrap())(f, out.as_mut_ptr() as *mut c_void, len as c_int, offset)
        };
        (rc, out)
    }

    pub fn write(&mut self, offset: i64, data: &[u8]) -> c_int {
        let f = self.file();
        unsafe {
            (self.methods().xWrite.unwrap())(
                f,
                data.as_ptr() as *const c_void,
                data.len() as c_int,
                offset,
            )
        }
    }

    pub fn truncate(&mut self, size: i64) -> c_int {
        let f = self.file();
        unsafe { (self.methods().xTruncate.unwrap())(f, size) }
    }

    pub fn file_size(&mut self) -> (c_int, i64) {
        let f = self.file();
        let mut size = 0i64;
        let rc = unsafe { (self.methods().xFileSize.unwrap())(f, &mut size) };
        (rc, size)
    }

    pub fn sector_size(&mut self) -> c_int {
        let f = self.file();
        unsafe { (self.methods().xSectorSize.unwrap())(f) }
    }

    pub fn lock(&mut self, level: c_int) -> c_int {
        let f = self.file();
        unsafe { (self.methods().xLock.unwrap())(f, level) }
    }

    pub fn unlock(&mut self, level: c_int) -> c_int {
        let f = self.file();
        unsafe { (self.methods().xUnlock.unwrap())(f, level) }
    }

    pub fn check_reserved_lock(&mut self) -> (c_int, c_int) {
        let f = self.file();
        let mut out = 0;
        let rc = unsafe { (self.methods().xCheckReservedLock.unwrap())(f, &mut out) };
        (rc, out)
    }
}

impl Drop for RawHandle {
    fn drop(&mut self) {
        let f = self.file();
        unsafe {
            if !(*f).pMethods.is_null() {
                ((*(*f).pMethods).xClose.unwrap())(f);
            }
        }
    }
}
