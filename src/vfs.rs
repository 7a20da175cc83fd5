//! SQLite VFS FFI shim.
//!
//! Wraps the default OS VFS. Reads of files that have a registered key are
//! decrypted page by page; every other file is served verbatim. Writes and
//! truncation are refused with `SQLITE_READONLY`.

use std::{
    ffi::{CStr, CString, c_char, c_int, c_void},
    ptr,
    sync::Arc,
};

use libsqlite3_sys::*;

use crate::{
    config::PageLayout,
    error::{Error, Result},
    io::{FileContext, PageSource},
    registry::{KeyRegistry, normalize_path},
    scratch::ScratchPool,
};

type XOpen = unsafe extern "C" fn(
    *mut sqlite3_vfs,
    *const c_char,
    *mut sqlite3_file,
    c_int,
    *mut c_int,
) -> c_int;

// ── Our extended file struct ────────────────────────────────────────

/// Must start with `sqlite3_file` so SQLite can cast between them.
#[repr(C)]
struct ChatFile {
    base: sqlite3_file,
    /// The real file opened by the wrapped VFS.
    inner_file: *mut sqlite3_file,
    ctx: *mut FileContext,
}

// ── Per-instance VFS context (leaked, lives for the process) ───────

struct ChatGlobal {
    registry: Arc<KeyRegistry>,
    layout: PageLayout,
    scratch: Arc<ScratchPool>,
    inner_vfs: *mut sqlite3_vfs,
    io_methods: sqlite3_io_methods,
}

// Safety: inner_vfs comes from SQLite and stays valid for the process
// lifetime. ChatGlobal is leaked and never mutated after construction.
unsafe impl Send for ChatGlobal {}
unsafe impl Sync for ChatGlobal {}

/// Adapter giving the byte-range reader access to the real file.
struct InnerFile(*mut sqlite3_file);

impl PageSource for InnerFile {
    fn read_at(&mut self, buf: &mut [u8], offset: i64) -> Result<()> {
        let rc = unsafe {
            match (*(*self.0).pMethods).xRead {
                Some(read) => read(self.0, buf.as_mut_ptr().cast(), buf.len() as c_int, offset),
                None => SQLITE_IOERR_READ,
            }
        };
        match rc {
            SQLITE_OK => Ok(()),
            SQLITE_IOERR_SHORT_READ => Err(Error::ShortRead { offset }),
            code => Err(Error::Io { code }),
        }
    }
}

// ── xOpen ───────────────────────────────────────────────────────────

unsafe extern "C" fn chat_open(
    vfs: *mut sqlite3_vfs,
    z_name: *const c_char,
    file: *mut sqlite3_file,
    flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    unsafe {
        let global = &*((*vfs).pAppData as *const ChatGlobal);
        let inner_vfs = global.inner_vfs;
        let cfile = file as *mut ChatFile;
        (*cfile).base.pMethods = ptr::null();
        (*cfile).inner_file = ptr::null_mut();
        (*cfile).ctx = ptr::null_mut();

        let Some(real_open) = (*inner_vfs).xOpen else {
            return SQLITE_CANTOPEN;
        };

        let inner_sz = (*inner_vfs).szOsFile as usize;
        let inner_buf = libc::malloc(inner_sz) as *mut sqlite3_file;
        if inner_buf.is_null() {
            return SQLITE_NOMEM;
        }
        ptr::write_bytes(inner_buf as *mut u8, 0, inner_sz);

        let rc = real_open(inner_vfs, z_name, inner_buf, flags, p_out_flags);
        if rc != SQLITE_OK {
            libc::free(inner_buf as *mut c_void);
            return rc;
        }

        let path = if z_name.is_null() {
            None
        } else {
            CStr::from_ptr(z_name).to_str().ok()
        };
        let entry = path.and_then(|p| global.registry.lookup(p));
        match path {
            Some(p) => log::debug!(
                "chatvfs: open {} (normalized {}), key {}",
                p,
                normalize_path(p),
                if entry.is_some() { "found" } else { "absent" }
            ),
            None => log::debug!("chatvfs: open anonymous temp file"),
        }

        let ctx = Box::into_raw(Box::new(FileContext::new(
            path.unwrap_or_default(),
            entry.as_ref(),
            global.layout,
            global.scratch.clone(),
        )));

        (*cfile).base.pMethods = &global.io_methods;
        (*cfile).inner_file = inner_buf;
        (*cfile).ctx = ctx;

        SQLITE_OK
    }
}

// ── xClose ──────────────────────────────────────────────────────────

unsafe extern "C" fn chat_close(file: *mut sqlite3_file) -> c_int {
    unsafe {
        let cfile = file as *mut ChatFile;
        let inner = (*cfile).inner_file;

        let rc = if !inner.is_null() && !(*inner).pMethods.is_null() {
            match (*(*inner).pMethods).xClose {
                Some(close) => close(inner),
                None => SQLITE_OK,
            }
        } else {
            SQLITE_OK
        };

        if !inner.is_null() {
            libc::free(inner as *mut c_void);
            (*cfile).inner_file = ptr::null_mut();
        }

        if !(*cfile).ctx.is_null() {
            drop(Box::from_raw((*cfile).ctx));
            (*cfile).ctx = ptr::null_mut();
        }

        rc
    }
}

// ── xRead (decrypt after read) ─────────────────────────────────────

unsafe extern "C" fn chat_read(
    file: *mut sqlite3_file,
    buf: *mut c_void,
    i_amt: c_int,
    i_ofst: i64,
) -> c_int {
    unsafe {
        let cfile = file as *mut ChatFile;
        if i_amt <= 0 {
            return SQLITE_OK;
        }
        let ctx = &*(*cfile).ctx;
        let out = std::slice::from_raw_parts_mut(buf as *mut u8, i_amt as usize);
        let mut inner = InnerFile((*cfile).inner_file);

        match ctx.read(&mut inner, out, i_ofst) {
            Ok(()) => SQLITE_OK,
            Err(e) => e.sqlite_code(),
        }
    }
}

// ── Refused mutations ───────────────────────────────────────────────

unsafe extern "C" fn chat_write(
    _file: *mut sqlite3_file,
    _buf: *const c_void,
    _i_amt: c_int,
    _i_ofst: i64,
) -> c_int {
    Error::ReadOnly.sqlite_code()
}

unsafe extern "C" fn chat_truncate(_file: *mut sqlite3_file, _size: i64) -> c_int {
    Error::ReadOnly.sqlite_code()
}

// ── Forwarded I/O methods ───────────────────────────────────────────

macro_rules! forward_io {
    ($name:ident => $method:ident ( $($arg:ident : $ty:ty),* ), missing = $missing:expr) => {
        unsafe extern "C" fn $name(file: *mut sqlite3_file, $( $arg: $ty, )*) -> c_int {
            unsafe {
                let inner = (*(file as *mut ChatFile)).inner_file;
                match (*(*inner).pMethods).$method {
                    Some(f) => f(inner, $( $arg, )*),
                    None => $missing,
                }
            }
        }
    };
}

forward_io!(chat_sync => xSync(flags: c_int), missing = SQLITE_OK);
forward_io!(chat_file_size => xFileSize(p_size: *mut i64), missing = SQLITE_IOERR_FSTAT);
forward_io!(chat_lock => xLock(lock_type: c_int), missing = SQLITE_OK);
forward_io!(chat_unlock => xUnlock(lock_type: c_int), missing = SQLITE_OK);
forward_io!(
    chat_check_reserved_lock => xCheckReservedLock(p_res_out: *mut c_int),
    missing = SQLITE_OK
);
forward_io!(
    chat_file_control => xFileControl(op: c_int, p_arg: *mut c_void),
    missing = SQLITE_NOTFOUND
);
forward_io!(chat_sector_size => xSectorSize(), missing = 4096);
forward_io!(chat_device_characteristics => xDeviceCharacteristics(), missing = 0);

// ── Forwarded VFS methods ───────────────────────────────────────────

macro_rules! forward_vfs {
    ($name:ident => $method:ident ( $($arg:ident : $ty:ty),* ), missing = $missing:expr) => {
        unsafe extern "C" fn $name(vfs: *mut sqlite3_vfs, $( $arg: $ty, )*) -> c_int {
            unsafe {
                let global = &*((*vfs).pAppData as *const ChatGlobal);
                match (*global.inner_vfs).$method {
                    Some(f) => f(global.inner_vfs, $( $arg, )*),
                    None => $missing,
                }
            }
        }
    };
}

forward_vfs!(chat_delete => xDelete(z_name: *const c_char, sync_dir: c_int), missing = SQLITE_IOERR_DELETE);
forward_vfs!(
    chat_access => xAccess(z_name: *const c_char, flags: c_int, p_res_out: *mut c_int),
    missing = SQLITE_IOERR_ACCESS
);
forward_vfs!(
    chat_full_pathname => xFullPathname(z_name: *const c_char, n_out: c_int, z_out: *mut c_char),
    missing = SQLITE_CANTOPEN
);
forward_vfs!(chat_randomness => xRandomness(n_byte: c_int, z_out: *mut c_char), missing = 0);
forward_vfs!(chat_sleep => xSleep(microseconds: c_int), missing = 0);
forward_vfs!(chat_current_time => xCurrentTime(p_time: *mut f64), missing = SQLITE_ERROR);
forward_vfs!(
    chat_get_last_error => xGetLastError(n_buf: c_int, z_buf: *mut c_char),
    missing = SQLITE_OK
);

unsafe extern "C" fn chat_current_time_int64(vfs: *mut sqlite3_vfs, p_time: *mut i64) -> c_int {
    unsafe {
        let global = &*((*vfs).pAppData as *const ChatGlobal);
        if (*global.inner_vfs).iVersion >= 2
            && let Some(f) = (*global.inner_vfs).xCurrentTimeInt64
        {
            return f(global.inner_vfs, p_time);
        }
        let mut t: f64 = 0.0;
        let rc = chat_current_time(vfs, &mut t);
        if rc == SQLITE_OK {
            *p_time = (t * 86_400_000.0) as i64;
        }
        rc
    }
}

// ── Registration ────────────────────────────────────────────────────

/// One decrypting VFS instance.
///
/// The `sqlite3_vfs` and method tables are leaked: SQLite may hold
/// pointers into them from open files even after the VFS is unregistered.
pub struct ChatVfs {
    name: String,
    vfs: *mut sqlite3_vfs,
    global: &'static ChatGlobal,
}

// Safety: the pointed-to tables are immutable after construction and
// registration calls are serialized by SQLite's own mutex.
unsafe impl Send for ChatVfs {}
unsafe impl Sync for ChatVfs {}

impl ChatVfs {
    /// Build a VFS named `name` wrapping the current default VFS. Not yet
    /// registered with SQLite.
    pub fn new(name: &str, registry: Arc<KeyRegistry>, layout: PageLayout) -> anyhow::Result<Self> {
        layout.validate()?;
        let inner_vfs = resolve_inner_vfs()?;

        let io_methods = sqlite3_io_methods {
            iVersion: 1,
            xClose: Some(chat_close),
            xRead: Some(chat_read),
            xWrite: Some(chat_write),
            xTruncate: Some(chat_truncate),
            xSync: Some(chat_sync),
            xFileSize: Some(chat_file_size),
            xLock: Some(chat_lock),
            xUnlock: Some(chat_unlock),
            xCheckReservedLock: Some(chat_check_reserved_lock),
            xFileControl: Some(chat_file_control),
            xSectorSize: Some(chat_sector_size),
            xDeviceCharacteristics: Some(chat_device_characteristics),
            // v2/v3 methods — not needed for iVersion=1.
            xShmMap: None,
            xShmLock: None,
            xShmBarrier: None,
            xShmUnmap: None,
            xFetch: None,
            xUnfetch: None,
        };

        let global: &'static ChatGlobal = Box::leak(Box::new(ChatGlobal {
            registry,
            layout,
            scratch: Arc::new(ScratchPool::new(layout.page_size)),
            inner_vfs,
            io_methods,
        }));

        let c_name = CString::new(name)?;
        let vfs = Box::leak(Box::new(sqlite3_vfs {
            iVersion: 2,
            szOsFile: std::mem::size_of::<ChatFile>() as c_int,
            mxPathname: unsafe { (*inner_vfs).mxPathname },
            pNext: ptr::null_mut(),
            zName: c_name.into_raw(),
            pAppData: global as *const ChatGlobal as *mut c_void,
            xOpen: Some(chat_open),
            xDelete: Some(chat_delete),
            xAccess: Some(chat_access),
            xFullPathname: Some(chat_full_pathname),
            xDlOpen: None,
            xDlError: None,
            xDlSym: None,
            xDlClose: None,
            xRandomness: Some(chat_randomness),
            xSleep: Some(chat_sleep),
            xCurrentTime: Some(chat_current_time),
            xGetLastError: Some(chat_get_last_error),
            xCurrentTimeInt64: Some(chat_current_time_int64),
            xSetSystemCall: None,
            xGetSystemCall: None,
            xNextSystemCall: None,
        }));

        Ok(Self {
            name: name.to_owned(),
            vfs,
            global,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.global.registry
    }

    pub fn layout(&self) -> &PageLayout {
        &self.global.layout
    }

    /// Whether SQLite currently resolves our name to this instance.
    pub fn is_installed(&self) -> bool {
        let Ok(c_name) = CString::new(self.name.as_str()) else {
            return false;
        };
        ptr::eq(unsafe { sqlite3_vfs_find(c_name.as_ptr()) }, self.vfs)
    }

    /// Register with SQLite, optionally as the process default. Calling
    /// this again is harmless.
    pub fn install(&self, make_default: bool) -> anyhow::Result<()> {
        let c_name = CString::new(self.name.as_str())?;
        let found = unsafe { sqlite3_vfs_find(c_name.as_ptr()) };
        if ptr::eq(found, self.vfs) && !make_default {
            return Ok(());
        }
        anyhow::ensure!(
            found.is_null() || ptr::eq(found, self.vfs),
            "a different VFS named '{}' is already registered",
            self.name
        );

        let rc = unsafe { sqlite3_vfs_register(self.vfs, make_default as c_int) };
        anyhow::ensure!(rc == SQLITE_OK, "sqlite3_vfs_register failed: {rc}");

        log::info!(
            "chatvfs: '{}' installed (default={make_default}, page_size={}, reserve={})",
            self.name,
            self.global.layout.page_size,
            self.global.layout.reserve_size
        );
        Ok(())
    }

    /// Unregister from SQLite. No-op when not installed.
    pub fn remove(&self) -> anyhow::Result<()> {
        if !self.is_installed() {
            return Ok(());
        }
        let rc = unsafe { sqlite3_vfs_unregister(self.vfs) };
        anyhow::ensure!(rc == SQLITE_OK, "sqlite3_vfs_unregister failed: {rc}");
        log::info!("chatvfs: '{}' removed", self.name);
        Ok(())
    }
}

/// The VFS to delegate to. If the current default is itself a chatvfs
/// shim, wrap what that shim wraps instead of stacking.
fn resolve_inner_vfs() -> anyhow::Result<*mut sqlite3_vfs> {
    let dflt = unsafe { sqlite3_vfs_find(ptr::null()) };
    anyhow::ensure!(!dflt.is_null(), "no default sqlite3 VFS found");
    unsafe {
        if let Some(open) = (*dflt).xOpen
            && ptr::fn_addr_eq(open, chat_open as XOpen)
        {
            let global = &*((*dflt).pAppData as *const ChatGlobal);
            return Ok(global.inner_vfs);
        }
    }
    Ok(dflt)
}
