//! C host API for embedding applications that are not written in Rust.
//!
//! Every function returns an SQLite result code. Strings are
//! NUL-terminated UTF-8.

use std::ffi::{CStr, c_char, c_int};

use libsqlite3_sys::{SQLITE_ERROR, SQLITE_MISUSE, SQLITE_OK};

/// Borrow a C string, rejecting null and non-UTF-8 input.
unsafe fn arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

/// Install the shim as SQLite's default VFS.
#[unsafe(no_mangle)]
pub extern "C" fn chatvfs_register() -> c_int {
    let _ = env_logger::try_init();
    match crate::install_shim() {
        Ok(()) => SQLITE_OK,
        Err(e) => {
            log::error!("chatvfs: install failed: {e}");
            SQLITE_ERROR
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn chatvfs_unregister() -> c_int {
    match crate::remove_shim() {
        Ok(()) => SQLITE_OK,
        Err(e) => {
            log::error!("chatvfs: remove failed: {e}");
            SQLITE_ERROR
        }
    }
}

/// Register hex-encoded keys for `db_path`. `mac_key_hex` may be null.
///
/// # Safety
/// Pointer arguments must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn chatvfs_register_keys(
    db_path: *const c_char,
    enc_key_hex: *const c_char,
    mac_key_hex: *const c_char,
) -> c_int {
    let (Some(path), Some(enc)) = (unsafe { arg(db_path) }, unsafe { arg(enc_key_hex) }) else {
        return SQLITE_MISUSE;
    };
    let mac = if mac_key_hex.is_null() {
        ""
    } else {
        match unsafe { arg(mac_key_hex) } {
            Some(m) => m,
            None => return SQLITE_MISUSE,
        }
    };
    match crate::register_key(path, enc, mac) {
        Ok(()) => SQLITE_OK,
        Err(e) => {
            log::error!("chatvfs: register keys for {path}: {e}");
            e.sqlite_code()
        }
    }
}

/// # Safety
/// `db_path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn chatvfs_unregister_keys(db_path: *const c_char) -> c_int {
    match unsafe { arg(db_path) } {
        Some(path) => {
            crate::unregister_key(path);
            SQLITE_OK
        }
        None => SQLITE_MISUSE,
    }
}

/// Number of paths with registered keys.
#[unsafe(no_mangle)]
pub extern "C" fn chatvfs_key_count() -> c_int {
    crate::default_registry().len() as c_int
}
