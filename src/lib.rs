//! Read-only decrypting SQLite VFS for encrypted chat databases.
//!
//! Register the raw key for a database path, install the shim, then open
//! the path with SQLite as usual. Pages of keyed files are decrypted on
//! read; files without a key are served unchanged.

pub mod config;
pub mod crypto;
pub mod error;
pub mod ffi;
pub mod io;
pub mod registry;
pub mod scratch;
pub mod vfs;

use std::{
    ffi::{c_char, c_int, c_void},
    path::PathBuf,
    sync::Arc,
};

use libsqlite3_sys::{SQLITE_ERROR, SQLITE_OK};
use once_cell::sync::{Lazy, OnceCell};

pub use config::{IvPosition, KeyManifest, Page0Placement, PageLayout};
pub use error::{Error, Result};
pub use registry::KeyRegistry;
pub use vfs::ChatVfs;

/// Name the process-wide shim registers under.
pub const DEFAULT_VFS_NAME: &str = "chatvfs";

pub struct VfsBuilder {
    name: String,
    layout: PageLayout,
    registry: Option<Arc<KeyRegistry>>,
}

impl Default for VfsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsBuilder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_VFS_NAME.into(),
            layout: PageLayout::default(),
            registry: None,
        }
    }

    pub fn vfs_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.layout.page_size = size;
        self
    }

    pub fn salt_size(mut self, size: usize) -> Self {
        self.layout.salt_size = size;
        self
    }

    pub fn reserve_size(mut self, size: usize) -> Self {
        self.layout.reserve_size = size;
        self
    }

    pub fn iv_position(mut self, position: IvPosition) -> Self {
        self.layout.iv_position = position;
        self
    }

    pub fn page0_placement(mut self, placement: Page0Placement) -> Self {
        self.layout.page0 = placement;
        self
    }

    /// Share an existing registry. A fresh one is created otherwise.
    pub fn registry(mut self, registry: Arc<KeyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> anyhow::Result<ChatVfs> {
        let registry = self.registry.unwrap_or_default();
        ChatVfs::new(&self.name, registry, self.layout)
    }

    /// Build and install in one step.
    pub fn register(self, make_default: bool) -> anyhow::Result<ChatVfs> {
        let vfs = self.build()?;
        vfs.install(make_default)?;
        Ok(vfs)
    }
}

// ── Process-wide shim ───────────────────────────────────────────────

static DEFAULT_REGISTRY: Lazy<Arc<KeyRegistry>> = Lazy::new(|| Arc::new(KeyRegistry::new()));
static DEFAULT_SHIM: OnceCell<ChatVfs> = OnceCell::new();

/// Registry backing the process-wide shim.
pub fn default_registry() -> &'static Arc<KeyRegistry> {
    &DEFAULT_REGISTRY
}

fn default_shim() -> anyhow::Result<&'static ChatVfs> {
    DEFAULT_SHIM.get_or_try_init(|| {
        VfsBuilder::new()
            .registry(DEFAULT_REGISTRY.clone())
            .build()
    })
}

/// Register hex-encoded key material for `path` with the process-wide shim.
/// `path` should be the full path SQLite will open.
pub fn register_key(path: &str, enc_key_hex: &str, mac_key_hex: &str) -> Result<()> {
    DEFAULT_REGISTRY.register_hex(path, enc_key_hex, mac_key_hex)
}

pub fn unregister_key(path: &str) {
    DEFAULT_REGISTRY.unregister(path);
}

/// Install the process-wide shim as SQLite's default VFS.
pub fn install_shim() -> anyhow::Result<()> {
    default_shim()?.install(true)
}

/// Remove the process-wide shim. No-op if it was never installed.
pub fn remove_shim() -> anyhow::Result<()> {
    match DEFAULT_SHIM.get() {
        Some(shim) => shim.remove(),
        None => Ok(()),
    }
}

pub fn shim_installed() -> bool {
    DEFAULT_SHIM.get().is_some_and(ChatVfs::is_installed)
}

/// Register every entry of a key manifest with the process-wide shim.
pub fn register_manifest(manifest: &KeyManifest) -> Result<usize> {
    for entry in &manifest.entries {
        register_key(&entry.path, &entry.enc_key, &entry.mac_key)?;
    }
    Ok(manifest.entries.len())
}

/// Extension entry point. Loads keys from the JSON manifest named by
/// `CHATVFS_KEYS` (if set) and installs the shim as the default VFS.
#[unsafe(no_mangle)]
pub extern "C" fn sqlite3_chatvfs_init(
    _db: *mut c_void,
    _err_msg: *mut *mut c_char,
    _api: *mut c_void,
) -> c_int {
    let _ = env_logger::try_init();

    if let Some(path) = std::env::var_os("CHATVFS_KEYS").map(PathBuf::from) {
        match KeyManifest::load(&path).and_then(|m| register_manifest(&m)) {
            Ok(n) => log::info!("chatvfs: {n} key(s) loaded from {}", path.display()),
            Err(e) => {
                log::error!("chatvfs: {e}");
                return e.sqlite_code();
            }
        }
    }

    match install_shim() {
        Ok(()) => SQLITE_OK,
        Err(e) => {
            log::error!("chatvfs: install failed: {e}");
            SQLITE_ERROR
        }
    }
}
