//! # Filesystem-backed secure store
//!
//! [`FileStore`] is a [`SecureStore`] implementation that keeps each key in its
//! own file. It is used on desktop and mobile builds where no keychain binding
//! is wired in, so that sessions survive app restarts.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/
//! └── secure/            # 0700 on unix
//!     └── <key>          # raw UTF-8 value, 0600 on unix
//! ```
//!
//! Values are tokens, so on unix only the owning user may read them. Each value
//! is written to a private temp file and renamed into place.
//!
//! ## Platform data directories
//!
//! [`FileStore::in_data_dir`] resolves the base with [`dirs::data_dir()`]:
//!
//! | Platform | Path |
//! |----------|------|
//! | macOS / iOS | `~/Library/Application Support/<app>/` |
//! | Linux | `~/.local/share/<app>/` |
//! | Windows | `C:\Users\<user>\AppData\Roaming\<app>\` |
//! | Android | App-internal storage (via `dirs`) |

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::secure::{SecureStore, StoreError};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Filesystem-backed SecureStore for desktop and mobile persistence.
#[derive(Clone, Debug)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Store rooted at `<data_dir>/<app_name>/`, falling back to the working
    /// directory when the platform has no data dir.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn in_data_dir(app_name: &str) -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app_name);
        Self::new(base)
    }

    fn secure_dir(&self) -> PathBuf {
        self.base.join("secure")
    }

    async fn ensure_secure_dir(&self) -> Result<PathBuf, StoreError> {
        let dir = self.secure_dir();
        tokio::fs::create_dir_all(&dir).await?;
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, Permissions::from_mode(DIR_MODE)).await?;
        }
        Ok(dir)
    }

    /// Keys become file names, so only `[A-Za-z0-9_.-]` is accepted.
    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.secure_dir().join(key))
    }
}

#[async_trait]
impl SecureStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let dir = self.ensure_secure_dir().await?;
        let tmp = dir.join(format!(".{key}.tmp"));
        write_private(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::trace!(key, "secure value written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `value` to `path`, readable by the owner only.
async fn write_private(path: &Path, value: &str) -> Result<(), StoreError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options.open(path).await?;
    // A leftover temp file keeps its old mode
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(Permissions::from_mode(FILE_MODE)).await?;
    }
    file.write_all(value.as_bytes()).await?;
    file.sync_all().await?;
    Ok(())
}
