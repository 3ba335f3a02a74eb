use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::Result;

/// Exclusive advisory lock guarding an orders file
///
/// Whoever holds it is the only process allowed to write the file. The lock
/// lives in a sibling `<orders>.lock` file and is released on drop or when
/// the holding process exits.
#[derive(Debug)]
pub struct OrdersLock {
    file: File,
    path: PathBuf,
}

impl OrdersLock {
    pub fn path_for(orders_path: &Path) -> PathBuf {
        let mut name = orders_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock without blocking; `Ok(None)` when another holder has it
    pub fn try_acquire(orders_path: &Path) -> Result<Option<Self>> {
        let path = Self::path_for(orders_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Acquired orders lock");
                Ok(Some(Self { file, path }))
            }
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for OrdersLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "Failed to release orders lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let orders = dir.path().join("conditional_orders.json");

        let held = OrdersLock::try_acquire(&orders).unwrap().unwrap();
        assert_eq!(held.path(), dir.path().join("conditional_orders.json.lock"));
        assert!(OrdersLock::try_acquire(&orders).unwrap().is_none());

        drop(held);
        assert!(OrdersLock::try_acquire(&orders).unwrap().is_some());
    }

    #[test]
    fn test_lock_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let orders = dir.path().join("nested").join("orders.json");

        let lock = OrdersLock::try_acquire(&orders).unwrap();
        assert!(lock.is_some());
        assert!(dir.path().join("nested").join("orders.json.lock").exists());
    }
}
