//! Filesystem-backed persistence of archive bytes, with a free-space guard.
//!
//! One file per identifier lives under a configured directory, named by the
//! decimal form of the identifier with no extension. A zero-byte file is a
//! disk tombstone.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::AsyncWriteExt;

const MEGABYTE: u64 = 1024 * 1024;

/// Disk-backed archive store rooted at a `beatmaps/`-style directory.
pub struct DiskStore {
    root: PathBuf,
    free_space: AtomicI64,
}

impl DiskStore {
    /// Opens (creating if absent) `root` and computes the initial tracked
    /// free-space counter as filesystem space minus `required_free_space_mb`.
    pub fn open(root: impl AsRef<Path>, required_free_space_mb: u64) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let available = available_space(&root)?;
        let reservation = required_free_space_mb * MEGABYTE;
        let free_space = available.saturating_sub(reservation) as i64;
        Ok(Self {
            root,
            free_space: AtomicI64::new(free_space),
        })
    }

    fn path_for(&self, id: i64) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Reads the full contents of `beatmaps/<id>`, if present. A present but
    /// zero-byte file (disk tombstone) returns `Some(vec![])`.
    pub async fn read(&self, id: i64) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes `bytes` to `beatmaps/<id>`. An empty slice creates a zero-byte
    /// tombstone. Decrements the tracked free-space counter on success.
    pub async fn write(&self, id: i64, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(id);
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &path).await?;
        if !bytes.is_empty() {
            self.decrease_available_space(bytes.len() as u64);
        }
        Ok(())
    }

    /// True iff the tracked free-space counter is still positive.
    pub fn can_write(&self) -> bool {
        self.free_space.load(Ordering::Acquire) > 0
    }

    fn decrease_available_space(&self, bytes: u64) {
        let mut current = self.free_space.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes as i64);
            match self.free_space.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

fn available_space(path: &Path) -> std::io::Result<u64> {
    fs4::available_space(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir();
        let store = DiskStore::open(&dir, 0).unwrap();
        store.write(42, b"PK\x03\x04hello").await.unwrap();
        let bytes = store.read(42).await.unwrap().unwrap();
        assert_eq!(bytes, b"PK\x03\x04hello");
    }

    #[tokio::test]
    async fn empty_write_creates_tombstone() {
        let dir = tempdir();
        let store = DiskStore::open(&dir, 0).unwrap();
        store.write(7, b"").await.unwrap();
        let bytes = store.read(7).await.unwrap().unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempdir();
        let store = DiskStore::open(&dir, 0).unwrap();
        assert!(store.read(999).await.unwrap().is_none());
    }

    fn tempdir() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hanaru-mirror-test-{}", std::process::id()));
        path.push(uuid_like());
        path
    }

    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!(
            "{:x}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }
}
