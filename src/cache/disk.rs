use crate::cache::Backend;
use crate::fingerprint::Fingerprint;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

const TMP_SUFFIX: &str = ".tmp";

/// Stores each payload as a file named by its fingerprint.
///
/// The directory belongs to this backend alone. There is no manifest: the
/// cache's in-memory index is the only record of what is cached, so files
/// left behind by an earlier process are never served.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    dir: PathBuf,
}

impl DiskBackend {
    /// Creates `dir` if needed and removes partial writes from a previous run.
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut stale = 0usize;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TMP_SUFFIX) {
                fs::remove_file(entry.path()).await?;
                stale += 1;
            }
        }
        if stale > 0 {
            tracing::info!("Removed {} partial cache writes from {}", stale, dir.display());
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn tmp_path_for(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!(".{}{}", key, TMP_SUFFIX))
    }
}

#[async_trait::async_trait]
impl Backend for DiskBackend {
    type Handle = PathBuf;

    /// Writes to a temporary file and renames it into place, so a reader
    /// never sees a half-written payload.
    async fn write(&self, key: &Fingerprint, bytes: &Bytes) -> io::Result<PathBuf> {
        let tmp = self.tmp_path_for(key);
        let path = self.path_for(key);
        if let Err(e) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(path)
    }

    async fn read(&self, handle: &PathBuf) -> io::Result<Bytes> {
        fs::read(handle).await.map(Bytes::from)
    }

    /// Already-missing files count as removed.
    async fn remove(&self, handle: &PathBuf) -> io::Result<()> {
        match fs::remove_file(handle).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
