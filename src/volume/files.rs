//! Flat on-disk file store
//!
//! Each stored file is one regular file named after it, directly under the
//! node's data directory. The coordinator keeps no durable index, so a
//! restarting node starts from an empty directory.

use crate::common::{validate_filename, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create the data directory if needed and remove anything left in it.
    pub async fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).await?;

        let mut cleared = 0;
        let mut entries = fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
            cleared += 1;
        }
        if cleared > 0 {
            tracing::info!(cleared, dir = %root.display(), "Cleared stale data directory");
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// Write exactly `size` bytes from `reader` to `filename`.
    ///
    /// A short read leaves no file behind.
    pub async fn write_from<R>(&self, filename: &str, reader: &mut R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.path(filename)?;
        let mut file = File::create(&path).await?;

        let written = match tokio::io::copy(&mut reader.take(size), &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(e.into());
            }
        };

        if written != size {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(Error::ConnectionFailed(format!(
                "client sent {} of {} bytes for {}",
                written, size, filename
            )));
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    pub async fn write(&self, filename: &str, data: &[u8]) -> Result<()> {
        let mut reader = data;
        self.write_from(filename, &mut reader, data.len() as u64).await
    }

    /// Open a stored file for reading, with its length.
    pub async fn open_read(&self, filename: &str) -> Result<Option<(File, u64)>> {
        let path = self.path(filename)?;
        match File::open(&path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        match self.open_read(filename).await? {
            Some((mut file, len)) => {
                let mut data = Vec::with_capacity(len as usize);
                file.read_to_end(&mut data).await?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Delete a file. Returns false if it was not there.
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        let path = self.path(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every stored file, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
