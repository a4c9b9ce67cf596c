//! Content-derived file identity.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Result, SluiceError};

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    /// Hex digest identifying the content at `path`. Directories fingerprint
    /// their contained files.
    async fn fingerprint(&self, path: &Path) -> Result<String>;
}

/// Fingerprint `path`, logging failures and returning an empty string so the
/// caller falls back to path identity.
pub async fn fingerprint_or_empty(
    fingerprinter: &dyn Fingerprinter,
    path: &Path,
) -> String {
    match fingerprinter.fingerprint(path).await {
        Ok(fp) => fp,
        Err(err) => {
            warn!(
                target: "ingest::scan",
                path = %path.display(),
                error = %err,
                "fingerprint failed; using path identity"
            );
            String::new()
        }
    }
}

/// SHA-256 over the whole file up to `full_hash_limit` bytes; larger files
/// hash their length plus head, middle and tail samples.
#[derive(Clone)]
pub struct Sha256Fingerprinter {
    full_hash_limit: u64,
    sample_size: u64,
}

impl fmt::Debug for Sha256Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sha256Fingerprinter")
            .field("full_hash_limit", &self.full_hash_limit)
            .field("sample_size", &self.sample_size)
            .finish()
    }
}

impl Default for Sha256Fingerprinter {
    fn default() -> Self {
        Self {
            full_hash_limit: 100 * 1024 * 1024,
            sample_size: 1024 * 1024,
        }
    }
}

impl Sha256Fingerprinter {
    pub fn new(full_hash_limit: u64, sample_size: u64) -> Self {
        Self {
            full_hash_limit,
            sample_size: sample_size.max(1),
        }
    }

    fn hash_path(&self, path: &Path) -> Result<String> {
        if !path.is_dir() {
            return self.hash_file(path);
        }
        let mut entries = walk_files(path)?;
        entries.sort();
        let mut hasher = Sha256::new();
        for entry in entries {
            let rel = entry.strip_prefix(path).unwrap_or(&entry);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(self.hash_file(&entry)?.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn hash_file(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut hasher = Sha256::new();

        if len <= self.full_hash_limit {
            std::io::copy(&mut file, &mut hasher)?;
        } else {
            hasher.update(len.to_le_bytes());
            let mid = (len / 2).saturating_sub(self.sample_size / 2);
            let tail = len.saturating_sub(self.sample_size);
            let mut buf = vec![0u8; self.sample_size as usize];
            for offset in [0, mid, tail] {
                file.seek(SeekFrom::Start(offset))?;
                let read = read_up_to(&mut file, &mut buf)?;
                hasher.update(&buf[..read]);
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Regular files below `root`. Symlinks are not followed.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

#[async_trait]
impl Fingerprinter for Sha256Fingerprinter {
    async fn fingerprint(&self, path: &Path) -> Result<String> {
        let this = self.clone();
        let path = path.to_path_buf();
        spawn_blocking(move || this.hash_path(&path))
            .await
            .map_err(|e| {
                SluiceError::Internal(format!("fingerprint task panicked: {e}"))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn identical_content_has_identical_fingerprint() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        let fp = Sha256Fingerprinter::default();
        let fa = fp.fingerprint(&a).await.unwrap();
        assert_eq!(fa, fp.fingerprint(&b).await.unwrap());
        assert_eq!(fa.len(), 64);
    }

    #[tokio::test]
    async fn sampled_hash_sees_tail_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![7u8; 4096]).unwrap();
        drop(file);

        let fp = Sha256Fingerprinter::new(1024, 256);
        let before = fp.fingerprint(&path).await.unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"tail").unwrap();
        drop(file);
        assert_ne!(before, fp.fingerprint(&path).await.unwrap());
    }

    #[tokio::test]
    async fn folder_fingerprint_covers_nested_files() {
        let dir = tempdir().unwrap();
        let show = dir.path().join("show");
        std::fs::create_dir_all(show.join("season 1")).unwrap();
        std::fs::write(show.join("season 1/e01.mkv"), b"one").unwrap();
        std::fs::write(show.join("cover.jpg"), b"art").unwrap();

        let fp = Sha256Fingerprinter::default();
        let before = fp.fingerprint(&show).await.unwrap();
        assert_eq!(before.len(), 64);
        assert_eq!(walk_files(&show).unwrap().len(), 2);

        std::fs::write(show.join("season 1/e01.mkv"), b"one, recut").unwrap();
        assert_ne!(before, fp.fingerprint(&show).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn folder_fingerprint_skips_symlinked_directories() {
        let dir = tempdir().unwrap();
        let show = dir.path().join("show");
        let elsewhere = dir.path().join("elsewhere");
        std::fs::create_dir_all(&show).unwrap();
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(show.join("e01.mkv"), b"one").unwrap();
        std::fs::write(elsewhere.join("extra.mkv"), b"extra").unwrap();

        let fp = Sha256Fingerprinter::default();
        let plain = fp.fingerprint(&show).await.unwrap();
        std::os::unix::fs::symlink(&elsewhere, show.join("linked")).unwrap();

        let linked = fp.fingerprint(&show).await.unwrap();
        assert_eq!(plain, linked);
        assert!(!linked.is_empty());
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_empty() {
        let fp = Sha256Fingerprinter::default();
        let out =
            fingerprint_or_empty(&fp, Path::new("/definitely/not/here.bin")).await;
        assert!(out.is_empty());
    }
}
