use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

use crate::constants::formats::CHECKSUM_CHUNK_BYTES;
use crate::transport::fs::file_mtime;
use crate::types::ChecksumHex;

/// Hex MD5 digest of a byte slice.
pub fn checksum_bytes(bytes: impl AsRef<[u8]>) -> ChecksumHex {
    hex::encode(Md5::digest(bytes.as_ref()))
}

/// Hex MD5 digest of a file, streamed in fixed-size chunks.
pub fn file_checksum(path: &Path) -> io::Result<ChecksumHex> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; CHECKSUM_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex MD5 digest over the concatenation of `parts`, in iteration order.
pub fn checksum_iter<I, S>(parts: I) -> ChecksumHex
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hex::encode(hasher.finalize())
}

/// Dataset checksum: per-item checksums concatenated in item-id order, so the
/// result does not depend on discovery order.
pub fn dataset_checksum<'a, I>(items: I) -> ChecksumHex
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut items: Vec<(&str, &str)> = items.into_iter().collect();
    items.sort_unstable();
    checksum_iter(items.into_iter().map(|(_, checksum)| checksum))
}

#[derive(Clone, Debug)]
struct CachedDigest {
    len: u64,
    modified: Option<DateTime<Utc>>,
    digest: ChecksumHex,
}

/// Memoizes file checksums keyed by path; an entry is reused only while the
/// file's length and modification time are unchanged.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: RwLock<HashMap<PathBuf, CachedDigest>>,
}

impl ChecksumCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checksum of `path`, computed at most once per file revision.
    pub fn checksum(&self, path: &Path) -> io::Result<ChecksumHex> {
        let len = std::fs::metadata(path)?.len();
        let modified = file_mtime(path);
        if let Ok(entries) = self.entries.read()
            && let Some(cached) = entries.get(path)
            && cached.len == len
            && cached.modified == modified
            && modified.is_some()
        {
            return Ok(cached.digest.clone());
        }
        let digest = file_checksum(path)?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                path.to_path_buf(),
                CachedDigest {
                    len,
                    modified,
                    digest: digest.clone(),
                },
            );
        }
        Ok(digest)
    }

    /// Forget a cached entry.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(path);
        }
    }

    /// Number of cached digests.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
