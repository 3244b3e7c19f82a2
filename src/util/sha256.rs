use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::metadata::descriptor::ContentHash;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("unable to hash {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
}

pub fn sha256_hash(bytes: &[u8]) -> ContentHash {
    ContentHash::from_digest(Sha256::digest(bytes))
}

/// Streams the file through SHA-256, returning the digest and the number of
/// bytes read.
pub async fn sha256_file<P: AsRef<Path>>(path: P) -> Result<(ContentHash, u64), HashError> {
    let path = path.as_ref();
    let read_error = |source| HashError::Read { path: path.to_path_buf(), source };

    let mut file = File::open(path).await.map_err(read_error)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size: u64 = 0;

    loop {
        let n = file.read(&mut buf).await.map_err(read_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((ContentHash::from_digest(hasher.finalize()), size))
}
