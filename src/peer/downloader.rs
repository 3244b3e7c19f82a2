use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::metadata::{ContentHash, Descriptor};
use crate::peer::PeerEndpoint;
use crate::util::io::copy_chunked;
use crate::util::sha256::{HashError, sha256_file};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("unable to connect to {peer}: {source}")]
    Connect { peer: PeerEndpoint, source: io::Error },
    #[error("transfer from {peer} failed: {source}")]
    Transfer { peer: PeerEndpoint, source: io::Error },
    #[error("unable to write {path}: {source}")]
    FileSystem { path: PathBuf, source: io::Error },
    #[error("{peer} did not finish within {limit:?}")]
    Timeout { peer: PeerEndpoint, limit: Duration },
    /// The peer does not hold the file yet. The next candidate is tried.
    #[error("{peer} closed the connection without sending anything")]
    NothingServed { peer: PeerEndpoint },
    #[error("downloaded {actual} bytes but the descriptor promises {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("downloaded content hashes to {actual} but the descriptor promises {expected}")]
    HashMismatch { expected: ContentHash, actual: ContentHash },
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Fetches whole files from seeders, one peer at a time.
#[derive(Debug, Clone)]
pub struct Downloader {
    download_dir: PathBuf,
    chunk_size: usize,
    attempt_timeout: Option<Duration>,
    verify: bool,
    show_progress: bool,
}

impl Downloader {
    pub fn new(config: &AgentConfig) -> Self {
        Downloader {
            download_dir: config.download_dir.clone(),
            chunk_size: config.chunk_size,
            attempt_timeout: config.attempt_timeout,
            verify: config.verify,
            show_progress: config.show_progress,
        }
    }

    pub fn destination(&self, descriptor: &Descriptor) -> PathBuf {
        self.download_dir.join(&descriptor.filename)
    }

    /// Downloads the descriptor's file from `peer` into the download
    /// directory.
    ///
    /// Bytes land in a `.part` file next to the destination, which only
    /// replaces the destination once the attempt succeeds. A failed attempt
    /// leaves any earlier copy untouched. The content is only checked against
    /// the descriptor when verification is enabled.
    pub async fn download(&self, peer: PeerEndpoint, descriptor: &Descriptor) -> Result<Download, DownloadError> {
        let dest = self.destination(descriptor);
        let part = partial_path(&dest);
        let progress = self.progress_bar(descriptor.size);

        let attempt = fetch(peer, &descriptor.filename, &part, self.chunk_size, &progress);
        let result = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(DownloadError::Timeout { peer, limit })),
            None => attempt.await,
        };
        progress.finish_and_clear();

        let bytes = match self.check(peer, descriptor, &part, result).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&part).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|source| DownloadError::FileSystem { path: dest.clone(), source })?;
        info!("downloaded '{}' from {peer} ({bytes} bytes) to {}", descriptor.filename, dest.display());
        Ok(Download { path: dest, bytes })
    }

    async fn check(
        &self,
        peer: PeerEndpoint,
        descriptor: &Descriptor,
        part: &Path,
        result: Result<u64, DownloadError>,
    ) -> Result<u64, DownloadError> {
        let bytes = result?;
        if bytes == 0 && descriptor.size > 0 {
            return Err(DownloadError::NothingServed { peer });
        }
        if self.verify {
            verify(part, descriptor).await?;
            debug!("'{}' from {peer} matches its descriptor", descriptor.filename);
        }
        Ok(bytes)
    }

    fn progress_bar(&self, size: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(size);
        match ProgressStyle::with_template("{bytes}/{total_bytes} [{bar:40}] {bytes_per_sec} {eta}") {
            Ok(style) => progress.set_style(style.progress_chars("=> ")),
            Err(e) => warn!("progress bar disabled: {e}"),
        }
        progress
    }
}

/// Requests `name` from `peer` and writes whatever arrives to `dest` until the
/// peer closes the connection. Returns the number of bytes received.
pub async fn fetch(peer: PeerEndpoint, name: &str, dest: &Path, chunk_size: usize, progress: &ProgressBar) -> Result<u64, DownloadError> {
    let fs_error = |source| DownloadError::FileSystem { path: dest.to_path_buf(), source };
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fs_error)?;
    }

    let mut stream = TcpStream::connect(peer.socket_addr())
        .await
        .map_err(|source| DownloadError::Connect { peer, source })?;
    debug!("[{peer}]: requesting '{name}'");
    stream
        .write_all(format!("{name}\n").as_bytes())
        .await
        .map_err(|source| DownloadError::Transfer { peer, source })?;

    let file = File::create(dest).await.map_err(fs_error)?;
    let mut writer = BufWriter::new(file);
    let received = copy_chunked(&mut stream, &mut writer, chunk_size, progress)
        .await
        .map_err(|source| DownloadError::Transfer { peer, source })?;
    writer.shutdown().await.map_err(fs_error)?;
    Ok(received)
}

/// Where an attempt writes before it is known to have succeeded.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

async fn discard(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!("removed {}", part.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => warn!("unable to remove {}: {e}", part.display()),
    }
}

async fn verify(path: &Path, descriptor: &Descriptor) -> Result<(), DownloadError> {
    let (actual, size) = sha256_file(path).await?;
    if size != descriptor.size {
        return Err(DownloadError::SizeMismatch { expected: descriptor.size, actual: size });
    }
    if actual != descriptor.sha256 {
        return Err(DownloadError::HashMismatch { expected: descriptor.sha256.clone(), actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::util::sha256::sha256_hash;

    /// A seeder stand-in that answers every connection with `reply`.
    async fn serve_once(reply: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(&reply).await.unwrap();
        });
        addr
    }

    fn descriptor(bytes: &[u8]) -> Descriptor {
        Descriptor {
            filename: "file.bin".to_string(),
            size: bytes.len() as u64,
            sha256: sha256_hash(bytes),
            tracker: "127.0.0.1:5000".to_string(),
        }
    }

    fn downloader(dir: &Path, verify: bool, attempt_timeout: Option<Duration>) -> Downloader {
        Downloader::new(&AgentConfig {
            download_dir: dir.join("nested").join("downloads"),
            verify,
            attempt_timeout,
            chunk_size: 100,
            ..AgentConfig::default()
        })
    }

    #[tokio::test]
    async fn writes_received_bytes_creating_directories() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let addr = serve_once(content.clone()).await;

        let download = downloader(dir.path(), false, None)
            .download(addr.into(), &descriptor(&content))
            .await
            .unwrap();

        assert_eq!(download.bytes, 5000);
        assert_eq!(tokio::fs::read(&download.path).await.unwrap(), content);
        assert!(!partial_path(&download.path).exists());
    }

    #[tokio::test]
    async fn earlier_copy_survives_failed_attempts() {
        let dir = TempDir::new().unwrap();
        let meta = descriptor(b"complete good copy");
        let downloader = downloader(dir.path(), true, None);
        let dest = downloader.destination(&meta);
        tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
        tokio::fs::write(&dest, b"complete good copy").await.unwrap();

        let addr = serve_once(Vec::new()).await;
        let result = downloader.download(addr.into(), &meta).await;
        assert!(matches!(result, Err(DownloadError::NothingServed { .. })));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"complete good copy");

        let addr = serve_once(b"complete bad  copy".to_vec()).await;
        let result = downloader.download(addr.into(), &meta).await;
        assert!(matches!(result, Err(DownloadError::HashMismatch { .. })));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"complete good copy");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn empty_file_accepts_an_empty_reply() {
        let dir = TempDir::new().unwrap();
        let addr = serve_once(Vec::new()).await;

        let download = downloader(dir.path(), true, None)
            .download(addr.into(), &descriptor(b""))
            .await
            .unwrap();

        assert_eq!(download.bytes, 0);
        assert!(tokio::fs::read(&download.path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let addr = serve_once(Vec::new()).await;

        let result = downloader(dir.path(), false, None).download(addr.into(), &descriptor(b"abc")).await;
        assert!(matches!(result, Err(DownloadError::NothingServed { .. })));
    }

    #[tokio::test]
    async fn corrupt_content_is_accepted_unless_verifying() {
        let dir = TempDir::new().unwrap();
        let meta = descriptor(b"expected");

        let addr = serve_once(b"tampered".to_vec()).await;
        assert!(downloader(dir.path(), false, None).download(addr.into(), &meta).await.is_ok());

        let addr = serve_once(b"tampered".to_vec()).await;
        let result = downloader(dir.path(), true, None).download(addr.into(), &meta).await;
        assert!(matches!(result, Err(DownloadError::HashMismatch { .. })));

        let addr = serve_once(b"short".to_vec()).await;
        let result = downloader(dir.path(), true, None).download(addr.into(), &meta).await;
        assert!(matches!(result, Err(DownloadError::SizeMismatch { expected: 8, actual: 5 })));
    }

    #[tokio::test]
    async fn verified_download_succeeds() {
        let dir = TempDir::new().unwrap();
        let addr = serve_once(b"expected".to_vec()).await;
        let result = downloader(dir.path(), true, None).download(addr.into(), &descriptor(b"expected")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = downloader(dir.path(), false, None).download(addr.into(), &descriptor(b"x")).await;
        assert!(matches!(result, Err(DownloadError::Connect { .. })));
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"partial").await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let result = downloader(dir.path(), false, Some(Duration::from_millis(200)))
            .download(addr.into(), &descriptor(b"partial and more"))
            .await;
        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    }
}
