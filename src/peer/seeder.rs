use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use indicatif::ProgressBar;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::metadata::descriptor::descriptor_name;
use crate::util::io::copy_chunked;

/// Longest request line a seeder will read.
pub const MAX_REQUEST_LINE: usize = 1024;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("unable to listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("unable to determine the listening address: {0}")]
    LocalAddr(io::Error),
    #[error("peer closed the connection without naming a file")]
    NoRequest,
    #[error("unreadable request: {0}")]
    Request(#[from] LinesCodecError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] io::Error),
}

/// The two artifacts a seeder will hand out, and where to look for them.
#[derive(Debug)]
struct Catalog {
    filename: String,
    descriptor: String,
    roots: Vec<PathBuf>,
    chunk_size: usize,
}

impl Catalog {
    /// Resolves a request to a local path. Only the seeded file and its
    /// descriptor are ever served, taken from the first root that has them.
    async fn locate(&self, request: &str) -> Option<PathBuf> {
        if request != self.filename && request != self.descriptor {
            return None;
        }
        for root in &self.roots {
            let path = root.join(request);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.is_file() {
                    return Some(path);
                }
            }
        }
        None
    }
}

/// Serves one file and its descriptor to any peer that asks.
///
/// A request is a single line naming the artifact. The reply is the raw
/// bytes followed by the connection closing; an unknown or missing artifact
/// gets the connection closed with nothing sent.
pub struct Seeder {
    listener: TcpListener,
    catalog: Arc<Catalog>,
}

impl Seeder {
    pub async fn bind(addr: SocketAddr, filename: &str, roots: Vec<PathBuf>, chunk_size: usize) -> Result<Self, SeedError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SeedError::Bind { addr, source })?;
        let catalog = Catalog {
            filename: filename.to_string(),
            descriptor: descriptor_name(filename),
            roots,
            chunk_size,
        };
        Ok(Seeder { listener, catalog: Arc::new(catalog) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SeedError> {
        self.listener.local_addr().map_err(SeedError::LocalAddr)
    }

    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("serving '{}' on {addr}", self.catalog.filename);
        }
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            let catalog = self.catalog.clone();
            tokio::spawn(async move {
                match serve_connection(stream, &catalog).await {
                    Ok(Some((request, sent))) => info!("[{remote}]: sent '{request}' ({sent} bytes)"),
                    Ok(None) => (),
                    Err(e) => warn!("[{remote}]: {e}"),
                }
            });
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn serve_connection(stream: TcpStream, catalog: &Catalog) -> Result<Option<(String, u64)>, SeedError> {
    let remote = stream.peer_addr()?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    let line = lines.next().await.ok_or(SeedError::NoRequest)??;
    let request = line.trim();
    debug!("[{remote}]: requested '{request}'");

    let Some(path) = catalog.locate(request).await else {
        if request == catalog.filename || request == catalog.descriptor {
            info!("[{remote}]: '{request}' is not available locally");
        } else {
            info!("[{remote}]: invalid request '{request}'");
        }
        return Ok(None);
    };

    let mut file = File::open(&path).await?;
    let sent = copy_chunked(&mut file, &mut writer, catalog.chunk_size, &ProgressBar::hidden()).await?;
    writer.shutdown().await?;
    Ok(Some((request.to_string(), sent)))
}
