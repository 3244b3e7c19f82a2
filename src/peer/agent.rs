use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::metadata::descriptor::DESCRIPTOR_EXTENSION;
use crate::metadata::{Descriptor, DescriptorError};
use crate::peer::downloader::{Download, Downloader};
use crate::peer::seeder::{SeedError, Seeder};
use crate::peer::PeerEndpoint;
use crate::tracker::{TrackerClient, TrackerError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no metadata for '{0}' on tracker")]
    NoMetadata(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("tracker request failed: {0}")]
    Tracker(#[from] TrackerError),
    #[error("unable to start seeding: {0}")]
    Seed(#[from] SeedError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { from: PeerEndpoint, download: Download },
    NoPeerServed,
}

/// A peer agent: seeds one file and tries to fetch it from the swarm.
#[derive(Debug, Clone)]
pub struct Agent {
    config: AgentConfig,
    self_ip: IpAddr,
    self_port: u16,
    downloader: Downloader,
}

/// An agent whose download phase is over and whose seeder keeps running.
#[derive(Debug)]
pub struct RunningAgent {
    pub descriptor: Descriptor,
    /// The endpoint registered with the tracker.
    pub endpoint: PeerEndpoint,
    pub seeder_addr: SocketAddr,
    pub outcome: DownloadOutcome,
    seeder: JoinHandle<()>,
}

impl Agent {
    /// `self_port` 0 advertises whatever port the seeder ends up bound to.
    pub fn new(config: AgentConfig, self_ip: IpAddr, self_port: u16) -> Self {
        let downloader = Downloader::new(&config);
        Agent { config, self_ip, self_port, downloader }
    }

    /// Finds the descriptor for `target`: either a local descriptor file, or
    /// the first descriptor listed by the tracker whose file name is `target`.
    /// A descriptor found on the tracker is saved into the shared directory.
    pub async fn resolve(&self, target: &str) -> Result<Descriptor, AgentError> {
        if is_local_descriptor(Path::new(target)).await {
            return Ok(Descriptor::load(target).await?);
        }

        let tracker = TrackerClient::new(self.config.tracker.clone(), self.config.tracker_timeout);
        let descriptor = tracker
            .list_metadata()
            .await?
            .into_iter()
            .find(|d| d.filename == target)
            .ok_or_else(|| AgentError::NoMetadata(target.to_string()))?;

        let saved = self.config.shared_dir.join(descriptor.descriptor_name());
        descriptor.save(&saved).await?;
        info!("saved metadata to {}", saved.display());
        Ok(descriptor)
    }

    /// Resolves `target`, starts seeding, registers with the tracker, then
    /// tries each peer the tracker offers until one serves the file.
    ///
    /// The agent registers itself as a source before it holds the file.
    pub async fn start(&self, target: &str) -> Result<RunningAgent, AgentError> {
        let descriptor = self.resolve(target).await?;

        let roots = vec![self.config.shared_dir.clone(), self.config.download_dir.clone()];
        let bind = SocketAddr::new(self.config.bind_ip, self.self_port);
        let seeder = Seeder::bind(bind, &descriptor.filename, roots, self.config.chunk_size).await?;
        let seeder_addr = seeder.local_addr()?;
        let endpoint = PeerEndpoint::new(self.self_ip, seeder_addr.port());
        let seeder = seeder.spawn();

        match self.discover(&descriptor, endpoint).await {
            Ok(peers) => {
                let outcome = self.download_from(&peers, &descriptor, endpoint).await;
                Ok(RunningAgent { descriptor, endpoint, seeder_addr, outcome, seeder })
            },
            Err(e) => {
                seeder.abort();
                Err(e)
            }
        }
    }

    async fn discover(&self, descriptor: &Descriptor, endpoint: PeerEndpoint) -> Result<Vec<PeerEndpoint>, AgentError> {
        let tracker = TrackerClient::new(descriptor.tracker.clone(), self.config.tracker_timeout);

        let ack = tracker.register(descriptor, endpoint).await?;
        info!("[tracker {}]: {ack}", tracker.addr());

        let peers = tracker.get_peers(&descriptor.sha256, endpoint).await?;
        info!("[tracker {}]: {} peer(s) for '{}'", tracker.addr(), peers.len(), descriptor.filename);
        Ok(peers)
    }

    /// Tries `peers` in order and stops at the first successful download.
    pub async fn download_from(&self, peers: &[PeerEndpoint], descriptor: &Descriptor, endpoint: PeerEndpoint) -> DownloadOutcome {
        for &peer in peers.iter().filter(|&&p| p != endpoint) {
            info!("attempting download of '{}' from {peer}", descriptor.filename);
            match self.downloader.download(peer, descriptor).await {
                Ok(download) => return DownloadOutcome::Downloaded { from: peer, download },
                Err(e) => warn!("download from {peer} failed: {e}"),
            }
        }
        warn!("no peer served '{}'", descriptor.filename);
        DownloadOutcome::NoPeerServed
    }
}

impl RunningAgent {
    /// Keeps seeding until the process is terminated.
    pub async fn serve_forever(self) {
        if let Err(e) = self.seeder.await {
            error!("seeder stopped: {e}");
        }
    }

    /// Stops seeding.
    pub fn shutdown(self) {
        self.seeder.abort();
    }
}

async fn is_local_descriptor(path: &Path) -> bool {
    let is_descriptor = path.extension().is_some_and(|ext| ext == DESCRIPTOR_EXTENSION);
    is_descriptor && tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}
