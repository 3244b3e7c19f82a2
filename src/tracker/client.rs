use std::future::Future;
use std::time::Duration;

use futures_util::SinkExt;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::metadata::{ContentHash, Descriptor};
use crate::peer::PeerEndpoint;
use crate::tracker::message::{MAX_RESPONSE_LEN, MessageError, Request, control_frames, read_json};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unable to connect to tracker {addr}: {source}")]
    Connect { addr: String, source: std::io::Error },
    #[error("tracker {addr} did not answer within {limit:?}")]
    Timeout { addr: String, limit: Duration },
    #[error("exchange with tracker {addr} failed: {source}")]
    Exchange { addr: String, source: MessageError },
}

/// Issues control-plane requests, one connection per request.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    addr: String,
    timeout: Option<Duration>,
}

impl TrackerClient {
    pub fn new(addr: impl Into<String>, timeout: Option<Duration>) -> Self {
        TrackerClient { addr: addr.into(), timeout }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Announces `peer` as a source for the descriptor's content, supplying
    /// the descriptor as metadata. Returns the tracker's acknowledgement.
    pub async fn register(&self, descriptor: &Descriptor, peer: PeerEndpoint) -> Result<String, TrackerError> {
        self.exchange(Request::register(descriptor, peer)).await
    }

    /// Peers known for `hash`, never including `peer` itself.
    pub async fn get_peers(&self, hash: &ContentHash, peer: PeerEndpoint) -> Result<Vec<PeerEndpoint>, TrackerError> {
        self.exchange(Request::get_peers(hash, peer)).await
    }

    pub async fn list_metadata(&self) -> Result<Vec<Descriptor>, TrackerError> {
        self.exchange(Request::ListMetadata).await
    }

    async fn exchange<T: DeserializeOwned>(&self, request: Request) -> Result<T, TrackerError> {
        debug!("sending {request:?} to tracker {}", self.addr);
        self.bounded(async {
            let stream = TcpStream::connect(self.addr.as_str())
                .await
                .map_err(|source| TrackerError::Connect { addr: self.addr.clone(), source })?;
            send_and_receive(stream, &request)
                .await
                .map_err(|source| TrackerError::Exchange { addr: self.addr.clone(), source })
        })
        .await
    }

    async fn bounded<T, F>(&self, future: F) -> Result<T, TrackerError>
    where
        F: Future<Output = Result<T, TrackerError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| TrackerError::Timeout { addr: self.addr.clone(), limit })?,
            None => future.await,
        }
    }
}

async fn send_and_receive<T: DeserializeOwned>(stream: TcpStream, request: &Request) -> Result<T, MessageError> {
    let mut frames = control_frames(stream, MAX_RESPONSE_LEN);
    frames.send(request.encode()?).await?;
    read_json(&mut frames).await
}
