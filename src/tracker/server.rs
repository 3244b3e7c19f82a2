use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::peer::PeerEndpoint;
use crate::tracker::message::{
    ControlFrames, MAX_RESPONSE_LEN, MessageError, REGISTERED, Request, control_frames, read_frame, write_json,
};
use crate::tracker::registry::Registry;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("unable to determine the listening address: {0}")]
    LocalAddr(io::Error),
}

/// Why a single connection ended without a complete exchange.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("dropped request: {0}")]
    Request(MessageError),
    #[error("failed to send reply: {0}")]
    Reply(MessageError),
}

/// The discovery service. Owns the registry for as long as it runs.
pub struct TrackerServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    max_request_len: usize,
    read_timeout: Option<Duration>,
}

impl TrackerServer {
    pub async fn bind(config: &TrackerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| ServerError::Bind { addr: config.bind, source })?;
        Ok(TrackerServer {
            listener,
            registry: Arc::new(Registry::new()),
            max_request_len: config.max_request_len,
            read_timeout: config.read_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Accepts connections until the task is dropped, handling each one on
    /// its own task.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("tracker listening on {addr}");
        }
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            let registry = self.registry.clone();
            let max_request_len = self.max_request_len;
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &registry, max_request_len, read_timeout).await {
                    warn!("[{remote}] {e}");
                }
            });
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: &Registry,
    max_request_len: usize,
    read_timeout: Option<Duration>,
) -> Result<(), ConnectionError> {
    let mut frames = control_frames(stream, max_request_len);
    let request = read_request(&mut frames, read_timeout)
        .await
        .map_err(ConnectionError::Request)?;

    // The request limit only bounds what a client may send.
    frames.codec_mut().set_max_frame_length(MAX_RESPONSE_LEN);
    let replied = match request {
        Request::Register { sha256, ip, port, meta } => {
            let peer = PeerEndpoint::new(ip, port);
            info!("register {peer} for {sha256} (metadata {})", if meta.is_some() { "supplied" } else { "absent" });
            registry.register(&sha256, peer, meta).await;
            write_json(&mut frames, REGISTERED).await
        },
        Request::GetPeers { sha256, ip, port } => {
            let peers = registry.peers_for(&sha256, &PeerEndpoint::new(ip, port)).await;
            debug!("{} peer(s) for {sha256} offered to {ip}:{port}", peers.len());
            write_json(&mut frames, &peers).await
        },
        Request::ListMetadata => {
            let descriptors = registry.list_metadata().await;
            debug!("listing {} descriptor(s)", descriptors.len());
            write_json(&mut frames, &descriptors).await
        },
    };
    replied.map_err(ConnectionError::Reply)
}

async fn read_request(frames: &mut ControlFrames<TcpStream>, read_timeout: Option<Duration>) -> Result<Request, MessageError> {
    let bytes = match read_timeout {
        Some(limit) => tokio::time::timeout(limit, read_frame(frames))
            .await
            .map_err(|_| MessageError::Io(io::ErrorKind::TimedOut.into()))??,
        None => read_frame(frames).await?,
    };
    Request::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::DEFAULT_MAX_REQUEST_LEN;
    use crate::metadata::{ContentHash, Descriptor};
    use crate::tracker::client::TrackerClient;

    async fn start() -> SocketAddr {
        let config = TrackerConfig { bind: "127.0.0.1:0".parse().unwrap(), ..TrackerConfig::default() };
        let server = TrackerServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();
        addr
    }

    fn descriptor() -> Descriptor {
        Descriptor {
            filename: "report.pdf".to_string(),
            size: 1024,
            sha256: ContentHash::try_from("ab".repeat(32)).unwrap(),
            tracker: "127.0.0.1:5000".to_string(),
        }
    }

    fn peer(port: u16) -> PeerEndpoint {
        PeerEndpoint::new([127, 0, 0, 1].into(), port)
    }

    #[tokio::test]
    async fn register_then_discover() {
        let addr = start().await;
        let client = TrackerClient::new(addr.to_string(), None);
        let meta = descriptor();

        assert_eq!(client.register(&meta, peer(6001)).await.unwrap(), REGISTERED);
        client.register(&meta, peer(7001)).await.unwrap();

        assert_eq!(client.get_peers(&meta.sha256, peer(7001)).await.unwrap(), vec![peer(6001)]);
        assert_eq!(client.list_metadata().await.unwrap(), vec![meta]);
    }

    #[tokio::test]
    async fn malformed_request_is_closed_without_reply() {
        let addr = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let garbage = b"{\"no\":\"action\"}";
        stream.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(garbage).await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());

        // the server keeps serving and nothing was registered
        let client = TrackerClient::new(addr.to_string(), None);
        assert!(client.list_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_disconnect_does_not_affect_others() {
        let addr = start().await;
        drop(TcpStream::connect(addr).await.unwrap());

        let client = TrackerClient::new(addr.to_string(), None);
        let meta = descriptor();
        client.register(&meta, peer(6001)).await.unwrap();
        assert_eq!(client.get_peers(&meta.sha256, peer(1)).await.unwrap(), vec![peer(6001)]);
    }

    #[tokio::test]
    async fn silent_connections_time_out() {
        let config = TrackerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            read_timeout: Some(Duration::from_millis(50)),
            ..TrackerConfig::default()
        };
        let server = TrackerServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut reply = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply)).await;
        assert!(matches!(closed, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn bad_requests_are_told_apart_from_failed_replies() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let garbage = b"not json";
            stream.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
            stream.write_all(garbage).await.unwrap();
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            reply
        });

        let (stream, _) = listener.accept().await.unwrap();
        let result = handle_connection(stream, &Registry::new(), 1024, None).await;
        let error = result.unwrap_err();
        assert!(matches!(error, ConnectionError::Request(MessageError::Json(_))));
        assert!(error.to_string().starts_with("dropped request"));
        assert!(client.await.unwrap().is_empty());

        let failed = ConnectionError::Reply(MessageError::Closed);
        assert!(failed.to_string().starts_with("failed to send reply"));
    }

    #[tokio::test]
    async fn listing_may_exceed_the_request_limit() {
        let addr = start().await;
        let client = TrackerClient::new(addr.to_string(), None);

        let descriptors: Vec<Descriptor> = (0..600u32)
            .map(|i| Descriptor {
                filename: format!("file-{i}.bin"),
                size: 1024,
                sha256: ContentHash::try_from(format!("{i:064x}")).unwrap(),
                tracker: "127.0.0.1:5000".to_string(),
            })
            .collect();
        for (i, meta) in descriptors.iter().enumerate() {
            client.register(meta, peer(6000 + i as u16)).await.unwrap();
        }
        assert!(serde_json::to_vec(&descriptors).unwrap().len() > DEFAULT_MAX_REQUEST_LEN);

        let listed = client.list_metadata().await.unwrap();
        assert_eq!(listed, descriptors);
    }

    #[tokio::test]
    async fn peer_list_may_exceed_the_request_limit() {
        let config = TrackerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            max_request_len: 512,
            ..TrackerConfig::default()
        };
        let server = TrackerServer::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        server.spawn();

        let client = TrackerClient::new(addr.to_string(), None);
        let meta = descriptor();
        for port in 6001..6041 {
            client.register(&meta, peer(port)).await.unwrap();
        }

        let peers = client.get_peers(&meta.sha256, peer(1)).await.unwrap();
        assert!(serde_json::to_vec(&peers).unwrap().len() > 512);
        assert_eq!(peers, (6001..6041).map(peer).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_registrations_from_two_agents() {
        let addr = start().await;
        let meta = descriptor();

        let a = {
            let client = TrackerClient::new(addr.to_string(), None);
            let meta = meta.clone();
            tokio::spawn(async move { client.register(&meta, peer(6001)).await })
        };
        let b = {
            let client = TrackerClient::new(addr.to_string(), None);
            let meta = meta.clone();
            tokio::spawn(async move { client.register(&meta, peer(7001)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let client = TrackerClient::new(addr.to_string(), None);
        let mut peers = client.get_peers(&meta.sha256, peer(1)).await.unwrap();
        peers.sort_by_key(|p| p.port);
        assert_eq!(peers, vec![peer(6001), peer(7001)]);
    }
}
