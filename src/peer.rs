pub mod agent;
pub mod downloader;
pub mod seeder;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

pub use agent::{Agent, AgentError, DownloadOutcome, RunningAgent};
pub use downloader::{DownloadError, Downloader};
pub use seeder::{SeedError, Seeder};

/// Address at which a peer agent's seeder can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        PeerEndpoint { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for PeerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        PeerEndpoint { ip: addr.ip(), port: addr.port() }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
