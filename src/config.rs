use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TRACKER_PORT: u16 = 5000;
pub const DEFAULT_TRACKER: &str = "127.0.0.1:5000";
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_MAX_REQUEST_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub bind: SocketAddr,
    /// Largest control-plane frame accepted from a client.
    pub max_request_len: usize,
    /// How long a connection may take to deliver its request. `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_TRACKER_PORT),
            max_request_len: DEFAULT_MAX_REQUEST_LEN,
            read_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Tracker asked for metadata when only a file name is known.
    pub tracker: String,
    /// Where shared files and descriptors live.
    pub shared_dir: PathBuf,
    /// Where downloads are written.
    pub download_dir: PathBuf,
    /// Address the seeder listens on.
    pub bind_ip: IpAddr,
    /// Upper bound on one download attempt. `None` waits forever.
    pub attempt_timeout: Option<Duration>,
    /// Upper bound on one tracker exchange. `None` waits forever.
    pub tracker_timeout: Option<Duration>,
    /// Check size and digest of a download against the descriptor.
    pub verify: bool,
    pub chunk_size: usize,
    pub show_progress: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            tracker: DEFAULT_TRACKER.to_string(),
            shared_dir: PathBuf::from("shared"),
            download_dir: PathBuf::from("downloaded"),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            attempt_timeout: None,
            tracker_timeout: None,
            verify: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: false,
        }
    }
}
